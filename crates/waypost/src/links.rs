//! Link shaping: referring-link canonicalization, click-id extraction, link
//! data cleanup and the offline dynamic-link fallback.

use base64::Engine;
use serde_json::{Map, Value};
use url::form_urlencoded;

/// Link-data keys carried into a dynamic link, in emission order.
const DYNAMIC_LINK_KEYS: [&str; 11] = [
    "tags", "alias", "channel", "feature", "stage", "campaign", "type", "duration", "sdk",
    "source", "data",
];

/// Makes a relative referring link absolute against the link service.
pub fn canonical_referring_link(link: &str, link_service: &str) -> String {
    if link.starts_with("http") {
        link.to_string()
    } else {
        format!(
            "{}/{}",
            link_service.trim_end_matches('/'),
            link.trim_start_matches('/')
        )
    }
}

/// Last path segment of a link, keeping its query string.
pub fn click_id_from_link(link: &str) -> Option<String> {
    let without_fragment = link.split('#').next().unwrap_or_default();
    let (path, query) = match without_fragment.split_once('?') {
        Some((path, query)) => (path, Some(query)),
        None => (without_fragment, None),
    };
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    if segment.is_empty() || segment.contains(':') {
        return None;
    }
    Some(match query {
        Some(query) if !query.is_empty() => format!("{segment}?{query}"),
        _ => segment.to_string(),
    })
}

/// Normalizes caller link data: tags the source and serializes `data` to JSON text.
pub fn clean_link_data(mut link_data: Map<String, Value>, current_url: Option<&str>) -> Map<String, Value> {
    link_data.insert("source".to_string(), Value::String("web-sdk".to_string()));

    let mut data = match link_data.remove("data") {
        Some(Value::Object(map)) => map,
        Some(Value::String(text)) => match serde_json::from_str::<Value>(&text) {
            Ok(Value::Object(map)) => map,
            _ => Map::from_iter([("anything".to_string(), Value::String(text))]),
        },
        Some(Value::Null) | None => Map::new(),
        Some(other) => Map::from_iter([("anything".to_string(), other)]),
    };
    if let Some(url) = current_url {
        data.entry("$canonical_url")
            .or_insert_with(|| Value::String(url.to_string()));
    }

    link_data.insert(
        "data".to_string(),
        Value::String(Value::Object(data).to_string()),
    );
    link_data
}

/// Deterministic link the server would resolve from cleaned link data.
pub fn dynamic_link(link_service: &str, key: &str, link_data: &Map<String, Value>) -> String {
    let mut query = form_urlencoded::Serializer::new(String::new());
    for name in DYNAMIC_LINK_KEYS {
        match (name, link_data.get(name)) {
            ("tags", Some(Value::Array(tags))) => {
                for tag in tags.iter().filter_map(Value::as_str) {
                    query.append_pair("tags", tag);
                }
            }
            ("data", Some(Value::String(data))) => {
                let encoded = base64::engine::general_purpose::STANDARD.encode(data);
                query.append_pair("data", &encoded);
            }
            (_, Some(Value::String(text))) if !text.is_empty() => {
                query.append_pair(name, text);
            }
            (_, Some(Value::Number(number))) => {
                query.append_pair(name, &number.to_string());
            }
            _ => {}
        }
    }
    format!(
        "{}/a/{}?{}",
        link_service.trim_end_matches('/'),
        key,
        query.finish()
    )
}
