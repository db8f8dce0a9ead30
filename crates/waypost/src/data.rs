use serde_json::{Map, Value};

pub type SessionData = Map<String, Value>;

/// Session keys exposed to callers.
pub const WHITELISTED_FIELDS: [&str; 7] = [
    "data",
    "data_parsed",
    "has_app",
    "identity",
    "developer_identity",
    "referring_identity",
    "referring_link",
];

pub fn whitelist(record: &Map<String, Value>) -> SessionData {
    WHITELISTED_FIELDS
        .iter()
        .filter_map(|key| record.get(*key).map(|value| (key.to_string(), value.clone())))
        .collect()
}

/// Parses link data stored as JSON text. Empty or unparseable data reads as `{}`.
pub fn parse_link_data(data: Option<&Value>) -> Value {
    match data {
        Some(Value::String(text)) if !text.trim().is_empty() => {
            match serde_json::from_str::<Value>(text) {
                Ok(parsed) => parsed,
                Err(err) => {
                    tracing::debug!(error = %err, "link data is not JSON");
                    Value::Object(Map::new())
                }
            }
        }
        Some(Value::Object(map)) => Value::Object(map.clone()),
        _ => Value::Object(Map::new()),
    }
}

/// Reads a string field, accepting numeric ids as the server sometimes sends them.
pub(crate) fn string_field(record: &Map<String, Value>, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(text) if !text.is_empty() => Some(text.clone()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    }
}
