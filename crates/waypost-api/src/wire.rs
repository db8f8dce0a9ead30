//! Request encoding for both transport channels.
//!
//! Direct requests carry a flat `key=value` form: nested objects join their keys
//! with `.`, arrays repeat the key, nulls are dropped. Callback-retrieval
//! requests for POST endpoints carry the whole payload as base64 JSON in `data`.

use crate::config::ServiceUrls;
use crate::endpoints::{Destination, EndpointDescriptor, Method};
use crate::errors::{ApiError, Violation};
use base64::Engine;
use serde_json::{Map, Value};
use url::form_urlencoded;

pub const FORM_CONTENT_TYPE: &str = "application/x-www-form-urlencoded;charset=utf-8";

/// A request ready to hand to a transport channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PreparedRequest {
    pub method: Method,
    /// Endpoint URL without any query string added by the encoder.
    pub url: String,
    pub pairs: Vec<(String, String)>,
    /// Payload after stringification, kept for the base64 callback form.
    pub payload: Map<String, Value>,
}

impl PreparedRequest {
    pub fn form(&self) -> String {
        encode_pairs(&self.pairs)
    }

    /// URL used by the direct channel: GET carries the form as a query string.
    pub fn direct_url(&self) -> String {
        match self.method {
            Method::Get => append_query(&self.url, &self.form()),
            Method::Post => self.url.clone(),
        }
    }

    /// Body used by the direct channel.
    pub fn direct_body(&self) -> Option<String> {
        match self.method {
            Method::Get => None,
            Method::Post => Some(self.form()),
        }
    }

    /// Script source for the callback-retrieval channel.
    pub fn callback_url(&self, hook: &str) -> Result<String, ApiError> {
        let query = match self.method {
            Method::Get => {
                let mut pairs = self.pairs.clone();
                pairs.push(("callback".to_string(), hook.to_string()));
                encode_pairs(&pairs)
            }
            Method::Post => {
                let json = serde_json::to_string(&Value::Object(self.payload.clone()))
                    .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
                let data = base64::engine::general_purpose::STANDARD.encode(json);
                encode_pairs(&[
                    ("data".to_string(), data),
                    ("callback".to_string(), hook.to_string()),
                ])
            }
        };
        Ok(append_query(&self.url, &query))
    }
}

/// Resolves the endpoint URL and encodes `payload` for the wire.
pub fn prepare(
    descriptor: &EndpointDescriptor,
    mut payload: Map<String, Value>,
    urls: &ServiceUrls,
) -> Result<PreparedRequest, ApiError> {
    let url = match descriptor.destination {
        Destination::Api => join_url(&urls.api, descriptor.path),
        Destination::AppService => join_url(&urls.app_service, descriptor.path),
        Destination::PathParameter => {
            let mut segments = Vec::with_capacity(descriptor.path_params.len());
            for rule in descriptor.path_params {
                match payload.remove(rule.name) {
                    Some(Value::String(segment)) if !segment.is_empty() => segments.push(segment),
                    Some(Value::Number(number)) => segments.push(number.to_string()),
                    _ => {
                        return Err(Violation::MissingParameter {
                            path: descriptor.path.to_string(),
                            name: rule.name.to_string(),
                        }
                        .into());
                    }
                }
            }
            segments.join("/")
        }
    };

    stringify_fields(&mut payload, descriptor.stringify)?;
    let pairs = flatten(&payload);
    Ok(PreparedRequest {
        method: descriptor.method,
        url,
        pairs,
        payload,
    })
}

/// Replaces each named field with its JSON text.
pub fn stringify_fields(payload: &mut Map<String, Value>, names: &[&str]) -> Result<(), ApiError> {
    for name in names {
        if let Some(value) = payload.get_mut(*name) {
            if value.is_null() || value.is_string() {
                continue;
            }
            let text = serde_json::to_string(value)
                .map_err(|err| ApiError::InvalidResponse(err.to_string()))?;
            *value = Value::String(text);
        }
    }
    Ok(())
}

pub fn flatten(payload: &Map<String, Value>) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for (key, value) in payload {
        flatten_into(&mut pairs, key, value);
    }
    pairs
}

fn flatten_into(pairs: &mut Vec<(String, String)>, key: &str, value: &Value) {
    match value {
        Value::Null => {}
        Value::Bool(flag) => pairs.push((key.to_string(), flag.to_string())),
        Value::Number(number) => pairs.push((key.to_string(), number.to_string())),
        Value::String(text) => pairs.push((key.to_string(), text.clone())),
        Value::Array(items) => {
            for item in items {
                flatten_into(pairs, key, item);
            }
        }
        Value::Object(fields) => {
            for (child, item) in fields {
                flatten_into(pairs, &format!("{key}.{child}"), item);
            }
        }
    }
}

pub fn encode_pairs(pairs: &[(String, String)]) -> String {
    form_urlencoded::Serializer::new(String::new())
        .extend_pairs(pairs.iter().map(|(key, value)| (key.as_str(), value.as_str())))
        .finish()
}

pub fn append_query(url: &str, query: &str) -> String {
    if query.is_empty() {
        return url.to_string();
    }
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}{query}")
}

fn join_url(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
