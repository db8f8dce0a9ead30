use crate::endpoints::{EndpointDescriptor, ParamRule, ValueKind};
use crate::errors::Violation;
use regex::Regex;
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::sync::{Mutex, OnceLock};

pub const BRANCH_KEY_PATTERN: &str = "^key_(live|test)_[A-Za-z0-9]{32}$";
pub const APP_ID_PATTERN: &str = "^[0-9]{15,20}$";

static BRANCH_KEY: OnceLock<Option<Regex>> = OnceLock::new();
static APP_ID: OnceLock<Option<Regex>> = OnceLock::new();
static FORMATS: OnceLock<Mutex<HashMap<&'static str, Option<Regex>>>> = OnceLock::new();

/// Whether `key` has the shape of a publishable key rather than a legacy app id.
pub fn is_publishable_key(key: &str) -> bool {
    key.starts_with("key_live_") || key.starts_with("key_test_")
}

/// Checks `payload` against the descriptor's rules; the first violation wins.
///
/// With tracking disabled every check is skipped, since those payloads omit
/// identifying fields on purpose.
pub fn validate(
    descriptor: &EndpointDescriptor,
    payload: &Map<String, Value>,
    tracking_disabled: bool,
) -> Result<(), Violation> {
    if tracking_disabled {
        return Ok(());
    }

    if descriptor.needs_credential && !has_credential(payload) {
        return Err(Violation::MissingParameter {
            path: descriptor.path.to_string(),
            name: "branch_key or app_id".to_string(),
        });
    }

    for rule in descriptor.rules() {
        check_rule(descriptor.path, rule, payload.get(rule.name))?;
    }
    Ok(())
}

/// `0` and `false` are present values; a missing key, `null` and `""` are not.
pub fn is_absent(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(text)) => text.is_empty(),
        Some(_) => false,
    }
}

fn check_rule(path: &str, rule: &ParamRule, value: Option<&Value>) -> Result<(), Violation> {
    let value = match value {
        Some(value) if !is_absent(Some(value)) => value,
        _ if rule.required => {
            return Err(Violation::MissingParameter {
                path: path.to_string(),
                name: rule.name.to_string(),
            });
        }
        _ => return Ok(()),
    };

    let wrong_type = |expected: &'static str| Violation::WrongType {
        path: path.to_string(),
        name: rule.name.to_string(),
        expected,
    };

    match rule.kind {
        ValueKind::Object if !value.is_object() => Err(wrong_type("an object")),
        ValueKind::Array if !value.is_array() => Err(wrong_type("an array")),
        ValueKind::Number if !value.is_number() => Err(wrong_type("a number")),
        ValueKind::Boolean if !value.is_boolean() => Err(wrong_type("a boolean")),
        ValueKind::String | ValueKind::Format(_) if !value.is_string() => {
            Err(wrong_type("a string"))
        }
        ValueKind::Format(pattern) => {
            let text = value.as_str().unwrap_or_default();
            let matches = format_regex(pattern).is_some_and(|regex| regex.is_match(text));
            if matches {
                Ok(())
            } else {
                Err(Violation::WrongFormat {
                    path: path.to_string(),
                    name: rule.name.to_string(),
                })
            }
        }
        _ => Ok(()),
    }
}

/// Compiled pattern for a `Format` rule, built once per pattern.
fn format_regex(pattern: &'static str) -> Option<Regex> {
    let mut formats = FORMATS
        .get_or_init(|| Mutex::new(HashMap::new()))
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    formats
        .entry(pattern)
        .or_insert_with(|| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(error) => {
                tracing::warn!(pattern, %error, "format rule pattern does not compile");
                None
            }
        })
        .clone()
}

fn has_credential(payload: &Map<String, Value>) -> bool {
    let matches = |cell: &'static OnceLock<Option<Regex>>, pattern: &str, key: &str| {
        let regex = cell.get_or_init(|| Regex::new(pattern).ok());
        match (regex, payload.get(key).and_then(Value::as_str)) {
            (Some(regex), Some(value)) => regex.is_match(value),
            _ => false,
        }
    };
    matches(&BRANCH_KEY, BRANCH_KEY_PATTERN, "branch_key")
        || matches(&APP_ID, APP_ID_PATTERN, "app_id")
}
