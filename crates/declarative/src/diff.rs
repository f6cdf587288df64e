//! Props comparison for the skip rule
//!
//! The diff contract: props are compared as canonical JSON text, with
//! object keys sorted recursively and every secret replaced by a fixed
//! marker. Two props values with the same canonical text never trigger
//! a handler invocation (unless the provider sets `always_update`).

use serde_json::{Map, Value};

/// Key of the single-entry object that wraps a secret value
pub const SECRET_KEY: &str = "@secret";

const SECRET_MASK: &str = "<secret>";

/// Wrap a value as a secret
pub fn wrap_secret(value: Value) -> Value {
    let mut map = Map::new();
    map.insert(SECRET_KEY.to_string(), value);
    Value::Object(map)
}

/// Check if a value is a wrapped secret
pub fn is_secret(value: &Value) -> bool {
    matches!(value, Value::Object(map) if map.len() == 1 && map.contains_key(SECRET_KEY))
}

/// Replace every wrapped secret with its plain value
///
/// This is what handlers see; stored props keep the wrapper.
pub fn reveal_secrets(value: &Value) -> Value {
    match value {
        Value::Object(map) if is_secret(value) => reveal_secrets(&map[SECRET_KEY]),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), reveal_secrets(v)))
                .collect(),
        ),
        Value::Array(items) => Value::Array(items.iter().map(reveal_secrets).collect()),
        other => other.clone(),
    }
}

/// Canonical form: sorted keys, secrets masked
fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(_) if is_secret(value) => Value::String(SECRET_MASK.to_string()),
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut out = Map::new();
            for key in keys {
                out.insert(key.clone(), canonicalize(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serialize props to their canonical comparison text
pub fn canonical_json(value: &Value) -> String {
    canonicalize(value).to_string()
}

/// Whether stored props and newly declared props compare equal
pub fn props_unchanged(stored: Option<&Value>, declared: &Value) -> bool {
    stored.is_some_and(|s| canonical_json(s) == canonical_json(declared))
}

/// Pretty canonical rendering, suitable for a textual diff
pub fn display_json(value: &Value) -> String {
    serde_json::to_string_pretty(&canonicalize(value)).unwrap_or_else(|_| value.to_string())
}
