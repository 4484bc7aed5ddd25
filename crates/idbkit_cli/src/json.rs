//! JSON rendering of stored keys and values.

use idbkit_codec::{Key, Value};
use serde_json::{json, Map, Number};

fn number(n: f64) -> serde_json::Value {
    Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Renders a key. Dates and binaries are tagged objects.
pub fn key_to_json(key: &Key) -> serde_json::Value {
    match key {
        Key::Number(n) => number(*n),
        Key::Date(ms) => json!({ "$date": number(*ms) }),
        Key::String(s) => serde_json::Value::String(s.clone()),
        Key::Binary(bytes) => json!({ "$binary": hex(bytes) }),
        Key::Array(items) => serde_json::Value::Array(items.iter().map(key_to_json).collect()),
    }
}

/// Renders a value. `undefined` and non-finite numbers become `null`.
pub fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::Undefined | Value::Null => serde_json::Value::Null,
        Value::Bool(b) => serde_json::Value::Bool(*b),
        Value::Number(n) => number(*n),
        Value::String(s) => serde_json::Value::String(s.clone()),
        Value::Date(ms) => json!({ "$date": number(*ms) }),
        Value::Binary(bytes) => json!({ "$binary": hex(bytes) }),
        Value::View(view) => match view.to_vec() {
            Some(bytes) => json!({ "$binary": hex(&bytes) }),
            None => serde_json::Value::Null,
        },
        Value::Array(items) => serde_json::Value::Array(items.iter().map(value_to_json).collect()),
        Value::Object(pairs) => {
            let mut map = Map::new();
            for (name, item) in pairs {
                map.insert(name.clone(), value_to_json(item));
            }
            serde_json::Value::Object(map)
        }
    }
}
