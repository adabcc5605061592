//! Helpers for the msgpack maps exchanged over request paths.

use rmpv::Value;

/// Build one map entry with a string key.
pub(crate) fn kv(key: &str, value: Value) -> (Value, Value) {
    (Value::String(key.into()), value)
}

/// Look up a map value by string key. Tolerates binary-encoded keys.
pub(crate) fn map_get<'a>(map: &'a Value, key: &str) -> Option<&'a Value> {
    let Value::Map(pairs) = map else {
        return None;
    };
    pairs.iter().find_map(|(k, v)| {
        let matches = match k {
            Value::String(s) => s.as_str() == Some(key),
            Value::Binary(bytes) => bytes.as_slice() == key.as_bytes(),
            _ => false,
        };
        matches.then_some(v)
    })
}

/// Non-empty binary field.
pub(crate) fn bin_field(map: &Value, key: &str) -> Option<Vec<u8>> {
    match map_get(map, key) {
        Some(Value::Binary(bytes)) if !bytes.is_empty() => Some(bytes.clone()),
        _ => None,
    }
}

/// String field.
pub(crate) fn str_field(map: &Value, key: &str) -> Option<String> {
    map_get(map, key)
        .and_then(Value::as_str)
        .map(str::to_string)
}

/// Boolean field; absent counts as false.
pub(crate) fn bool_field(map: &Value, key: &str) -> bool {
    map_get(map, key).and_then(Value::as_bool).unwrap_or(false)
}
