use serde::Serialize;
use serde_json::{Map, Value};

/// Deterministic form of a JSON-like value: object keys sorted lexicographically,
/// recursively; array order preserved. This is the pre-image for both signing
/// (`SignatureUtil`) and any content-hash computed over structured data.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut out = Map::new();
            for (key, val) in entries {
                out.insert(key.clone(), canonicalize(val));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

/// Serializes `value` to JSON and returns the canonical byte representation
/// (keys sorted) ready to hash or sign.
pub fn to_canonical_bytes<T: Serialize>(value: &T) -> serde_json::Result<Vec<u8>> {
    let value = serde_json::to_value(value)?;
    serde_json::to_vec(&canonicalize(&value))
}
