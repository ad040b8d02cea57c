//! Binary-preserving JSON
//!
//! JSON cannot carry byte strings directly. Metadata byte fields are tagged
//! as `{"$bytes": "<hex>"}` objects; the helpers here build and recognize
//! the tag so byte identity survives the index round trip. Encoding is
//! canonical (object keys sorted), so equal values always serialize to
//! equal bytes and the index can elide unchanged writes by comparison.

use serde_json::{json, Map, Value};

/// Well-known tag for byte strings inside JSON metadata.
pub const BYTES_TAG: &str = "$bytes";

/// Wrap bytes as a tagged JSON value.
pub fn bytes_value(bytes: &[u8]) -> Value {
    json!({ BYTES_TAG: hex::encode(bytes) })
}

/// Unwrap a tagged JSON value back into bytes.
///
/// Returns `None` when the value is not a `{"$bytes": ...}` object.
pub fn as_bytes(value: &Value) -> Option<Vec<u8>> {
    let object = value.as_object()?;
    if object.len() != 1 {
        return None;
    }
    let encoded = object.get(BYTES_TAG)?.as_str()?;
    hex::decode(encoded).ok()
}

/// True when `value` is a tagged byte string.
pub fn is_bytes(value: &Value) -> bool {
    as_bytes(value).is_some()
}

/// Canonical serialization for comparison and persistence.
pub fn encode(value: &Value) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&sorted(value))
}

/// Decode a persisted value.
pub fn decode(bytes: &[u8]) -> Result<Value, serde_json::Error> {
    serde_json::from_slice(bytes)
}

/// Rebuild a value with object keys in sorted order, recursively.
fn sorted(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut out = Map::new();
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            for key in keys {
                out.insert(key.clone(), sorted(&map[key]));
            }
            Value::Object(out)
        }
        Value::Array(items) => Value::Array(items.iter().map(sorted).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_tag_round_trip() {
        let original = vec![0u8, 1, 2, 254, 255];
        let tagged = bytes_value(&original);
        assert!(is_bytes(&tagged));
        assert_eq!(as_bytes(&tagged), Some(original));
    }

    #[test]
    fn test_plain_objects_not_bytes() {
        assert!(!is_bytes(&json!({"a": 1})));
        assert!(!is_bytes(&json!({"$bytes": "00", "extra": true})));
        assert!(!is_bytes(&json!("00ff")));
    }

    #[test]
    fn test_nested_bytes_survive_encode_decode() {
        let value = json!({
            "topic": "books",
            "token": bytes_value(&[0xde, 0xad, 0xbe, 0xef]),
            "inner": { "blob": bytes_value(&[0x00, 0xff]) },
        });

        let bytes = encode(&value).unwrap();
        let decoded = decode(&bytes).unwrap();
        assert_eq!(
            as_bytes(&decoded["token"]),
            Some(vec![0xde, 0xad, 0xbe, 0xef])
        );
        assert_eq!(as_bytes(&decoded["inner"]["blob"]), Some(vec![0x00, 0xff]));
        assert_eq!(decoded["topic"], json!("books"));
    }

    #[test]
    fn test_encode_is_canonical() {
        let a = serde_json::from_str::<Value>(r#"{"b": 1, "a": {"y": 2, "x": 3}}"#).unwrap();
        let b = serde_json::from_str::<Value>(r#"{"a": {"x": 3, "y": 2}, "b": 1}"#).unwrap();
        assert_eq!(encode(&a).unwrap(), encode(&b).unwrap());
    }
}
