//! Canonical JSON and stable hashing.
//!
//! Canonicalization sorts all object keys recursively and emits compact
//! JSON, so two structurally equal values always serialize to the same
//! bytes. Array order is preserved; it is part of the value.

use serde_json::Value;
use sha2::{Digest, Sha256};

/// Canonicalize JSON by sorting all object keys recursively and emitting
/// compact JSON.
pub fn canonical_json(v: &Value) -> String {
    let sorted = sort_keys(v);
    serde_json::to_string(&sorted).expect("json serialization must not fail")
}

/// SHA-256 of a string, hex-encoded.
pub fn hash_str(input: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(input.as_bytes());
    hex::encode(hasher.finalize())
}

/// SHA-256 of a JSON value after canonicalization, hex-encoded.
pub fn hash_value(v: &Value) -> String {
    hash_str(&canonical_json(v))
}

fn sort_keys(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut keys: Vec<_> = map.keys().cloned().collect();
            keys.sort();
            let mut new = serde_json::Map::new();
            for k in keys {
                new.insert(k.clone(), sort_keys(&map[&k]));
            }
            Value::Object(new)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_keys).collect()),
        _ => v.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_canonical_form() {
        let a = json!({"b": 1, "a": {"y": 2, "x": 3}});
        let b = json!({"a": {"x": 3, "y": 2}, "b": 1});
        assert_eq!(canonical_json(&a), canonical_json(&b));
        assert_eq!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn array_order_is_significant() {
        let a = json!([1, 2, 3]);
        let b = json!([3, 2, 1]);
        assert_ne!(hash_value(&a), hash_value(&b));
    }

    #[test]
    fn canonical_form_is_compact() {
        let v = json!({"k": [1, 2], "a": "s"});
        assert_eq!(canonical_json(&v), r#"{"a":"s","k":[1,2]}"#);
    }

    #[test]
    fn hash_is_stable_across_calls() {
        let v = json!({"id": "1", "email": "a@x.io"});
        assert_eq!(hash_value(&v), hash_value(&v.clone()));
    }

    #[test]
    fn distinct_content_distinct_hash() {
        let a = json!({"id": "1"});
        let b = json!({"id": "2"});
        assert_ne!(hash_value(&a), hash_value(&b));
    }
}
