//! Canonical JSON encoding and keccak256 digests.
//!
//! Objects are emitted with keys in byte order, recursively. Arrays keep
//! their order. Scalars print exactly as serde_json prints them. No
//! whitespace. The result does not depend on map insertion order or on
//! serde_json's `preserve_order` feature.

use alloy::primitives::{keccak256, B256};
use serde_json::Value;

/// Render `value` in canonical form.
pub fn canonical_json(value: &Value) -> String {
    let mut out = String::new();
    write_canonical(value, &mut out);
    out
}

fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// keccak256 of the canonical UTF-8 encoding.
pub fn digest(value: &Value) -> B256 {
    keccak256(canonical_json(value).as_bytes())
}

/// `digest` as `0x`-prefixed lowercase hex.
pub fn digest_hex(value: &Value) -> String {
    format!("0x{:x}", digest(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "m": null}, "c": [3, {"y": 1, "x": 2}]});
        assert_eq!(
            canonical_json(&value),
            r#"{"a":{"m":null,"z":true},"b":1,"c":[3,{"x":2,"y":1}]}"#
        );
    }

    #[test]
    fn test_insertion_order_does_not_matter() {
        let mut first = serde_json::Map::new();
        first.insert("batchId".into(), json!("B1"));
        first.insert("action".into(), json!("addBatch"));
        let mut second = serde_json::Map::new();
        second.insert("action".into(), json!("addBatch"));
        second.insert("batchId".into(), json!("B1"));

        assert_eq!(
            digest(&Value::Object(first)),
            digest(&Value::Object(second))
        );
    }

    #[test]
    fn test_strings_are_escaped() {
        let value = json!({"note": "line\n\"quoted\""});
        assert_eq!(canonical_json(&value), r#"{"note":"line\n\"quoted\""}"#);
    }

    #[test]
    fn test_digest_hex_format() {
        let hex = digest_hex(&json!({}));
        assert_eq!(hex.len(), 66);
        assert!(hex.starts_with("0x"));
        assert_eq!(hex, format!("0x{:x}", keccak256(b"{}")));
    }

    #[test]
    fn test_different_values_differ() {
        assert_ne!(digest(&json!({"a": 1})), digest(&json!({"a": 2})));
    }
}
