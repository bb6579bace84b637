//! Canonical JSON serialization for signing and hashing.
//!
//! Signatures, HMACs, and the model hash all cover the canonical bytes of a
//! payload object: keys sorted lexicographically at every level, no
//! insignificant whitespace, UTF-8, numbers as serde_json renders them
//! (no leading zeros). Envelope files on disk may be formatted any way;
//! verification always re-canonicalizes the parsed payload.

use serde::Serialize;
use serde_json::Value;

use crate::error::CryptoError;

/// Serialize any payload to its canonical byte form.
pub fn to_canonical_bytes<T: Serialize>(payload: &T) -> Result<Vec<u8>, CryptoError> {
    let value = serde_json::to_value(payload)
        .map_err(|e| CryptoError::invalid(format!("payload not serializable: {e}")))?;
    let mut out = Vec::new();
    write_canonical(&value, &mut out)?;
    Ok(out)
}

fn write_canonical(value: &Value, out: &mut Vec<u8>) -> Result<(), CryptoError> {
    match value {
        Value::Object(map) => {
            out.push(b'{');
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort_unstable();
            for (i, key) in keys.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_json_string(key, out);
                out.push(b':');
                write_canonical(&map[key.as_str()], out)?;
            }
            out.push(b'}');
        }
        Value::Array(items) => {
            out.push(b'[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(b',');
                }
                write_canonical(item, out)?;
            }
            out.push(b']');
        }
        scalar => {
            let rendered = serde_json::to_vec(scalar)
                .map_err(|e| CryptoError::invalid(format!("scalar render: {e}")))?;
            out.extend_from_slice(&rendered);
        }
    }
    Ok(())
}

fn write_json_string(s: &str, out: &mut Vec<u8>) {
    // Delegate string escaping to serde_json so canonical bytes match what a
    // parser round-trips.
    let rendered = serde_json::to_vec(s).expect("string serialization is infallible");
    out.extend_from_slice(&rendered);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_keys_sorted_recursively() {
        let value = json!({"b": 1, "a": {"z": true, "y": [2, 1]}});
        let bytes = to_canonical_bytes(&value).unwrap();
        assert_eq!(bytes, br#"{"a":{"y":[2,1],"z":true},"b":1}"#);
    }

    #[test]
    fn test_no_whitespace() {
        let value = json!({"name": "m", "list": [1, 2, 3]});
        let bytes = to_canonical_bytes(&value).unwrap();
        assert!(!bytes.contains(&b' '));
    }

    #[test]
    fn test_canonical_form_is_stable_across_field_order() {
        let a = serde_json::from_str::<Value>(r#"{"x":1,"y":2}"#).unwrap();
        let b = serde_json::from_str::<Value>(r#"{"y":2,"x":1}"#).unwrap();
        assert_eq!(
            to_canonical_bytes(&a).unwrap(),
            to_canonical_bytes(&b).unwrap()
        );
    }

    #[test]
    fn test_string_escaping_matches_serde() {
        let value = json!({"s": "quote \" and \\ backslash\nnewline"});
        let bytes = to_canonical_bytes(&value).unwrap();
        let reparsed: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(reparsed, value);
    }
}
