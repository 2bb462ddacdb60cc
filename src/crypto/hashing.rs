// Canonical hashing of credential records and documents.

use primitive_types::H256;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

// Domain separation so a credential hash can never collide with a document digest.
const CREDENTIAL_DOMAIN: &[u8] = b"SIGNCHAIN/CREDENTIAL/v1";

/// Sorts a JSON object's keys recursively.
/// This is essential for canonical serialization.
fn sort_json_value(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let sorted_map: BTreeMap<String, Value> = map
                .iter()
                .map(|(k, v)| (k.clone(), sort_json_value(v)))
                .collect();
            Value::Object(sorted_map.into_iter().collect())
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_json_value).collect()),
        _ => value.clone(),
    }
}

/// Canonical (key-sorted, compact) JSON text of a value.
pub fn canonical_json(value: &Value) -> String {
    // Display for Value cannot fail: every key is already a string.
    sort_json_value(value).to_string()
}

/// Hashes a credential's issuance record into the 32-byte value notarized on chain.
pub fn hash_credential(material: &Value) -> H256 {
    let mut hasher = Sha256::new();
    hasher.update(CREDENTIAL_DOMAIN);
    hasher.update(canonical_json(material).as_bytes());
    H256::from_slice(&hasher.finalize())
}

/// Plain SHA-256 of raw bytes (uploaded documents, tokens, fingerprint ids).
pub fn sha256(bytes: &[u8]) -> [u8; 32] {
    Sha256::digest(bytes).into()
}

pub fn h256_to_hex(h: &H256) -> String {
    format!("0x{}", hex::encode(h.as_bytes()))
}

pub fn parse_h256_hex(s: &str) -> Result<H256, String> {
    let s = s.trim();
    let s = s.strip_prefix("0x").unwrap_or(s);
    let bytes = hex::decode(s).map_err(|_| "invalid hex".to_string())?;
    if bytes.len() != 32 {
        return Err("expected 32-byte hex string".to_string());
    }
    Ok(H256::from_slice(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn key_order_does_not_change_hash() {
        let a = json!({ "b": 1, "a": { "y": [1, 2], "x": "s" } });
        let b = json!({ "a": { "x": "s", "y": [1, 2] }, "b": 1 });
        assert_eq!(canonical_json(&a), r#"{"a":{"x":"s","y":[1,2]},"b":1}"#);
        assert_eq!(hash_credential(&a), hash_credential(&b));
    }

    #[test]
    fn array_order_matters() {
        assert_ne!(hash_credential(&json!([1, 2])), hash_credential(&json!([2, 1])));
    }

    #[test]
    fn hex_round_trip() {
        let h = hash_credential(&json!({ "id": "x" }));
        let text = h256_to_hex(&h);
        assert!(text.starts_with("0x") && text.len() == 66);
        assert_eq!(parse_h256_hex(&text).unwrap(), h);
        assert!(parse_h256_hex("0x1234").is_err());
    }
}
