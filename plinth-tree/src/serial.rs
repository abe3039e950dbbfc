//! Authenticated tree serialization.
//!
//! A subtree is encoded as canonical JSON (`{"children": [...], "data": ...,
//! "name": ...}` with object keys sorted and children in sibling order) and
//! wrapped in an envelope `{"data": <encoded string>, "hash": <hex HMAC>}`.
//! The HMAC covers the encoded string byte-for-byte, so any mutation of the
//! payload fails verification. An empty key selects explicit no-integrity
//! mode: the hash field is empty on the way out and ignored on the way in.
//!
//! Verification happens before any of the payload is interpreted, and the
//! comparison is constant-time (`Mac::verify_slice`).

use hmac::{Hmac, Mac};
use serde_json::{Map, Value};
use sha2::{Sha256, Sha512};

use plinth_core::{canonical_json, TreeError};

use crate::tree::{NodeId, Tree};

/// HMAC hash function for the serialization envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HashAlgorithm {
    Sha256,
    Sha512,
}

/// Serialize the subtree at `node` into an authenticated envelope.
///
/// An empty `key` produces an empty hash (no-integrity mode).
pub fn serialize(
    tree: &Tree,
    node: NodeId,
    key: &[u8],
    algorithm: HashAlgorithm,
) -> Result<String, TreeError> {
    let encoded = canonical_json(&encode_node(tree, node)?);
    let hash = if key.is_empty() {
        String::new()
    } else {
        sign(encoded.as_bytes(), key, algorithm)?
    };

    let mut envelope = Map::new();
    envelope.insert("data".to_string(), Value::String(encoded));
    envelope.insert("hash".to_string(), Value::String(hash));
    Ok(canonical_json(&Value::Object(envelope)))
}

/// Verify an envelope and decode it into a fresh tree.
///
/// The decoded root is unattached and keeps its encoded name. A hash
/// mismatch is [`TreeError::IntegrityFailure`]; anything structurally wrong
/// with the envelope or the encoded node graph is
/// [`TreeError::MalformedEnvelope`].
pub fn deserialize(
    envelope: &str,
    key: &[u8],
    algorithm: HashAlgorithm,
) -> Result<Tree, TreeError> {
    let parsed: Value = serde_json::from_str(envelope).map_err(|e| TreeError::MalformedEnvelope {
        reason: e.to_string(),
    })?;
    let fields = parsed
        .as_object()
        .ok_or_else(|| TreeError::MalformedEnvelope {
            reason: "envelope is not an object".to_string(),
        })?;
    let data = fields
        .get("data")
        .and_then(Value::as_str)
        .ok_or_else(|| TreeError::MalformedEnvelope {
            reason: "missing data field".to_string(),
        })?;
    let hash = fields
        .get("hash")
        .and_then(Value::as_str)
        .ok_or_else(|| TreeError::MalformedEnvelope {
            reason: "missing hash field".to_string(),
        })?;

    if !key.is_empty() {
        verify(data.as_bytes(), hash, key, algorithm)?;
    }

    let root = serde_json::from_str(data).map_err(|e| TreeError::MalformedEnvelope {
        reason: e.to_string(),
    })?;
    decode_tree(&root)
}

// ============================================================================
// Encoding
// ============================================================================

fn encode_node(tree: &Tree, node: NodeId) -> Result<Value, TreeError> {
    let n = tree.node(node)?;
    let mut children = Vec::with_capacity(n.children().len());
    for &child in n.children() {
        children.push(encode_node(tree, child)?);
    }

    let mut encoded = Map::new();
    encoded.insert("name".to_string(), Value::String(n.name().to_string()));
    encoded.insert("data".to_string(), n.data().clone());
    encoded.insert("children".to_string(), Value::Array(children));
    Ok(Value::Object(encoded))
}

fn decode_tree(root: &Value) -> Result<Tree, TreeError> {
    let (name, data, children) = decode_fields(root)?;
    let mut tree = Tree::with_root(name.to_string(), data.clone());
    let root_id = tree.root();
    for child in children {
        decode_into(&mut tree, root_id, child)?;
    }
    Ok(tree)
}

fn decode_into(tree: &mut Tree, parent: NodeId, encoded: &Value) -> Result<(), TreeError> {
    let (name, data, children) = decode_fields(encoded)?;
    let id = tree
        .create_child(parent, name, data.clone(), false)
        .map_err(|e| TreeError::MalformedEnvelope {
            reason: e.to_string(),
        })?;
    for child in children {
        decode_into(tree, id, child)?;
    }
    Ok(())
}

fn decode_fields(encoded: &Value) -> Result<(&str, &Value, &Vec<Value>), TreeError> {
    let fields = encoded
        .as_object()
        .ok_or_else(|| TreeError::MalformedEnvelope {
            reason: "node is not an object".to_string(),
        })?;
    let name = fields
        .get("name")
        .and_then(Value::as_str)
        .ok_or_else(|| TreeError::MalformedEnvelope {
            reason: "node has no name".to_string(),
        })?;
    let data = fields.get("data").ok_or_else(|| TreeError::MalformedEnvelope {
        reason: "node has no data".to_string(),
    })?;
    let children = match fields.get("children") {
        Some(Value::Array(children)) => children,
        _ => {
            return Err(TreeError::MalformedEnvelope {
                reason: "node has no children array".to_string(),
            })
        }
    };
    Ok((name, data, children))
}

// ============================================================================
// Authentication
// ============================================================================

fn sign(bytes: &[u8], key: &[u8], algorithm: HashAlgorithm) -> Result<String, TreeError> {
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut mac =
                Hmac::<Sha256>::new_from_slice(key).map_err(|e| TreeError::IntegrityFailure {
                    reason: e.to_string(),
                })?;
            mac.update(bytes);
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
        HashAlgorithm::Sha512 => {
            let mut mac =
                Hmac::<Sha512>::new_from_slice(key).map_err(|e| TreeError::IntegrityFailure {
                    reason: e.to_string(),
                })?;
            mac.update(bytes);
            Ok(hex::encode(mac.finalize().into_bytes()))
        }
    }
}

fn verify(bytes: &[u8], hash: &str, key: &[u8], algorithm: HashAlgorithm) -> Result<(), TreeError> {
    let digest = hex::decode(hash).map_err(|_| TreeError::IntegrityFailure {
        reason: "hash is not valid hex".to_string(),
    })?;
    let mismatch = || TreeError::IntegrityFailure {
        reason: "hash mismatch".to_string(),
    };
    match algorithm {
        HashAlgorithm::Sha256 => {
            let mut mac = Hmac::<Sha256>::new_from_slice(key).map_err(|_| mismatch())?;
            mac.update(bytes);
            mac.verify_slice(&digest).map_err(|_| mismatch())
        }
        HashAlgorithm::Sha512 => {
            let mut mac = Hmac::<Sha512>::new_from_slice(key).map_err(|_| mismatch())?;
            mac.update(bytes);
            mac.verify_slice(&digest).map_err(|_| mismatch())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const KEY: &[u8] = b"test-signing-key";

    fn sample_tree() -> Tree {
        let mut tree = Tree::new();
        let root = tree.root();
        let x = tree.create_child(root, "x", json!({"kind": "dir"}), false).unwrap();
        tree.create_child(x, "x1", json!(1), false).unwrap();
        tree.create_child(x, "x2", json!([1, 2, 3]), false).unwrap();
        tree.create_child(root, "y", Value::Null, false).unwrap();
        tree
    }

    fn shape(tree: &Tree) -> Vec<(String, Value)> {
        tree.iter(tree.root())
            .map(|id| {
                (
                    tree.path_of(id).unwrap(),
                    tree.data_of(id).unwrap().clone(),
                )
            })
            .collect()
    }

    #[test]
    fn test_roundtrip_sha256() {
        let tree = sample_tree();
        let envelope = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha256).unwrap();
        let decoded = deserialize(&envelope, KEY, HashAlgorithm::Sha256).unwrap();

        assert_eq!(shape(&tree), shape(&decoded));
        assert_eq!(decoded.name_of(decoded.root()).unwrap(), "");
        assert_eq!(decoded.parent_of(decoded.root()).unwrap(), None);
    }

    #[test]
    fn test_roundtrip_sha512() {
        let tree = sample_tree();
        let envelope = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha512).unwrap();
        let decoded = deserialize(&envelope, KEY, HashAlgorithm::Sha512).unwrap();
        assert_eq!(shape(&tree), shape(&decoded));
    }

    #[test]
    fn test_subtree_root_keeps_its_name() {
        let tree = sample_tree();
        let x = tree.find_by_path(tree.root(), "/x").unwrap();
        let envelope = serialize(&tree, x, KEY, HashAlgorithm::Sha256).unwrap();
        let decoded = deserialize(&envelope, KEY, HashAlgorithm::Sha256).unwrap();

        assert_eq!(decoded.name_of(decoded.root()).unwrap(), "x");
        assert_eq!(decoded.children_of(decoded.root()).unwrap().len(), 2);
    }

    #[test]
    fn test_tampered_payload_fails_verification() {
        let tree = sample_tree();
        let envelope = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha256).unwrap();

        let mut parsed: Value = serde_json::from_str(&envelope).unwrap();
        let data = parsed["data"].as_str().unwrap().replace("x1", "xx");
        parsed["data"] = Value::String(data);
        let tampered = parsed.to_string();

        let err = deserialize(&tampered, KEY, HashAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, TreeError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_wrong_key_fails_verification() {
        let tree = sample_tree();
        let envelope = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha256).unwrap();
        let err = deserialize(&envelope, b"other-key", HashAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, TreeError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_algorithm_mismatch_fails_verification() {
        let tree = sample_tree();
        let envelope = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha256).unwrap();
        let err = deserialize(&envelope, KEY, HashAlgorithm::Sha512).unwrap_err();
        assert!(matches!(err, TreeError::IntegrityFailure { .. }));
    }

    #[test]
    fn test_empty_key_skips_integrity() {
        let tree = sample_tree();
        let envelope = serialize(&tree, tree.root(), b"", HashAlgorithm::Sha256).unwrap();

        let parsed: Value = serde_json::from_str(&envelope).unwrap();
        assert_eq!(parsed["hash"], json!(""));

        // decodes fine, even after tampering
        let mut tampered: Value = parsed.clone();
        let data = tampered["data"].as_str().unwrap().replace("x1", "xx");
        tampered["data"] = Value::String(data);
        let decoded =
            deserialize(&tampered.to_string(), b"", HashAlgorithm::Sha256).unwrap();
        assert!(decoded.find_by_path(decoded.root(), "/x/xx").is_some());
    }

    #[test]
    fn test_malformed_envelopes() {
        for bad in [
            "not json at all",
            "[1, 2, 3]",
            r#"{"hash": "aa"}"#,
            r#"{"data": "{}"}"#,
            r#"{"data": 7, "hash": "aa"}"#,
        ] {
            let err = deserialize(bad, b"", HashAlgorithm::Sha256).unwrap_err();
            assert!(
                matches!(err, TreeError::MalformedEnvelope { .. }),
                "expected MalformedEnvelope for {bad:?}, got {err:?}"
            );
        }
    }

    #[test]
    fn test_malformed_node_graph() {
        // valid envelope, garbage node encoding
        let envelope = canonical_json(&json!({
            "data": "{\"name\": \"x\"}",
            "hash": "",
        }));
        let err = deserialize(&envelope, b"", HashAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, TreeError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_duplicate_sibling_names_rejected() {
        let encoded = canonical_json(&json!({
            "name": "",
            "data": null,
            "children": [
                {"name": "a", "data": 1, "children": []},
                {"name": "a", "data": 2, "children": []}
            ],
        }));
        let envelope = canonical_json(&json!({"data": encoded, "hash": ""}));
        let err = deserialize(&envelope, b"", HashAlgorithm::Sha256).unwrap_err();
        assert!(matches!(err, TreeError::MalformedEnvelope { .. }));
    }

    #[test]
    fn test_envelope_is_deterministic() {
        let tree = sample_tree();
        let first = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha256).unwrap();
        let second = serialize(&tree, tree.root(), KEY, HashAlgorithm::Sha256).unwrap();
        assert_eq!(first, second);
    }
}
