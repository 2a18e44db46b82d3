//! Node configuration fingerprints
//!
//! A fingerprint is a blake3 hash over the canonical JSON form of a
//! node's desired configuration: resource type, attributes and tags.
//! Dynamic references hash as their symbolic form, so a fingerprint
//! changes when the wiring changes, not when a referenced runtime value
//! does. Equal fingerprints mean no drift in declared configuration.

use crate::node::{AttrValue, ResourceNode, Segment};
use serde_json::json;

/// Compute the configuration fingerprint of a node
pub fn fingerprint(node: &ResourceNode) -> String {
    let doc = canonical_config(node);
    let bytes = serde_json::to_vec(&doc).unwrap_or_default();
    blake3::hash(&bytes).to_hex().to_string()
}

/// Canonical JSON snapshot of a node's declared configuration
///
/// serde_json maps preserve BTreeMap ordering, so serialization is
/// stable across runs.
pub fn canonical_config(node: &ResourceNode) -> serde_json::Value {
    let mut attrs = serde_json::Map::new();
    for (name, attr) in &node.attrs {
        attrs.insert(name.clone(), canonical_attr(&attr.value));
    }

    let tags: serde_json::Map<String, serde_json::Value> = node
        .tags
        .iter()
        .map(|(k, v)| (k.clone(), json!(v)))
        .collect();

    json!({
        "type": node.resource_type,
        "attrs": attrs,
        "tags": tags,
    })
}

fn canonical_attr(value: &AttrValue) -> serde_json::Value {
    match value {
        AttrValue::Literal(v) => v.clone(),
        AttrValue::Template(segments) => {
            let rendered: String = segments
                .iter()
                .map(|s| match s {
                    Segment::Text(t) => t.clone(),
                    Segment::Ref(r) => format!("${{{r}}}"),
                })
                .collect();
            json!(rendered)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::binder::bind_value;
    use crate::node::{Attr, NodeId};
    use std::collections::{BTreeMap, BTreeSet};

    fn node(attrs: &[(&str, serde_json::Value)]) -> ResourceNode {
        let id = NodeId::new("storage", "bucket");
        let mut map = BTreeMap::new();
        for (name, value) in attrs {
            map.insert(
                name.to_string(),
                Attr {
                    value: bind_value(&id, value).unwrap(),
                    immutable: false,
                },
            );
        }
        ResourceNode {
            id,
            resource_type: "object_storage".to_string(),
            attrs: map,
            tags: BTreeMap::new(),
            depends_on: BTreeSet::new(),
        }
    }

    #[test]
    fn test_fingerprint_stable_for_identical_config() {
        let a = node(&[("name", json!("assets")), ("versioned", json!(true))]);
        let b = node(&[("versioned", json!(true)), ("name", json!("assets"))]);
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_changes_with_attribute() {
        let a = node(&[("name", json!("assets"))]);
        let b = node(&[("name", json!("archive"))]);
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_dynamic_reference_hashes_symbolically() {
        let a = node(&[("source", json!("${storage.bucket.endpoint}"))]);
        let b = node(&[("source", json!("${storage.bucket.endpoint}"))]);
        assert_eq!(fingerprint(&a), fingerprint(&b));

        let c = node(&[("source", json!("${storage.other.endpoint}"))]);
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }
}
