//! Stack output resolution
//!
//! Outputs are named expressions over applied resources, resolved from
//! recorded state after a run. A whole-string reference keeps the
//! attribute's JSON type; mixed text renders to a string.

use crate::binder;
use crate::error::{EngineError, Result};
use crate::node::{AttrValue, NodeId, Segment};
use crate::state::StateDocument;
use stackflow_core::model::OutputSpec;
use std::collections::BTreeMap;

/// Resolve every declared output against the state document
pub fn resolve_outputs(
    outputs: &[OutputSpec],
    state: &StateDocument,
) -> Result<BTreeMap<String, serde_json::Value>> {
    let mut resolved = BTreeMap::new();
    for spec in outputs {
        resolved.insert(spec.name.clone(), resolve_output(spec, state)?);
    }
    Ok(resolved)
}

/// Resolve a single output expression
pub fn resolve_output(spec: &OutputSpec, state: &StateDocument) -> Result<serde_json::Value> {
    // Outputs live outside any node; errors name the output instead.
    let scratch = NodeId::new("output", spec.name.clone());
    let bound = binder::bind_value(&scratch, &serde_json::Value::String(spec.value.clone()))
        .map_err(|_| {
            EngineError::Reference(format!(
                "output '{}': malformed expression '{}'",
                spec.name, spec.value
            ))
        })?;

    match bound {
        AttrValue::Literal(v) => Ok(v),
        AttrValue::Template(segments) => {
            if let [Segment::Ref(reference)] = segments.as_slice() {
                return state
                    .attribute(&reference.node_id(), &reference.attribute)
                    .ok_or_else(|| {
                        EngineError::Reference(format!(
                            "output '{}': '{}' has not been applied or has no attribute '{}'",
                            spec.name,
                            reference.node_id(),
                            reference.attribute
                        ))
                    });
            }

            let mut out = String::new();
            for segment in &segments {
                match segment {
                    Segment::Text(t) => out.push_str(t),
                    Segment::Ref(reference) => {
                        let value = state
                            .attribute(&reference.node_id(), &reference.attribute)
                            .ok_or_else(|| {
                                EngineError::Reference(format!(
                                    "output '{}': '{}' has not been applied or has no attribute '{}'",
                                    spec.name,
                                    reference.node_id(),
                                    reference.attribute
                                ))
                            })?;
                        out.push_str(&binder::render_scalar(&value));
                    }
                }
            }
            Ok(serde_json::Value::String(out))
        }
    }
}
