//! Reference binder
//!
//! Scans attribute values for `${group.node.attribute}` expressions and
//! turns them into typed references. Classification into static vs
//! dynamic happens once the full node set is known: a reference to an
//! attribute declared as a literal on its target is static and can be
//! inlined at plan time; everything else is dynamic and is substituted
//! by the executor after the dependency has been applied.

use crate::error::{EngineError, Result};
use crate::node::{AttrValue, NodeId, RefPhase, Reference, ResourceNode, Segment};
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;

/// Any `${...}` expression; used to reject malformed leftovers
static EXPR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\{[^}]*\}").expect("expression regex is valid"));

/// A well-formed cross-node reference:
/// `${group.node.attribute}` or `${group.node[index].attribute}`
static REF_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"^\$\{\s*([A-Za-z0-9_-]+)\.([A-Za-z0-9_-]+)(?:\[([^\]]+)\])?\.([A-Za-z0-9_-]+)\s*\}$",
    )
    .expect("reference regex is valid")
});

/// Parse a string that must be exactly one reference (output expressions)
pub fn parse_single_reference(expr: &str) -> Result<Reference> {
    let caps = REF_RE.captures(expr.trim()).ok_or_else(|| {
        EngineError::Reference(format!(
            "'{expr}' is not a reference of the form ${{group.node.attribute}}"
        ))
    })?;
    Ok(Reference {
        group: caps[1].to_string(),
        template: caps[2].to_string(),
        index: caps.get(3).map(|m| m.as_str().to_string()),
        attribute: caps[4].to_string(),
        phase: RefPhase::Dynamic,
    })
}

/// Bind one attribute value, splitting strings into text/reference segments
///
/// References are only supported in scalar string values; a `${...}`
/// inside a list or map element is reported as an error naming the node.
pub fn bind_value(node_id: &NodeId, value: &serde_json::Value) -> Result<AttrValue> {
    match value {
        serde_json::Value::String(s) => bind_string(node_id, s),
        serde_json::Value::Array(_) | serde_json::Value::Object(_) => {
            if contains_expression(value) {
                return Err(EngineError::Reference(format!(
                    "{node_id}: references inside list or map attributes are not supported"
                )));
            }
            Ok(AttrValue::Literal(value.clone()))
        }
        other => Ok(AttrValue::Literal(other.clone())),
    }
}

fn bind_string(node_id: &NodeId, s: &str) -> Result<AttrValue> {
    if !s.contains("${") {
        return Ok(AttrValue::Literal(serde_json::Value::String(s.to_string())));
    }

    let mut segments = Vec::new();
    let mut last = 0;
    for m in EXPR_RE.find_iter(s) {
        if m.start() > last {
            segments.push(Segment::Text(s[last..m.start()].to_string()));
        }
        let reference = parse_single_reference(m.as_str()).map_err(|_| {
            EngineError::Reference(format!(
                "{node_id}: malformed or unresolvable expression '{}'",
                m.as_str()
            ))
        })?;
        segments.push(Segment::Ref(reference));
        last = m.end();
    }
    if last < s.len() {
        segments.push(Segment::Text(s[last..].to_string()));
    }

    Ok(AttrValue::Template(segments))
}

fn contains_expression(value: &serde_json::Value) -> bool {
    match value {
        serde_json::Value::String(s) => s.contains("${"),
        serde_json::Value::Array(items) => items.iter().any(contains_expression),
        serde_json::Value::Object(map) => map.values().any(contains_expression),
        _ => false,
    }
}

/// Classify every reference and attach dependency edges
///
/// Runs after template expansion, against the complete node set.
/// Unknown targets are static reference errors; references to a
/// repeated family without an index are rejected. Static references are
/// inlined so fingerprints change when the referenced declaration does.
pub fn classify_and_link(nodes: &mut BTreeMap<NodeId, ResourceNode>) -> Result<()> {
    // Pass 1: snapshot of literally declared attribute values.
    let mut declared: BTreeMap<NodeId, BTreeMap<String, serde_json::Value>> = BTreeMap::new();
    for (id, node) in nodes.iter() {
        let literals: BTreeMap<String, serde_json::Value> = node
            .attrs
            .iter()
            .filter_map(|(name, attr)| match &attr.value {
                AttrValue::Literal(v) => Some((name.clone(), v.clone())),
                AttrValue::Template(_) => None,
            })
            .collect();
        declared.insert(id.clone(), literals);
    }

    let ids: Vec<NodeId> = nodes.keys().cloned().collect();

    // Pass 2: resolve targets, classify phases, inline static values.
    for id in &ids {
        let Some(node) = nodes.get(id) else { continue };
        let mut rebound: Vec<(String, AttrValue)> = Vec::new();
        let mut edges: Vec<NodeId> = Vec::new();

        for (attr_name, attr) in &node.attrs {
            let AttrValue::Template(segments) = &attr.value else {
                continue;
            };

            let mut new_segments = Vec::with_capacity(segments.len());
            for segment in segments {
                match segment {
                    Segment::Text(t) => new_segments.push(Segment::Text(t.clone())),
                    Segment::Ref(reference) => {
                        let target = resolve_target(id, reference, &ids)?;
                        edges.push(target.clone());

                        let is_static = declared
                            .get(&target)
                            .is_some_and(|m| m.contains_key(&reference.attribute));
                        let phase = if is_static {
                            RefPhase::Static
                        } else {
                            RefPhase::Dynamic
                        };
                        new_segments.push(Segment::Ref(Reference {
                            phase,
                            ..reference.clone()
                        }));
                    }
                }
            }

            rebound.push((attr_name.clone(), AttrValue::Template(new_segments)));
        }

        let Some(node) = nodes.get_mut(id) else { continue };
        for (attr_name, value) in rebound {
            // Collapse templates whose references are all static.
            let collapsed = inline_statics(value, &declared);
            if let Some(attr) = node.attrs.get_mut(&attr_name) {
                attr.value = collapsed;
            }
        }
        for edge in edges {
            if edge != *id {
                node.depends_on.insert(edge);
            }
        }
    }

    Ok(())
}

fn resolve_target(from: &NodeId, reference: &Reference, ids: &[NodeId]) -> Result<NodeId> {
    let target = reference.node_id();
    if ids.contains(&target) {
        return Ok(target);
    }

    // A reference without an index may be pointing at a repeated family.
    if reference.index.is_none()
        && ids
            .iter()
            .any(|id| id.group == target.group && id.template == target.template)
    {
        return Err(EngineError::Reference(format!(
            "{from}: reference '{reference}' targets a repeated resource; an index is required"
        )));
    }

    Err(EngineError::Reference(format!(
        "{from}: reference '{reference}' does not match any declared resource"
    )))
}

/// Replace static references with their declared literal values; collapse
/// to a literal when no dynamic reference remains.
fn inline_statics(
    value: AttrValue,
    declared: &BTreeMap<NodeId, BTreeMap<String, serde_json::Value>>,
) -> AttrValue {
    let AttrValue::Template(segments) = value else {
        return value;
    };

    // A whole-value static reference keeps the referenced value's type.
    if let [Segment::Ref(reference)] = segments.as_slice() {
        if reference.phase == RefPhase::Static {
            if let Some(v) = declared
                .get(&reference.node_id())
                .and_then(|m| m.get(&reference.attribute))
            {
                return AttrValue::Literal(v.clone());
            }
        }
        return AttrValue::Template(segments);
    }

    let mut out = Vec::with_capacity(segments.len());
    let mut any_dynamic = false;
    for segment in segments {
        match segment {
            Segment::Ref(reference) if reference.phase == RefPhase::Static => {
                let text = declared
                    .get(&reference.node_id())
                    .and_then(|m| m.get(&reference.attribute))
                    .map(render_scalar)
                    .unwrap_or_default();
                out.push(Segment::Text(text));
            }
            Segment::Ref(reference) => {
                any_dynamic = true;
                out.push(Segment::Ref(reference));
            }
            text => out.push(text),
        }
    }

    if any_dynamic {
        AttrValue::Template(out)
    } else {
        let joined: String = out
            .iter()
            .map(|s| match s {
                Segment::Text(t) => t.as_str(),
                Segment::Ref(_) => "",
            })
            .collect();
        AttrValue::Literal(serde_json::Value::String(joined))
    }
}

/// Render a value for embedding inside a string
pub(crate) fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
