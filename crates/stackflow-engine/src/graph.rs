//! Dependency graph construction
//!
//! Expands the instantiated stack into concrete resource nodes: guarded
//! templates are kept or dropped, repeated templates produce one node
//! per element with `${each.value}` / `${each.index}` substituted, and
//! the binder links cross-node references. The finished graph is
//! validated to be acyclic before any plan is built.

use crate::binder;
use crate::error::{EngineError, Result};
use crate::node::{Attr, NodeId, ResourceNode};
use stackflow_core::catalog::{StackInstance, TemplateInstance};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// The fully expanded, reference-linked resource graph
#[derive(Debug, Clone)]
pub struct ResourceGraph {
    pub nodes: BTreeMap<NodeId, ResourceNode>,
}

impl ResourceGraph {
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: &NodeId) -> Option<&ResourceNode> {
        self.nodes.get(id)
    }
}

/// Build the resource graph for an instantiated stack
pub fn build_graph(stack: &StackInstance) -> Result<ResourceGraph> {
    let mut nodes: BTreeMap<NodeId, ResourceNode> = BTreeMap::new();

    for group in &stack.groups {
        for template in &group.templates {
            if template.when == Some(false) {
                debug!(group = %group.name, template = %template.name, "guard disabled, skipping");
                continue;
            }

            match &template.for_each {
                None => {
                    let id = NodeId::new(group.name.clone(), template.name.clone());
                    let node = materialize(id, template, None)?;
                    nodes.insert(node.id.clone(), node);
                }
                Some(elements) => {
                    let mut seen: BTreeSet<String> = BTreeSet::new();
                    for (position, element) in elements.iter().enumerate() {
                        let index = element_index(element);
                        if !seen.insert(index.clone()) {
                            return Err(EngineError::Reference(format!(
                                "{}.{}: duplicate for-each index '{}'",
                                group.name, template.name, index
                            )));
                        }
                        let id = NodeId::indexed(
                            group.name.clone(),
                            template.name.clone(),
                            index.clone(),
                        );
                        let each = EachContext {
                            value: element,
                            index: &index,
                            position,
                        };
                        let node = materialize(id, template, Some(&each))?;
                        nodes.insert(node.id.clone(), node);
                    }
                }
            }
        }
    }

    binder::classify_and_link(&mut nodes)?;
    detect_cycles(&nodes)?;

    debug!(nodes = nodes.len(), "resource graph built");
    Ok(ResourceGraph { nodes })
}

struct EachContext<'a> {
    value: &'a serde_json::Value,
    index: &'a str,
    position: usize,
}

/// Index key for one for-each element: scalars render as themselves,
/// compound values use their `name` field when present.
fn element_index(element: &serde_json::Value) -> String {
    match element {
        serde_json::Value::Object(map) => match map.get("name") {
            Some(serde_json::Value::String(s)) => s.clone(),
            _ => binder::render_scalar(element),
        },
        other => binder::render_scalar(other),
    }
}

fn materialize(
    id: NodeId,
    template: &TemplateInstance,
    each: Option<&EachContext<'_>>,
) -> Result<ResourceNode> {
    let mut attrs = BTreeMap::new();
    for attr in &template.attrs {
        let value = match each {
            Some(ctx) => substitute_each(&id, &attr.value, ctx)?,
            None => reject_each(&id, &attr.value)?,
        };
        let bound = binder::bind_value(&id, &value)?;
        attrs.insert(
            attr.name.clone(),
            Attr {
                value: bound,
                immutable: attr.immutable,
            },
        );
    }

    Ok(ResourceNode {
        id,
        resource_type: template.resource_type.clone(),
        attrs,
        tags: template.tags.clone(),
        depends_on: BTreeSet::new(),
    })
}

/// Substitute `${each.value}` / `${each.index}` throughout a value
fn substitute_each(
    id: &NodeId,
    value: &serde_json::Value,
    ctx: &EachContext<'_>,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => substitute_each_string(id, s, ctx),
        serde_json::Value::Array(items) => {
            let items = items
                .iter()
                .map(|v| substitute_each(id, v, ctx))
                .collect::<Result<Vec<_>>>()?;
            Ok(serde_json::Value::Array(items))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (k, v) in map {
                out.insert(k.clone(), substitute_each(id, v, ctx)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_each_string(
    id: &NodeId,
    s: &str,
    ctx: &EachContext<'_>,
) -> Result<serde_json::Value> {
    // A whole-string expression keeps the element's type.
    match s.trim() {
        "${each.value}" => return Ok(ctx.value.clone()),
        "${each.index}" => return Ok(serde_json::Value::String(ctx.index.to_string())),
        "${each.position}" => return Ok(serde_json::json!(ctx.position)),
        _ => {}
    }

    let replaced = s
        .replace("${each.value}", &binder::render_scalar(ctx.value))
        .replace("${each.index}", ctx.index)
        .replace("${each.position}", &ctx.position.to_string());

    if replaced.contains("${each.") {
        return Err(EngineError::Reference(format!(
            "{id}: unknown each expression in '{s}'"
        )));
    }

    Ok(serde_json::Value::String(replaced))
}

/// Reject `${each.*}` outside a repeated template
fn reject_each(id: &NodeId, value: &serde_json::Value) -> Result<serde_json::Value> {
    let has_each = match value {
        serde_json::Value::String(s) => s.contains("${each."),
        serde_json::Value::Array(items) => items
            .iter()
            .any(|v| matches!(v, serde_json::Value::String(s) if s.contains("${each."))),
        serde_json::Value::Object(map) => map
            .values()
            .any(|v| matches!(v, serde_json::Value::String(s) if s.contains("${each."))),
        _ => false,
    };
    if has_each {
        return Err(EngineError::Reference(format!(
            "{id}: ${{each.*}} is only valid inside a resource with for-each"
        )));
    }
    Ok(value.clone())
}

/// Depth-first cycle detection; the error names the cycle path
fn detect_cycles(nodes: &BTreeMap<NodeId, ResourceNode>) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        Visiting,
        Done,
    }

    fn visit(
        id: &NodeId,
        nodes: &BTreeMap<NodeId, ResourceNode>,
        marks: &mut BTreeMap<NodeId, Mark>,
        path: &mut Vec<NodeId>,
    ) -> Result<()> {
        match marks.get(id) {
            Some(Mark::Done) => return Ok(()),
            Some(Mark::Visiting) => {
                let start = path.iter().position(|p| p == id).unwrap_or(0);
                let cycle: Vec<String> = path[start..]
                    .iter()
                    .chain(std::iter::once(id))
                    .map(|n| n.to_string())
                    .collect();
                return Err(EngineError::Cycle(cycle.join(" -> ")));
            }
            None => {}
        }

        marks.insert(id.clone(), Mark::Visiting);
        path.push(id.clone());
        if let Some(node) = nodes.get(id) {
            for dep in &node.depends_on {
                visit(dep, nodes, marks, path)?;
            }
        }
        path.pop();
        marks.insert(id.clone(), Mark::Done);
        Ok(())
    }

    let mut marks = BTreeMap::new();
    let mut path = Vec::new();
    for id in nodes.keys() {
        visit(id, nodes, &mut marks, &mut path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use stackflow_core::catalog::{AttrInstance, GroupInstance, TemplateInstance};

    fn template(
        name: &str,
        resource_type: &str,
        attrs: Vec<AttrInstance>,
    ) -> TemplateInstance {
        TemplateInstance {
            name: name.to_string(),
            resource_type: resource_type.to_string(),
            when: None,
            for_each: None,
            attrs,
            tags: BTreeMap::new(),
        }
    }

    fn attr(name: &str, value: serde_json::Value) -> AttrInstance {
        AttrInstance {
            name: name.to_string(),
            value,
            immutable: false,
        }
    }

    fn stack(groups: Vec<GroupInstance>) -> StackInstance {
        StackInstance {
            name: "demo".to_string(),
            groups,
            outputs: Vec::new(),
        }
    }

    #[test]
    fn test_guard_false_drops_node() {
        let mut t = template("cache", "memory_store", vec![]);
        t.when = Some(false);
        let graph = build_graph(&stack(vec![GroupInstance {
            name: "svc".to_string(),
            templates: vec![t],
        }]))
        .unwrap();
        assert!(graph.is_empty());
    }

    #[test]
    fn test_for_each_expands_with_index_substitution() {
        let mut t = template(
            "replica",
            "object_storage",
            vec![attr("name", serde_json::json!("assets-${each.value}"))],
        );
        t.for_each = Some(vec![serde_json::json!("tk1"), serde_json::json!("is1")]);
        let graph = build_graph(&stack(vec![GroupInstance {
            name: "storage".to_string(),
            templates: vec![t],
        }]))
        .unwrap();

        assert_eq!(graph.len(), 2);
        let tk1 = graph
            .get(&NodeId::indexed("storage", "replica", "tk1"))
            .unwrap();
        assert_eq!(
            tk1.declared_attr("name"),
            Some(&serde_json::json!("assets-tk1"))
        );
    }

    #[test]
    fn test_for_each_whole_value_keeps_type() {
        let mut t = template(
            "worker",
            "compute_instance",
            vec![attr("config", serde_json::json!("${each.value}"))],
        );
        t.for_each = Some(vec![serde_json::json!({"name": "a", "cores": 2})]);
        let graph = build_graph(&stack(vec![GroupInstance {
            name: "compute".to_string(),
            templates: vec![t],
        }]))
        .unwrap();

        let node = graph.get(&NodeId::indexed("compute", "worker", "a")).unwrap();
        assert_eq!(
            node.declared_attr("config"),
            Some(&serde_json::json!({"name": "a", "cores": 2}))
        );
    }

    #[test]
    fn test_duplicate_for_each_index_rejected() {
        let mut t = template("replica", "object_storage", vec![]);
        t.for_each = Some(vec![serde_json::json!("tk1"), serde_json::json!("tk1")]);
        let err = build_graph(&stack(vec![GroupInstance {
            name: "storage".to_string(),
            templates: vec![t],
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("duplicate for-each index"));
    }

    #[test]
    fn test_each_outside_for_each_rejected() {
        let t = template(
            "bucket",
            "object_storage",
            vec![attr("name", serde_json::json!("x-${each.value}"))],
        );
        let err = build_graph(&stack(vec![GroupInstance {
            name: "storage".to_string(),
            templates: vec![t],
        }]))
        .unwrap_err();
        assert!(err.to_string().contains("only valid inside"));
    }

    #[test]
    fn test_rebuild_yields_identical_graph() {
        let mut replica = template(
            "replica",
            "object_storage",
            vec![attr("name", serde_json::json!("assets-${each.value}"))],
        );
        replica.for_each = Some(vec![serde_json::json!("tk1"), serde_json::json!("is1")]);
        let table = template(
            "table",
            "kv_table",
            vec![attr(
                "source",
                serde_json::json!("${storage.replica[tk1].endpoint}"),
            )],
        );
        let stack = stack(vec![GroupInstance {
            name: "storage".to_string(),
            templates: vec![replica, table],
        }]);

        let first = build_graph(&stack).unwrap();
        let second = build_graph(&stack).unwrap();

        let shape = |g: &ResourceGraph| -> Vec<(NodeId, Vec<NodeId>)> {
            g.nodes
                .iter()
                .map(|(id, n)| (id.clone(), n.depends_on.iter().cloned().collect()))
                .collect()
        };
        assert_eq!(shape(&first), shape(&second));
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_cycle_detected_with_path() {
        let a = template(
            "a",
            "object_storage",
            vec![attr("link", serde_json::json!("${g.b.out}"))],
        );
        let b = template(
            "b",
            "object_storage",
            vec![attr("link", serde_json::json!("${g.a.out}"))],
        );
        let err = build_graph(&stack(vec![GroupInstance {
            name: "g".to_string(),
            templates: vec![a, b],
        }]))
        .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("cycle"), "unexpected: {msg}");
        assert!(msg.contains("g.a") && msg.contains("g.b"), "unexpected: {msg}");
    }
}
