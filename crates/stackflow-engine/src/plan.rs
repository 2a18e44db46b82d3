//! Plan construction
//!
//! Diffs the desired graph against recorded state and schedules the
//! resulting actions: deletes first, in reverse dependency order, then
//! creates and updates in forward dependency levels. Nodes in the same
//! level have no edges between them and may run concurrently.

use crate::error::{EngineError, Result};
use crate::fingerprint;
use crate::graph::ResourceGraph;
use crate::node::{NodeId, RefPhase, ResourceNode};
use crate::state::StateDocument;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// What the executor will do with one node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionType {
    Create,
    Update,
    Replace,
    Delete,
    NoOp,
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ActionType::Create => "create",
            ActionType::Update => "update",
            ActionType::Replace => "replace",
            ActionType::Delete => "delete",
            ActionType::NoOp => "no-op",
        };
        write!(f, "{s}")
    }
}

/// One planned action
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Action {
    pub node_id: NodeId,
    pub action_type: ActionType,
    pub resource_type: String,

    /// Human-readable cause, e.g. which immutable attribute changed
    pub detail: Option<String>,
}

/// Counts per action type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlanSummary {
    pub create: usize,
    pub update: usize,
    pub replace: usize,
    pub delete: usize,
    pub unchanged: usize,
}

impl std::fmt::Display for PlanSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} to create, {} to update, {} to replace, {} to delete, {} unchanged",
            self.create, self.update, self.replace, self.delete, self.unchanged
        )
    }
}

/// The ordered work a single run will perform
#[derive(Debug, Clone)]
pub struct Plan {
    pub actions: Vec<Action>,

    /// Delete levels, dependents before their dependencies
    pub delete_batches: Vec<Vec<NodeId>>,

    /// Create/update/replace levels in forward dependency order
    pub apply_batches: Vec<Vec<NodeId>>,
}

impl Plan {
    pub fn has_changes(&self) -> bool {
        self.actions
            .iter()
            .any(|a| a.action_type != ActionType::NoOp)
    }

    pub fn action_for(&self, id: &NodeId) -> Option<&Action> {
        self.actions.iter().find(|a| &a.node_id == id)
    }

    pub fn summary(&self) -> PlanSummary {
        let mut summary = PlanSummary::default();
        for action in &self.actions {
            match action.action_type {
                ActionType::Create => summary.create += 1,
                ActionType::Update => summary.update += 1,
                ActionType::Replace => summary.replace += 1,
                ActionType::Delete => summary.delete += 1,
                ActionType::NoOp => summary.unchanged += 1,
            }
        }
        summary
    }
}

/// Diff the desired graph against recorded state
pub fn build_plan(graph: &ResourceGraph, state: &StateDocument) -> Result<Plan> {
    let mut kinds: BTreeMap<NodeId, ActionType> = BTreeMap::new();
    let mut details: BTreeMap<NodeId, String> = BTreeMap::new();

    for (id, node) in &graph.nodes {
        let desired = fingerprint::fingerprint(node);
        match state.record(id) {
            None => {
                kinds.insert(id.clone(), ActionType::Create);
            }
            Some(record) if record.fingerprint == desired => {
                kinds.insert(id.clone(), ActionType::NoOp);
            }
            Some(record) => {
                if record.resource_type != node.resource_type {
                    kinds.insert(id.clone(), ActionType::Replace);
                    details.insert(
                        id.clone(),
                        format!(
                            "resource type changed from {} to {}",
                            record.resource_type, node.resource_type
                        ),
                    );
                } else if let Some(attr) = changed_immutable_attr(node, record) {
                    kinds.insert(id.clone(), ActionType::Replace);
                    details.insert(id.clone(), format!("immutable attribute '{attr}' changed"));
                } else {
                    kinds.insert(id.clone(), ActionType::Update);
                }
            }
        }
    }

    // A dynamic reference to a node being created or replaced may yield
    // a new value, so unchanged consumers still need an update.
    propagate_updates(graph, &mut kinds, &mut details);

    // Anything in state with no desired counterpart gets deleted.
    let mut deleted: Vec<NodeId> = Vec::new();
    for key in state.resources.keys() {
        if !graph.nodes.keys().any(|id| &id.to_string() == key) {
            let id = parse_state_key(key)?;
            kinds.insert(id.clone(), ActionType::Delete);
            deleted.push(id);
        }
    }

    let mut actions: Vec<Action> = kinds
        .iter()
        .map(|(id, kind)| Action {
            node_id: id.clone(),
            action_type: *kind,
            resource_type: graph
                .get(id)
                .map(|n| n.resource_type.clone())
                .or_else(|| state.record(id).map(|r| r.resource_type.clone()))
                .unwrap_or_default(),
            detail: details.get(id).cloned(),
        })
        .collect();
    actions.sort_by(|a, b| a.node_id.cmp(&b.node_id));

    let delete_batches = delete_levels(&deleted, state);
    let apply_batches = apply_levels(graph, &kinds)?;

    debug!(
        actions = actions.len(),
        delete_batches = delete_batches.len(),
        apply_batches = apply_batches.len(),
        "plan built"
    );

    Ok(Plan {
        actions,
        delete_batches,
        apply_batches,
    })
}

/// A plan that tears down everything currently in state
pub fn build_destroy_plan(state: &StateDocument) -> Result<Plan> {
    let mut ids = Vec::new();
    let mut actions = Vec::new();
    for (key, record) in &state.resources {
        let id = parse_state_key(key)?;
        actions.push(Action {
            node_id: id.clone(),
            action_type: ActionType::Delete,
            resource_type: record.resource_type.clone(),
            detail: None,
        });
        ids.push(id);
    }

    let delete_batches = delete_levels(&ids, state);
    Ok(Plan {
        actions,
        delete_batches,
        apply_batches: Vec::new(),
    })
}

/// Immutable attribute whose declared value differs from the recorded
/// config snapshot, if any
fn changed_immutable_attr(
    node: &ResourceNode,
    record: &crate::state::StateRecord,
) -> Option<String> {
    let desired = fingerprint::canonical_config(node);
    let desired_attrs = desired.get("attrs")?;
    let recorded_attrs = record.config.get("attrs")?;

    for (name, attr) in &node.attrs {
        if !attr.immutable {
            continue;
        }
        if desired_attrs.get(name) != recorded_attrs.get(name) {
            return Some(name.clone());
        }
    }
    None
}

/// Upgrade NoOp consumers of changing dependencies to Update
fn propagate_updates(
    graph: &ResourceGraph,
    kinds: &mut BTreeMap<NodeId, ActionType>,
    details: &mut BTreeMap<NodeId, String>,
) {
    // Topological order guarantees each dependency is settled first.
    let Ok(order) = topo_order(&graph.nodes) else {
        return;
    };

    for id in order {
        let Some(node) = graph.get(&id) else { continue };
        if kinds.get(&id) != Some(&ActionType::NoOp) {
            continue;
        }

        for reference in node.references() {
            if reference.phase != RefPhase::Dynamic {
                continue;
            }
            let dep = reference.node_id();
            let dep_kind = kinds.get(&dep).copied();
            if matches!(
                dep_kind,
                Some(ActionType::Create) | Some(ActionType::Update) | Some(ActionType::Replace)
            ) {
                kinds.insert(id.clone(), ActionType::Update);
                details.insert(id.clone(), format!("dependency {dep} is changing"));
                break;
            }
        }
    }
}

/// Kahn's algorithm over the node set, deterministic by node id
fn topo_order(nodes: &BTreeMap<NodeId, ResourceNode>) -> Result<Vec<NodeId>> {
    let mut indegree: BTreeMap<&NodeId, usize> = nodes.keys().map(|id| (id, 0)).collect();
    for node in nodes.values() {
        for dep in &node.depends_on {
            if nodes.contains_key(dep) {
                if let Some(count) = indegree.get_mut(&node.id) {
                    *count += 1;
                }
            }
        }
    }

    let mut ready: Vec<&NodeId> = indegree
        .iter()
        .filter(|(_, c)| **c == 0)
        .map(|(id, _)| *id)
        .collect();
    let mut order = Vec::with_capacity(nodes.len());

    while let Some(id) = ready.pop() {
        order.push(id.clone());
        for (other_id, other) in nodes {
            if other.depends_on.contains(id) {
                if let Some(count) = indegree.get_mut(other_id) {
                    *count -= 1;
                    if *count == 0 {
                        ready.push(other_id);
                        ready.sort();
                        ready.reverse();
                    }
                }
            }
        }
    }

    if order.len() != nodes.len() {
        return Err(EngineError::Cycle(
            "dependency cycle prevented ordering".to_string(),
        ));
    }
    Ok(order)
}

/// Forward dependency levels for all non-NoOp graph nodes
///
/// Edges into NoOp or absent nodes count as satisfied.
fn apply_levels(
    graph: &ResourceGraph,
    kinds: &BTreeMap<NodeId, ActionType>,
) -> Result<Vec<Vec<NodeId>>> {
    let active: BTreeSet<&NodeId> = graph
        .nodes
        .keys()
        .filter(|id| {
            matches!(
                kinds.get(*id),
                Some(ActionType::Create) | Some(ActionType::Update) | Some(ActionType::Replace)
            )
        })
        .collect();

    let mut remaining: BTreeMap<&NodeId, BTreeSet<&NodeId>> = BTreeMap::new();
    for id in &active {
        let deps: BTreeSet<&NodeId> = graph.nodes[*id]
            .depends_on
            .iter()
            .filter(|dep| active.contains(dep))
            .collect();
        remaining.insert(id, deps);
    }

    let mut levels: Vec<Vec<NodeId>> = Vec::new();
    while !remaining.is_empty() {
        let level: Vec<NodeId> = remaining
            .iter()
            .filter(|(_, deps)| deps.is_empty())
            .map(|(id, _)| (*id).clone())
            .collect();
        if level.is_empty() {
            return Err(EngineError::Cycle(
                "dependency cycle prevented scheduling".to_string(),
            ));
        }
        for id in &level {
            remaining.remove(id);
        }
        for deps in remaining.values_mut() {
            deps.retain(|dep| !level.contains(dep));
        }
        levels.push(level);
    }
    Ok(levels)
}

/// Reverse dependency levels over deleted nodes, from recorded edges
fn delete_levels(deleted: &[NodeId], state: &StateDocument) -> Vec<Vec<NodeId>> {
    let deleted_set: BTreeSet<&NodeId> = deleted.iter().collect();

    // dependents[x] = deleted nodes that recorded a dependency on x
    let mut dependents: BTreeMap<&NodeId, BTreeSet<&NodeId>> = BTreeMap::new();
    for id in deleted {
        dependents.insert(id, BTreeSet::new());
    }
    for id in deleted {
        if let Some(record) = state.record(id) {
            for dep_key in &record.depends_on {
                if let Some(dep) = deleted.iter().find(|d| &d.to_string() == dep_key) {
                    if deleted_set.contains(dep) {
                        if let Some(set) = dependents.get_mut(dep) {
                            set.insert(id);
                        }
                    }
                }
            }
        }
    }

    let mut remaining = dependents;
    let mut levels: Vec<Vec<NodeId>> = Vec::new();
    while !remaining.is_empty() {
        let mut level: Vec<NodeId> = remaining
            .iter()
            .filter(|(_, dependents)| dependents.iter().all(|d| !remaining.contains_key(*d)))
            .map(|(id, _)| (*id).clone())
            .collect();
        if level.is_empty() {
            // Recorded edges form a cycle; fall back to a flat batch.
            level = remaining.keys().map(|id| (*id).clone()).collect();
        }
        level.sort();
        for id in &level {
            remaining.remove(id);
        }
        levels.push(level);
    }
    levels
}

/// Parse a `group.template` or `group.template[index]` state key
pub(crate) fn parse_state_key(key: &str) -> Result<NodeId> {
    let (prefix, index) = match key.find('[') {
        Some(open) => {
            let close = key.rfind(']').ok_or_else(|| {
                EngineError::State(format!("malformed state key '{key}'"))
            })?;
            (&key[..open], Some(key[open + 1..close].to_string()))
        }
        None => (key, None),
    };

    let (group, template) = prefix.split_once('.').ok_or_else(|| {
        EngineError::State(format!("malformed state key '{key}'"))
    })?;
    Ok(NodeId {
        group: group.to_string(),
        template: template.to_string(),
        index,
    })
}
