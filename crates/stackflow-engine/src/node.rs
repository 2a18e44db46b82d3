//! Concrete resource nodes and cross-node references

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Unique identity of a concrete resource node
///
/// Formed from the group name, the template name and, for repeated
/// templates, the element index. Ordering is lexicographic, which keeps
/// plans reproducible across runs with identical input.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId {
    pub group: String,
    pub template: String,
    pub index: Option<String>,
}

impl NodeId {
    pub fn new(group: impl Into<String>, template: impl Into<String>) -> Self {
        Self {
            group: group.into(),
            template: template.into(),
            index: None,
        }
    }

    pub fn indexed(
        group: impl Into<String>,
        template: impl Into<String>,
        index: impl Into<String>,
    ) -> Self {
        Self {
            group: group.into(),
            template: template.into(),
            index: Some(index.into()),
        }
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.index {
            Some(index) => write!(f, "{}.{}[{}]", self.group, self.template, index),
            None => write!(f, "{}.{}", self.group, self.template),
        }
    }
}

/// Resolution phase of a cross-node reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RefPhase {
    /// Resolvable at plan time from declared configuration
    Static,
    /// Known only after the referenced node has been applied
    Dynamic,
}

/// A symbolic reference to another node's attribute
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reference {
    pub group: String,
    pub template: String,
    pub index: Option<String>,
    pub attribute: String,
    pub phase: RefPhase,
}

impl Reference {
    pub fn node_id(&self) -> NodeId {
        NodeId {
            group: self.group.clone(),
            template: self.template.clone(),
            index: self.index.clone(),
        }
    }
}

impl std::fmt::Display for Reference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.index {
            Some(index) => write!(
                f,
                "{}.{}[{}].{}",
                self.group, self.template, index, self.attribute
            ),
            None => write!(f, "{}.{}.{}", self.group, self.template, self.attribute),
        }
    }
}

/// One piece of a templated attribute value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Segment {
    Text(String),
    Ref(Reference),
}

/// An attribute value: fully resolved, or a template with pending references
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AttrValue {
    Literal(serde_json::Value),
    Template(Vec<Segment>),
}

impl AttrValue {
    pub fn is_resolved(&self) -> bool {
        matches!(self, AttrValue::Literal(_))
    }

    pub fn references(&self) -> Vec<&Reference> {
        match self {
            AttrValue::Literal(_) => Vec::new(),
            AttrValue::Template(segments) => segments
                .iter()
                .filter_map(|s| match s {
                    Segment::Ref(r) => Some(r),
                    Segment::Text(_) => None,
                })
                .collect(),
        }
    }
}

/// A named attribute on a node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Attr {
    pub value: AttrValue,

    /// Changing an immutable attribute forces replacement
    pub immutable: bool,
}

/// One concrete provisionable unit after template expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceNode {
    pub id: NodeId,

    pub resource_type: String,

    pub attrs: BTreeMap<String, Attr>,

    pub tags: BTreeMap<String, String>,

    /// Nodes whose resolved attributes this node consumes
    pub depends_on: BTreeSet<NodeId>,
}

impl ResourceNode {
    /// The attribute's literal value, if declared and fully resolved
    pub fn declared_attr(&self, name: &str) -> Option<&serde_json::Value> {
        match &self.attrs.get(name)?.value {
            AttrValue::Literal(value) => Some(value),
            AttrValue::Template(_) => None,
        }
    }

    /// All references across all attributes
    pub fn references(&self) -> Vec<&Reference> {
        self.attrs
            .values()
            .flat_map(|a| a.value.references())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_display() {
        assert_eq!(NodeId::new("storage", "bucket").to_string(), "storage.bucket");
        assert_eq!(
            NodeId::indexed("storage", "replica", "tk1").to_string(),
            "storage.replica[tk1]"
        );
    }

    #[test]
    fn test_node_id_ordering_is_lexicographic() {
        let a = NodeId::new("compute", "handler");
        let b = NodeId::new("storage", "bucket");
        let c = NodeId::indexed("storage", "replica", "is1");
        let d = NodeId::indexed("storage", "replica", "tk1");

        let mut ids = vec![d.clone(), b.clone(), a.clone(), c.clone()];
        ids.sort();
        assert_eq!(ids, vec![a, b, c, d]);
    }
}
