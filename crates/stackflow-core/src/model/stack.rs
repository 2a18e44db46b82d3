//! Top-level stack configuration

use crate::model::group::GroupConfig;
use crate::model::variable::VariableSpec;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declared output, resolved from applied state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputSpec {
    pub name: String,

    /// Source expression, a single `${group.node.attribute}` reference
    pub value: String,
}

/// The parsed, unresolved stack configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StackConfig {
    pub name: String,

    pub variables: Vec<VariableSpec>,

    /// Process-wide default tags, merged into every node
    pub default_tags: BTreeMap<String, String>,

    pub groups: Vec<GroupConfig>,

    pub outputs: Vec<OutputSpec>,
}

impl StackConfig {
    pub fn variable(&self, name: &str) -> Option<&VariableSpec> {
        self.variables.iter().find(|v| v.name == name)
    }

    pub fn output(&self, name: &str) -> Option<&OutputSpec> {
        self.outputs.iter().find(|o| o.name == name)
    }
}
