//! Resource group and sub-resource template declarations

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// A declared attribute on a sub-resource template
///
/// The value may be a literal or a string containing `${...}` expressions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttrSpec {
    pub name: String,

    pub value: serde_json::Value,

    /// Changing an immutable attribute forces replacement of the resource
    pub immutable: bool,
}

/// A parameterized node shape inside a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TemplateSpec {
    pub name: String,

    /// Resource type handed to the provisioning backend
    /// (e.g. "object-bucket", "kv-table", "function", "http-gateway")
    pub resource_type: String,

    /// Boolean guard expression; the template expands to zero nodes when false
    pub when: Option<String>,

    /// List expression; the template expands once per element
    pub for_each: Option<String>,

    pub attrs: Vec<AttrSpec>,

    /// Per-template tag overrides, merged over the stack default tags
    pub tags: BTreeMap<String, String>,
}

/// A group-level parameter, possibly derived from variables or earlier params
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ParamSpec {
    pub name: String,

    pub value: serde_json::Value,
}

/// A named, reusable bundle of related resource templates
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GroupConfig {
    pub name: String,

    /// Ordered: later params may reference earlier ones
    pub params: Vec<ParamSpec>,

    pub templates: Vec<TemplateSpec>,
}
