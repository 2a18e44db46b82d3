//! Configuration model for Stackflow
//!
//! Mirrors the declarative documents: variables, resource groups with
//! sub-resource templates, default tags and outputs.

pub mod group;
pub mod stack;
pub mod variable;

pub use group::{AttrSpec, GroupConfig, ParamSpec, TemplateSpec};
pub use stack::{OutputSpec, StackConfig};
pub use variable::{Validation, VarType, VariableSpec};
