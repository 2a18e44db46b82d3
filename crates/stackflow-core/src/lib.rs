//! Stackflow core
//!
//! Declarative configuration for a serverless stack: typed input
//! variables, resource groups with sub-resource templates, default tag
//! sets and outputs. This crate parses the KDL documents, resolves
//! variables and instantiates groups; the dependency graph and the
//! execution engine live in `stackflow-engine`.

pub mod catalog;
pub mod discovery;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod variables;

// Re-exports
pub use catalog::{instantiate, AttrInstance, GroupInstance, StackInstance, TemplateInstance};
pub use discovery::{find_project_root, find_project_root_from, STACK_FILE, VALUES_FILE};
pub use error::{ConfigError, Result};
pub use loader::{load_config, load_stack, load_values_file, LoadOptions};
pub use model::{
    AttrSpec, GroupConfig, OutputSpec, ParamSpec, StackConfig, TemplateSpec, Validation, VarType,
    VariableSpec,
};
pub use variables::{coerce_raw, resolve_variables, VariableSources, Variables, ENV_VAR_PREFIX};
