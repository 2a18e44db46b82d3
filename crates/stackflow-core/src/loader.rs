//! Load pipeline
//!
//! Reads the root document, collects variable values from the values
//! file, environment and CLI overrides, resolves variables, and
//! instantiates every resource group.

use crate::catalog::{instantiate, StackInstance};
use crate::discovery::VALUES_FILE;
use crate::error::{ConfigError, Result};
use crate::model::{StackConfig, VarType, VariableSpec};
use crate::parser::{entries_to_json, parse_stack};
use crate::variables::{resolve_variables, VariableSources, Variables};
use kdl::KdlDocument;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{debug, info, instrument};

/// Options supplied by the caller (CLI flags)
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// Explicit values file; defaults to `stack.values.kdl` when present
    pub values_file: Option<std::path::PathBuf>,

    /// `--var name=value` overrides
    pub overrides: BTreeMap<String, String>,
}

/// Parse the root document without resolving anything
#[instrument(skip(project_root), fields(project_root = %project_root.display()))]
pub fn load_config(project_root: &Path) -> Result<StackConfig> {
    let path = project_root.join(crate::discovery::STACK_FILE);
    let content = std::fs::read_to_string(&path).map_err(|e| ConfigError::IoError {
        path: path.clone(),
        message: e.to_string(),
    })?;
    parse_stack(&content)
}

/// Load, resolve and instantiate the full stack
#[instrument(skip(project_root, options), fields(project_root = %project_root.display()))]
pub fn load_stack(
    project_root: &Path,
    options: &LoadOptions,
) -> Result<(StackConfig, StackInstance, Variables)> {
    debug!("Step 1: Parsing root document");
    let config = load_config(project_root)?;

    debug!("Step 2: Collecting variable values");
    let mut sources = VariableSources {
        overrides: options.overrides.clone(),
        env: VariableSources::collect_env(),
        ..Default::default()
    };

    let values_path = options
        .values_file
        .clone()
        .or_else(|| {
            let default = project_root.join(VALUES_FILE);
            default.exists().then_some(default)
        });
    if let Some(path) = values_path {
        sources.file = load_values_file(&path, &config.variables)?;
    }

    debug!("Step 3: Resolving variables");
    let variables = resolve_variables(&config.variables, &sources)?;

    debug!("Step 4: Instantiating groups");
    let instance = instantiate(&config, &variables)?;

    info!(
        stack = %config.name,
        groups = instance.groups.len(),
        variables = variables.len(),
        "Stack loaded"
    );
    Ok((config, instance, variables))
}

/// Parse a values file
///
/// Each top-level node supplies one variable: `environment "prod"`,
/// `replica_regions "tk1" "is1"`. Values for list-typed variables are
/// always collected as lists, even with a single element.
pub fn load_values_file(path: &Path, specs: &[VariableSpec]) -> Result<Variables> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
        path: path.to_path_buf(),
        message: e.to_string(),
    })?;

    let doc: KdlDocument = content.parse()?;
    let mut values = Variables::new();

    for node in doc.nodes() {
        let name = node.name().value().to_string();
        let force_list = specs
            .iter()
            .find(|s| s.name == name)
            .is_some_and(|s| s.ty == VarType::List);
        let value = entries_to_json(node, force_list).ok_or_else(|| {
            ConfigError::Validation {
                variable: name.clone(),
                message: "values file entry has no value".to_string(),
            }
        })?;
        values.insert(name, value);
    }

    debug!(file = %path.display(), count = values.len(), "Loaded values file");
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;

    const STACK: &str = r#"
stack "media-service"

variable "environment" {
    type "string"
    default "dev"
}
variable "replica_regions" {
    type "list"
}

group "storage" {
    param "bucket_prefix" "${var.environment}-media"
    resource "bucket" type="object-bucket" {
        attr "name" "${param.bucket_prefix}-assets"
    }
}
"#;

    #[test]
    fn test_load_stack_with_values_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(temp.path().join("stack.kdl"), STACK).unwrap();
        std::fs::write(
            temp.path().join("stack.values.kdl"),
            "environment \"prod\"\nreplica_regions \"tk1\"\n",
        )
        .unwrap();

        let (_, instance, variables) =
            load_stack(temp.path(), &LoadOptions::default()).unwrap();

        assert_eq!(variables.get("environment"), Some(&serde_json::json!("prod")));
        // single-element list value stays a list
        assert_eq!(
            variables.get("replica_regions"),
            Some(&serde_json::json!(["tk1"]))
        );
        assert_eq!(
            instance.groups[0].templates[0].attrs[0].value,
            serde_json::json!("prod-media-assets")
        );
    }

    #[test]
    fn test_override_beats_values_file() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("stack.kdl"),
            "stack \"s\"\nvariable \"environment\" { type \"string\" }\ngroup \"g\" {}\n",
        )
        .unwrap();
        std::fs::write(temp.path().join("stack.values.kdl"), "environment \"stg\"\n").unwrap();

        let mut options = LoadOptions::default();
        options
            .overrides
            .insert("environment".to_string(), "prod".to_string());

        let (_, _, variables) = load_stack(temp.path(), &options).unwrap();
        assert_eq!(variables.get("environment"), Some(&serde_json::json!("prod")));
    }

    #[test]
    fn test_validation_fails_before_instantiation() {
        let temp = tempfile::tempdir().unwrap();
        std::fs::write(
            temp.path().join("stack.kdl"),
            r#"
stack "s"
variable "environment" {
    type "string"
    validation one-of="dev,prod" message="environment must be dev or prod"
}
group "g" {}
"#,
        )
        .unwrap();

        let mut options = LoadOptions::default();
        options
            .overrides
            .insert("environment".to_string(), "qa".to_string());

        let err = load_stack(temp.path(), &options).unwrap_err();
        assert!(err.to_string().contains("environment must be dev or prod"));
    }
}
