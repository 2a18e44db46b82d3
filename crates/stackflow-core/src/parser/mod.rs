//! KDL parsing for stack configuration documents

mod group;
mod variable;

pub use group::parse_group;
pub use variable::parse_variable;

use crate::error::{ConfigError, Result};
use crate::model::{OutputSpec, StackConfig};
use kdl::{KdlDocument, KdlNode, KdlValue};
use std::collections::BTreeMap;

/// Parse a full stack configuration document
pub fn parse_stack(content: &str) -> Result<StackConfig> {
    let doc: KdlDocument = content.parse()?;
    let mut config = StackConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "stack" => {
                config.name = require_first_string(node, "stack requires a name")?;
            }
            "variable" => {
                let spec = parse_variable(node)?;
                if config.variable(&spec.name).is_some() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "variable '{}' is declared more than once",
                        spec.name
                    )));
                }
                config.variables.push(spec);
            }
            "tags" => {
                config.default_tags = parse_tags(node);
            }
            "group" => {
                let group = parse_group(node)?;
                if config.groups.iter().any(|g| g.name == group.name) {
                    return Err(ConfigError::InvalidConfig(format!(
                        "group '{}' is declared more than once",
                        group.name
                    )));
                }
                config.groups.push(group);
            }
            "output" => {
                let output = parse_output(node)?;
                if config.output(&output.name).is_some() {
                    return Err(ConfigError::InvalidConfig(format!(
                        "output '{}' is declared more than once",
                        output.name
                    )));
                }
                config.outputs.push(output);
            }
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "unknown top-level node '{other}'"
                )));
            }
        }
    }

    if config.name.is_empty() {
        return Err(ConfigError::InvalidConfig(
            "missing 'stack' declaration".to_string(),
        ));
    }

    Ok(config)
}

/// Parse an output node: `output "name" "${group.node.attribute}"`
fn parse_output(node: &KdlNode) -> Result<OutputSpec> {
    let name = require_first_string(node, "output requires a name")?;
    let value = node
        .entries()
        .get(1)
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| {
            ConfigError::InvalidConfig(format!("output '{name}' requires a source expression"))
        })?
        .to_string();

    Ok(OutputSpec { name, value })
}

/// Parse a `tags { key "value" }` block
pub(crate) fn parse_tags(node: &KdlNode) -> BTreeMap<String, String> {
    let mut tags = BTreeMap::new();
    if let Some(children) = node.children() {
        for tag_node in children.nodes() {
            let key = tag_node.name().value().to_string();
            if let Some(value) = tag_node.entries().first().and_then(|e| e.value().as_string()) {
                tags.insert(key, value.to_string());
            }
        }
    }
    tags
}

/// First positional entry as a string, or an error with the given message
pub(crate) fn require_first_string(node: &KdlNode, message: &str) -> Result<String> {
    node.entries()
        .first()
        .and_then(|e| e.value().as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| ConfigError::InvalidConfig(message.to_string()))
}

/// Convert a KDL value to a JSON value
pub(crate) fn kdl_value_to_json(value: &KdlValue) -> serde_json::Value {
    if let Some(s) = value.as_string() {
        serde_json::Value::String(s.to_string())
    } else if let Some(i) = value.as_integer() {
        serde_json::Value::Number((i as i64).into())
    } else if let Some(f) = value.as_float() {
        serde_json::Number::from_f64(f)
            .map(serde_json::Value::Number)
            .unwrap_or(serde_json::Value::Null)
    } else if let Some(b) = value.as_bool() {
        serde_json::Value::Bool(b)
    } else {
        serde_json::Value::Null
    }
}

/// Collect a node's positional entries into a JSON value
///
/// A single entry becomes a scalar unless `force_list`; multiple entries
/// become an array; a children block becomes a string map.
pub(crate) fn entries_to_json(node: &KdlNode, force_list: bool) -> Option<serde_json::Value> {
    if let Some(children) = node.children() {
        let mut map = serde_json::Map::new();
        for child in children.nodes() {
            let key = child.name().value().to_string();
            let value = child
                .entries()
                .first()
                .map(|e| kdl_value_to_json(e.value()))
                .unwrap_or(serde_json::Value::Null);
            map.insert(key, value);
        }
        return Some(serde_json::Value::Object(map));
    }

    let positional: Vec<serde_json::Value> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .map(|e| kdl_value_to_json(e.value()))
        .collect();

    match positional.len() {
        0 => None,
        1 if !force_list => Some(positional.into_iter().next().unwrap()),
        _ => Some(serde_json::Value::Array(positional)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_minimal_stack() {
        let kdl = r#"
            stack "media-service"

            group "storage" {
                resource "bucket" type="object-bucket" {
                    attr "name" "assets"
                }
            }
        "#;

        let config = parse_stack(kdl).unwrap();
        assert_eq!(config.name, "media-service");
        assert_eq!(config.groups.len(), 1);
        assert_eq!(config.groups[0].templates.len(), 1);
    }

    #[test]
    fn test_parse_stack_with_tags_and_outputs() {
        let kdl = r#"
            stack "media-service"

            tags {
                project "media-service"
                managed-by "stackflow"
            }

            group "compute" {
                resource "handler" type="function" {
                    attr "code_digest" "sha256:abc"
                }
            }

            output "compute_identity" "${compute.handler.id}"
        "#;

        let config = parse_stack(kdl).unwrap();
        assert_eq!(config.default_tags.len(), 2);
        assert_eq!(
            config.default_tags.get("managed-by"),
            Some(&"stackflow".to_string())
        );
        assert_eq!(config.outputs.len(), 1);
        assert_eq!(config.outputs[0].value, "${compute.handler.id}");
    }

    #[test]
    fn test_missing_stack_declaration() {
        let kdl = r#"
            group "storage" {
                resource "bucket" type="object-bucket" {}
            }
        "#;

        let result = parse_stack(kdl);
        assert!(result.is_err());
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let kdl = r#"
            stack "s"
            group "storage" {}
            group "storage" {}
        "#;

        let err = parse_stack(kdl).unwrap_err();
        assert!(err.to_string().contains("storage"));
    }

    #[test]
    fn test_unknown_top_level_node_rejected() {
        let kdl = r#"
            stack "s"
            widget "nope"
        "#;

        let err = parse_stack(kdl).unwrap_err();
        assert!(err.to_string().contains("widget"));
    }
}
