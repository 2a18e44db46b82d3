//! Variable declaration parsing

use crate::error::{ConfigError, Result};
use crate::model::{Validation, VarType, VariableSpec};
use crate::parser::{entries_to_json, require_first_string};
use kdl::KdlNode;

/// Parse a variable node
///
/// ```kdl
/// variable "environment" {
///     type "string"
///     default "dev"
///     validation one-of="dev,stg,prod" message="environment must be dev, stg or prod"
/// }
/// ```
pub fn parse_variable(node: &KdlNode) -> Result<VariableSpec> {
    let name = require_first_string(node, "variable requires a name")?;

    let children = node.children().ok_or_else(|| {
        ConfigError::InvalidConfig(format!("variable '{name}' requires a type declaration"))
    })?;

    // The declared type drives how the default is collected (a list
    // default with a single element is still a list).
    let ty = children
        .nodes()
        .iter()
        .find(|n| n.name().value() == "type")
        .and_then(|n| n.entries().first())
        .and_then(|e| e.value().as_string())
        .ok_or_else(|| {
            ConfigError::InvalidConfig(format!("variable '{name}' requires a type declaration"))
        })
        .and_then(|s| {
            VarType::parse(s).ok_or_else(|| {
                ConfigError::InvalidConfig(format!("variable '{name}' has unknown type '{s}'"))
            })
        })?;

    let mut default = None;
    let mut validation = None;

    for child in children.nodes() {
        match child.name().value() {
            "type" => {}
            "default" => {
                default = entries_to_json(child, ty == VarType::List);
            }
            "validation" => {
                validation = Some(parse_validation(child));
            }
            other => {
                return Err(ConfigError::InvalidConfig(format!(
                    "variable '{name}': unknown node '{other}'"
                )));
            }
        }
    }

    Ok(VariableSpec {
        name,
        ty,
        default,
        validation,
    })
}

fn parse_validation(node: &KdlNode) -> Validation {
    let one_of = node.get("one-of").and_then(|v| v.as_string()).map(|s| {
        s.split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect()
    });

    let min = node
        .get("min")
        .and_then(|v| v.as_integer().map(|i| i as f64).or_else(|| v.as_float()));
    let max = node
        .get("max")
        .and_then(|v| v.as_integer().map(|i| i as f64).or_else(|| v.as_float()));

    let message = node
        .get("message")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());

    Validation {
        one_of,
        min,
        max,
        message,
    }
}
