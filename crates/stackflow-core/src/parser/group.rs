//! Resource group and template parsing

use crate::error::{ConfigError, Result};
use crate::model::{AttrSpec, GroupConfig, ParamSpec, TemplateSpec};
use crate::parser::{entries_to_json, kdl_value_to_json, parse_tags, require_first_string};
use kdl::KdlNode;

/// Parse a group node
///
/// ```kdl
/// group "storage" {
///     param "bucket_prefix" "${var.environment}-media"
///     resource "bucket" type="object-bucket" {
///         attr "name" "${param.bucket_prefix}-assets" immutable=#true
///         attr "versioning" #true
///     }
/// }
/// ```
pub fn parse_group(node: &KdlNode) -> Result<GroupConfig> {
    let name = require_first_string(node, "group requires a name")?;

    let mut group = GroupConfig {
        name: name.clone(),
        ..Default::default()
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "param" => {
                    let param = parse_param(child, &name)?;
                    if group.params.iter().any(|p| p.name == param.name) {
                        return Err(ConfigError::InvalidConfig(format!(
                            "group '{name}': param '{}' is declared more than once",
                            param.name
                        )));
                    }
                    group.params.push(param);
                }
                "resource" => {
                    let template = parse_template(child, &name)?;
                    if group.templates.iter().any(|t| t.name == template.name) {
                        return Err(ConfigError::InvalidConfig(format!(
                            "group '{name}': resource '{}' is declared more than once",
                            template.name
                        )));
                    }
                    group.templates.push(template);
                }
                other => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "group '{name}': unknown node '{other}'"
                    )));
                }
            }
        }
    }

    Ok(group)
}

fn parse_param(node: &KdlNode, group: &str) -> Result<ParamSpec> {
    let name = require_first_string(node, "param requires a name")?;
    let value = node
        .entries()
        .get(1)
        .map(|e| kdl_value_to_json(e.value()))
        .ok_or_else(|| {
            ConfigError::InvalidConfig(format!("group '{group}': param '{name}' requires a value"))
        })?;

    Ok(ParamSpec { name, value })
}

fn parse_template(node: &KdlNode, group: &str) -> Result<TemplateSpec> {
    let name = require_first_string(node, "resource requires a name")?;

    let resource_type = node
        .get("type")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string())
        .ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "group '{group}': resource '{name}' requires a type property"
            ))
        })?;

    let when = node
        .get("when")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());

    let for_each = node
        .get("for-each")
        .and_then(|v| v.as_string())
        .map(|s| s.to_string());

    if when.is_some() && for_each.is_some() {
        return Err(ConfigError::InvalidConfig(format!(
            "group '{group}': resource '{name}' cannot combine when and for-each"
        )));
    }

    let mut template = TemplateSpec {
        name: name.clone(),
        resource_type,
        when,
        for_each,
        attrs: Vec::new(),
        tags: Default::default(),
    };

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "attr" => {
                    let attr = parse_attr(child, group, &name)?;
                    if template.attrs.iter().any(|a| a.name == attr.name) {
                        return Err(ConfigError::InvalidConfig(format!(
                            "group '{group}': resource '{name}' declares attr '{}' more than once",
                            attr.name
                        )));
                    }
                    template.attrs.push(attr);
                }
                "tags" => {
                    template.tags = parse_tags(child);
                }
                other => {
                    return Err(ConfigError::InvalidConfig(format!(
                        "group '{group}': resource '{name}': unknown node '{other}'"
                    )));
                }
            }
        }
    }

    Ok(template)
}

fn parse_attr(node: &KdlNode, group: &str, resource: &str) -> Result<AttrSpec> {
    let name = require_first_string(node, "attr requires a name")?;

    // Skip the name entry, keep remaining positional values
    let positional: Vec<serde_json::Value> = node
        .entries()
        .iter()
        .filter(|e| e.name().is_none())
        .skip(1)
        .map(|e| kdl_value_to_json(e.value()))
        .collect();

    let value = if node.children().is_some() {
        entries_to_json(node, false).ok_or_else(|| {
            ConfigError::InvalidConfig(format!(
                "group '{group}': resource '{resource}': attr '{name}' requires a value"
            ))
        })?
    } else {
        match positional.len() {
            0 => {
                return Err(ConfigError::InvalidConfig(format!(
                    "group '{group}': resource '{resource}': attr '{name}' requires a value"
                )));
            }
            1 => positional.into_iter().next().unwrap(),
            _ => serde_json::Value::Array(positional),
        }
    };

    let immutable = node
        .get("immutable")
        .and_then(|v| v.as_bool())
        .unwrap_or(false);

    Ok(AttrSpec {
        name,
        value,
        immutable,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_one(kdl: &str) -> GroupConfig {
        let doc: kdl::KdlDocument = kdl.parse().unwrap();
        parse_group(doc.nodes().first().unwrap()).unwrap()
    }

    #[test]
    fn test_parse_group_with_params_and_resources() {
        let group = parse_one(
            r#"
            group "storage" {
                param "bucket_prefix" "${var.environment}-media"
                resource "bucket" type="object-bucket" {
                    attr "name" "${param.bucket_prefix}-assets" immutable=#true
                    attr "versioning" #true
                }
            }
            "#,
        );

        assert_eq!(group.name, "storage");
        assert_eq!(group.params.len(), 1);
        assert_eq!(group.templates.len(), 1);

        let bucket = &group.templates[0];
        assert_eq!(bucket.resource_type, "object-bucket");
        assert_eq!(bucket.attrs.len(), 2);
        assert!(bucket.attrs[0].immutable);
        assert!(!bucket.attrs[1].immutable);
        assert_eq!(bucket.attrs[1].value, serde_json::json!(true));
    }

    #[test]
    fn test_parse_guarded_template() {
        let group = parse_one(
            r#"
            group "compute" {
                resource "autoscaling" type="autoscale-policy" when="${var.enable_autoscaling}" {
                    attr "target" "${compute.handler.id}"
                }
            }
            "#,
        );

        assert_eq!(
            group.templates[0].when,
            Some("${var.enable_autoscaling}".to_string())
        );
    }

    #[test]
    fn test_parse_repeated_template() {
        let group = parse_one(
            r#"
            group "storage" {
                resource "replica" type="object-bucket" for-each="${var.replica_regions}" {
                    attr "name" "replica-${each.value}"
                }
            }
            "#,
        );

        assert_eq!(
            group.templates[0].for_each,
            Some("${var.replica_regions}".to_string())
        );
    }

    #[test]
    fn test_when_and_for_each_are_mutually_exclusive() {
        let doc: kdl::KdlDocument = r#"
            group "g" {
                resource "r" type="t" when="${var.a}" for-each="${var.b}" {}
            }
        "#
        .parse()
        .unwrap();
        assert!(parse_group(doc.nodes().first().unwrap()).is_err());
    }

    #[test]
    fn test_resource_requires_type() {
        let doc: kdl::KdlDocument = r#"
            group "g" {
                resource "r" {}
            }
        "#
        .parse()
        .unwrap();
        assert!(parse_group(doc.nodes().first().unwrap()).is_err());
    }

    #[test]
    fn test_template_tags() {
        let group = parse_one(
            r#"
            group "compute" {
                resource "handler" type="function" {
                    attr "code_digest" "sha256:abc"
                    tags {
                        role "worker"
                    }
                }
            }
            "#,
        );

        assert_eq!(
            group.templates[0].tags.get("role"),
            Some(&"worker".to_string())
        );
    }
}
