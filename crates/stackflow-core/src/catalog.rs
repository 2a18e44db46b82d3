//! Resource group instantiation
//!
//! Substitutes `${var.*}` and `${param.*}` expressions into group
//! parameters and template bodies, literalizes guard and repetition
//! expressions, and merges tag sets. Cross-node references
//! (`${group.node.attribute}`) are left untouched for the reference
//! binder. Instantiation is a pure function of the resolved variables.

use crate::error::{ConfigError, Result};
use crate::model::{GroupConfig, OutputSpec, StackConfig, TemplateSpec};
use crate::variables::Variables;
use regex::Regex;
use std::collections::BTreeMap;
use std::sync::LazyLock;
use tracing::debug;

/// Matches `${var.name}` and `${param.name}` expressions
static SCOPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{\s*(var|param)\.([A-Za-z0-9_-]+)\s*\}").expect("scope regex is valid")
});

/// A concrete attribute after variable/parameter substitution
#[derive(Debug, Clone, PartialEq)]
pub struct AttrInstance {
    pub name: String,
    pub value: serde_json::Value,
    pub immutable: bool,
}

/// A template with all guards and repetition sets literalized
#[derive(Debug, Clone)]
pub struct TemplateInstance {
    pub name: String,
    pub resource_type: String,

    /// Evaluated guard; `Some(false)` expands to zero nodes
    pub when: Option<bool>,

    /// Evaluated repetition set; one node per element
    pub for_each: Option<Vec<serde_json::Value>>,

    pub attrs: Vec<AttrInstance>,

    /// Default tags merged with template overrides (overrides win by key)
    pub tags: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct GroupInstance {
    pub name: String,
    pub templates: Vec<TemplateInstance>,
}

/// The instantiated stack handed to the graph builder
#[derive(Debug, Clone)]
pub struct StackInstance {
    pub name: String,
    pub groups: Vec<GroupInstance>,
    pub outputs: Vec<OutputSpec>,
}

/// Instantiate every group from resolved variables
pub fn instantiate(config: &StackConfig, vars: &Variables) -> Result<StackInstance> {
    let mut groups = Vec::with_capacity(config.groups.len());
    for group in &config.groups {
        groups.push(instantiate_group(group, vars, &config.default_tags)?);
    }

    debug!(groups = groups.len(), "Instantiated resource groups");
    Ok(StackInstance {
        name: config.name.clone(),
        groups,
        outputs: config.outputs.clone(),
    })
}

fn instantiate_group(
    group: &GroupConfig,
    vars: &Variables,
    default_tags: &BTreeMap<String, String>,
) -> Result<GroupInstance> {
    // Params resolve in declaration order so derived params can reference
    // earlier ones.
    let mut params: Variables = BTreeMap::new();
    for param in &group.params {
        let value = substitute(&param.value, vars, &params, &group.name)?;
        params.insert(param.name.clone(), value);
    }

    let mut templates = Vec::with_capacity(group.templates.len());
    for template in &group.templates {
        templates.push(instantiate_template(
            template,
            vars,
            &params,
            default_tags,
            &group.name,
        )?);
    }

    Ok(GroupInstance {
        name: group.name.clone(),
        templates,
    })
}

fn instantiate_template(
    template: &TemplateSpec,
    vars: &Variables,
    params: &Variables,
    default_tags: &BTreeMap<String, String>,
    group: &str,
) -> Result<TemplateInstance> {
    let when = match &template.when {
        Some(expr) => Some(evaluate_guard(expr, vars, params, group, &template.name)?),
        None => None,
    };

    let for_each = match &template.for_each {
        Some(expr) => Some(evaluate_for_each(expr, vars, params, group, &template.name)?),
        None => None,
    };

    let mut attrs = Vec::with_capacity(template.attrs.len());
    for attr in &template.attrs {
        attrs.push(AttrInstance {
            name: attr.name.clone(),
            value: substitute(&attr.value, vars, params, group)?,
            immutable: attr.immutable,
        });
    }

    // Node tags never drop default tags, only add or override by key.
    let mut tags = default_tags.clone();
    for (key, value) in &template.tags {
        let rendered = substitute(&serde_json::json!(value), vars, params, group)?;
        tags.insert(key.clone(), render_scalar(&rendered));
    }

    Ok(TemplateInstance {
        name: template.name.clone(),
        resource_type: template.resource_type.clone(),
        when,
        for_each,
        attrs,
        tags,
    })
}

/// Guards must be decidable before any graph work; a leftover `${...}`
/// means the expression referenced something unresolvable at plan time.
fn evaluate_guard(
    expr: &str,
    vars: &Variables,
    params: &Variables,
    group: &str,
    template: &str,
) -> Result<bool> {
    let value = substitute(&serde_json::json!(expr), vars, params, group)?;
    match value {
        serde_json::Value::Bool(b) => Ok(b),
        other => Err(ConfigError::InvalidConfig(format!(
            "group '{group}': resource '{template}': when must evaluate to a bool, got {other}"
        ))),
    }
}

fn evaluate_for_each(
    expr: &str,
    vars: &Variables,
    params: &Variables,
    group: &str,
    template: &str,
) -> Result<Vec<serde_json::Value>> {
    let value = substitute(&serde_json::json!(expr), vars, params, group)?;
    match value {
        serde_json::Value::Array(items) => Ok(items),
        other => Err(ConfigError::InvalidConfig(format!(
            "group '{group}': resource '{template}': for-each must evaluate to a list, got {other}"
        ))),
    }
}

/// Substitute `${var.*}` / `${param.*}` throughout a JSON value
fn substitute(
    value: &serde_json::Value,
    vars: &Variables,
    params: &Variables,
    group: &str,
) -> Result<serde_json::Value> {
    match value {
        serde_json::Value::String(s) => substitute_string(s, vars, params, group),
        serde_json::Value::Array(items) => {
            let mut out = Vec::with_capacity(items.len());
            for item in items {
                out.push(substitute(item, vars, params, group)?);
            }
            Ok(serde_json::Value::Array(out))
        }
        serde_json::Value::Object(map) => {
            let mut out = serde_json::Map::new();
            for (key, item) in map {
                out.insert(key.clone(), substitute(item, vars, params, group)?);
            }
            Ok(serde_json::Value::Object(out))
        }
        other => Ok(other.clone()),
    }
}

fn substitute_string(
    s: &str,
    vars: &Variables,
    params: &Variables,
    group: &str,
) -> Result<serde_json::Value> {
    let lookup = |scope: &str, name: &str| -> Result<serde_json::Value> {
        let (table, err): (&Variables, fn(&str, &str) -> ConfigError) = match scope {
            "var" => (vars, |name, group| ConfigError::UnknownVariable {
                name: name.to_string(),
                context: format!("group '{group}'"),
            }),
            _ => (params, |name, group| ConfigError::UnknownParameter {
                name: name.to_string(),
                group: group.to_string(),
            }),
        };
        table.get(name).cloned().ok_or_else(|| err(name, group))
    };

    // A string that is exactly one expression keeps the value's type.
    if let Some(caps) = SCOPE_RE.captures(s) {
        if caps.get(0).map(|m| m.as_str()) == Some(s.trim()) {
            return lookup(&caps[1], &caps[2]);
        }
    }

    let mut result = String::with_capacity(s.len());
    let mut last = 0;
    for caps in SCOPE_RE.captures_iter(s) {
        let m = caps.get(0).unwrap();
        result.push_str(&s[last..m.start()]);
        let value = lookup(&caps[1], &caps[2])?;
        result.push_str(&render_scalar(&value));
        last = m.end();
    }
    result.push_str(&s[last..]);
    Ok(serde_json::Value::String(result))
}

/// Render a value for embedding inside a string
pub(crate) fn render_scalar(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
