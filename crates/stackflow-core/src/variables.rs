//! Typed variable resolution
//!
//! Resolves declared variable specs against provided raw values with the
//! precedence: CLI override > values file > environment > declared default.
//! All failures are reported before any graph work starts.

use crate::error::{ConfigError, Result};
use crate::model::{VarType, VariableSpec};
use std::collections::BTreeMap;
use tracing::debug;

/// Environment variables with this prefix are treated as variable values,
/// e.g. `STACK_VAR_ENVIRONMENT=prod` supplies the variable `environment`.
pub const ENV_VAR_PREFIX: &str = "STACK_VAR_";

/// Fully resolved variable values keyed by name
pub type Variables = BTreeMap<String, serde_json::Value>;

/// Raw variable values from the supported sources
#[derive(Debug, Clone, Default)]
pub struct VariableSources {
    /// CLI `--var name=value` overrides (highest precedence)
    pub overrides: BTreeMap<String, String>,

    /// Values file contents
    pub file: Variables,

    /// Environment values (raw strings, coerced per declared type)
    pub env: BTreeMap<String, String>,
}

impl VariableSources {
    /// Collect `STACK_VAR_*` values from the process environment
    pub fn collect_env() -> BTreeMap<String, String> {
        let mut env = BTreeMap::new();
        for (key, value) in std::env::vars() {
            if let Some(name) = key.strip_prefix(ENV_VAR_PREFIX) {
                debug!(variable = %name, "Found environment variable value");
                env.insert(name.to_lowercase(), value);
            }
        }
        env
    }
}

/// Resolve all declared variables, failing fast on the first violation
pub fn resolve_variables(specs: &[VariableSpec], sources: &VariableSources) -> Result<Variables> {
    // Values for undeclared variables are a hard error, not a silent skip.
    for name in sources.overrides.keys().chain(sources.file.keys()) {
        if !specs.iter().any(|s| s.name == *name) {
            return Err(ConfigError::Validation {
                variable: name.clone(),
                message: "value provided but variable is not declared".to_string(),
            });
        }
    }

    let mut resolved = Variables::new();

    for spec in specs {
        let value = if let Some(raw) = sources.overrides.get(&spec.name) {
            coerce_raw(spec, raw)?
        } else if let Some(value) = sources.file.get(&spec.name) {
            value.clone()
        } else if let Some(raw) = sources.env.get(&spec.name) {
            coerce_raw(spec, raw)?
        } else if let Some(default) = &spec.default {
            default.clone()
        } else {
            return Err(ConfigError::Validation {
                variable: spec.name.clone(),
                message: "no value provided and no default declared".to_string(),
            });
        };

        check_type(spec, &value)?;
        check_constraints(spec, &value)?;
        resolved.insert(spec.name.clone(), value);
    }

    debug!(count = resolved.len(), "Resolved variables");
    Ok(resolved)
}

/// Coerce a raw string value (CLI or environment) to the declared type
pub fn coerce_raw(spec: &VariableSpec, raw: &str) -> Result<serde_json::Value> {
    let value = match spec.ty {
        VarType::String => serde_json::Value::String(raw.to_string()),
        VarType::Number => raw
            .parse::<i64>()
            .map(serde_json::Value::from)
            .or_else(|_| raw.parse::<f64>().map(serde_json::Value::from))
            .map_err(|_| ConfigError::Validation {
                variable: spec.name.clone(),
                message: format!("'{raw}' is not a number"),
            })?,
        VarType::Bool => match raw {
            "true" => serde_json::Value::Bool(true),
            "false" => serde_json::Value::Bool(false),
            _ => {
                return Err(ConfigError::Validation {
                    variable: spec.name.clone(),
                    message: format!("'{raw}' is not a bool (expected true or false)"),
                });
            }
        },
        VarType::List | VarType::Map => {
            serde_json::from_str(raw).map_err(|_| ConfigError::Validation {
                variable: spec.name.clone(),
                message: format!("'{raw}' is not valid JSON for a {} variable", spec.ty),
            })?
        }
    };
    Ok(value)
}

fn check_type(spec: &VariableSpec, value: &serde_json::Value) -> Result<()> {
    if spec.ty.matches(value) {
        return Ok(());
    }
    Err(ConfigError::Validation {
        variable: spec.name.clone(),
        message: format!("expected {} but got {value}", spec.ty),
    })
}

fn check_constraints(spec: &VariableSpec, value: &serde_json::Value) -> Result<()> {
    let Some(validation) = &spec.validation else {
        return Ok(());
    };

    let fail = |fallback: String| ConfigError::Validation {
        variable: spec.name.clone(),
        message: validation.message.clone().unwrap_or(fallback),
    };

    if let Some(choices) = &validation.one_of {
        let s = value.as_str().map(|s| s.to_string()).unwrap_or_else(|| value.to_string());
        if !choices.contains(&s) {
            return Err(fail(format!(
                "'{s}' is not one of: {}",
                choices.join(", ")
            )));
        }
    }

    if let Some(n) = value.as_f64() {
        if let Some(min) = validation.min {
            if n < min {
                return Err(fail(format!("{n} is below the minimum {min}")));
            }
        }
        if let Some(max) = validation.max {
            if n > max {
                return Err(fail(format!("{n} is above the maximum {max}")));
            }
        }
    }

    Ok(())
}
