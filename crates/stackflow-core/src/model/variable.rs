//! Typed input variable declarations

use serde::{Deserialize, Serialize};

/// Declared type of an input variable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VarType {
    String,
    Number,
    Bool,
    List,
    Map,
}

impl VarType {
    /// Parse a type name as written in configuration
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "string" => Some(VarType::String),
            "number" => Some(VarType::Number),
            "bool" => Some(VarType::Bool),
            "list" => Some(VarType::List),
            "map" => Some(VarType::Map),
            _ => None,
        }
    }

    /// Check whether a resolved value matches this type
    pub fn matches(&self, value: &serde_json::Value) -> bool {
        match self {
            VarType::String => value.is_string(),
            VarType::Number => value.is_number(),
            VarType::Bool => value.is_boolean(),
            VarType::List => value.is_array(),
            VarType::Map => value.is_object(),
        }
    }
}

impl std::fmt::Display for VarType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VarType::String => write!(f, "string"),
            VarType::Number => write!(f, "number"),
            VarType::Bool => write!(f, "bool"),
            VarType::List => write!(f, "list"),
            VarType::Map => write!(f, "map"),
        }
    }
}

/// Validation constraints attached to a variable declaration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Validation {
    /// Enumerated choices (comma separated in configuration)
    pub one_of: Option<Vec<String>>,

    /// Numeric lower bound (inclusive)
    pub min: Option<f64>,

    /// Numeric upper bound (inclusive)
    pub max: Option<f64>,

    /// Error message shown when the constraint fails
    pub message: Option<String>,
}

impl Validation {
    pub fn is_empty(&self) -> bool {
        self.one_of.is_none() && self.min.is_none() && self.max.is_none()
    }
}

/// A declared input variable
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VariableSpec {
    pub name: String,

    pub ty: VarType,

    /// Default value; variables without a default are required
    pub default: Option<serde_json::Value>,

    pub validation: Option<Validation>,
}

impl VariableSpec {
    pub fn required(&self) -> bool {
        self.default.is_none()
    }
}
