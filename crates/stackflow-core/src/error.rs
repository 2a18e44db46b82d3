use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("KDL parse error: {0}")]
    KdlParse(#[from] kdl::KdlError),

    #[error("IO error: {path}\nreason: {message}")]
    IoError { path: PathBuf, message: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Validation failed for variable '{variable}': {message}")]
    Validation { variable: String, message: String },

    #[error("Unknown variable '{name}' referenced in {context}")]
    UnknownVariable { name: String, context: String },

    #[error("Unknown parameter '{name}' referenced in group '{group}'")]
    UnknownParameter { name: String, group: String },

    #[error(
        "Project root not found\nsearch started at: {0}\nhint: run inside a directory containing a stack.kdl file"
    )]
    ProjectRootNotFound(PathBuf),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
