//! Engine error types

use thiserror::Error;

/// Errors raised by graph construction, planning and execution
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Reference error: {0}")]
    Reference(String),

    #[error("Dependency cycle detected: {0}")]
    Cycle(String),

    #[error("State file error: {0}")]
    State(String),

    #[error("Lock acquisition failed: {0}")]
    LockHeld(String),

    #[error("Backend error: {message}")]
    Backend { message: String, retryable: bool },

    #[error("Timeout waiting for backend operation on {0}")]
    Timeout(String),

    #[error(
        "apply completed with {} node(s) failed and {} blocked",
        failed.len(),
        blocked.len()
    )]
    PartialApply {
        succeeded: Vec<String>,
        failed: Vec<String>,
        blocked: Vec<String>,
    },

    #[error("Run cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl EngineError {
    /// Construct a retryable backend failure
    pub fn retryable(message: impl Into<String>) -> Self {
        EngineError::Backend {
            message: message.into(),
            retryable: true,
        }
    }

    /// Construct a terminal backend failure
    pub fn terminal(message: impl Into<String>) -> Self {
        EngineError::Backend {
            message: message.into(),
            retryable: false,
        }
    }

    /// Whether the executor may retry the failed operation
    pub fn is_retryable(&self) -> bool {
        matches!(self, EngineError::Backend { retryable: true, .. })
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
