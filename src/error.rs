//! Error types for the Command Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Optimistic concurrency mismatch on a write
    #[error("Conflict writing {key}: {message}")]
    Conflict { key: String, message: String },

    /// Object carries no name or namespace
    #[error("Object is missing its {0}")]
    MissingObjectKey(&'static str),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a conflict error
    pub fn conflict(key: impl ToString, msg: impl Into<String>) -> Self {
        Error::Conflict {
            key: key.to_string(),
            message: msg.into(),
        }
    }

    /// Whether this error is an optimistic concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube(kube::Error::Api(resp)) => resp.code == 409,
            _ => false,
        }
    }
}
