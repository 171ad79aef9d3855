//! Error types for the etcd Backup Operator

use thiserror::Error;

/// Result type alias using the operator's Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Operator error types
#[derive(Error, Debug)]
pub enum Error {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Configuration error (unknown storage type, missing source block, ...)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation error
    #[error("Validation error: {0}")]
    Validation(String),

    /// Storage backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Malformed `container/key` path, rejected before reaching a backend
    #[error("Invalid storage path '{0}': expected <container>/<key>")]
    InvalidPath(String),

    /// Snapshot could not be taken from any endpoint
    #[error("Snapshot error: {0}")]
    Snapshot(String),

    /// Backup deadline expired
    #[error("Backup timed out after {0}s")]
    Timeout(u64),

    /// Resource no longer exists
    #[error("Resource not found: {0}")]
    NotFound(String),

    /// Secret not found
    #[error("Secret not found: {0}")]
    SecretNotFound(String),

    /// Secret key not found
    #[error("Secret key '{key}' not found in secret '{secret}'")]
    SecretKeyNotFound { secret: String, key: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// HTTP error talking to an etcd endpoint
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Error::Validation(msg.into())
    }

    /// Create a storage error
    pub fn storage(msg: impl Into<String>) -> Self {
        Error::Storage(msg.into())
    }

    /// Create a snapshot error
    pub fn snapshot(msg: impl Into<String>) -> Self {
        Error::Snapshot(msg.into())
    }

    /// True when the underlying resource is gone
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Kube(kube::Error::Api(ae)) => ae.code == 404,
            _ => false,
        }
    }

    /// True for optimistic-concurrency conflicts on update
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Kube(kube::Error::Api(ae)) if ae.code == 409)
    }
}

impl From<object_store::Error> for Error {
    fn from(e: object_store::Error) -> Self {
        match e {
            object_store::Error::NotFound { path, .. } => Error::NotFound(path),
            other => Error::Storage(other.to_string()),
        }
    }
}
