//! Error types for transport, documents, and the remote config store.

use std::time::Duration;

use thiserror::Error;

/// Result type alias for config store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Failures of the remote command channel.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    #[error("failed to connect to {host}: {reason}")]
    Connect { host: String, reason: String },

    #[error("command timed out after {0:?}")]
    Timeout(Duration),

    #[error("command exited with status {status}: {stderr}")]
    CommandFailed { status: i32, stderr: String },

    #[error("transport i/o error: {0}")]
    Io(String),
}

/// Errors from parsing or navigating a `ConfigDocument`.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DocumentError {
    #[error("malformed document: {0}")]
    Parse(String),

    #[error("failed to serialize document: {0}")]
    Serialize(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("{0} is not a mapping")]
    NotAMapping(String),
}

/// Errors that can occur during remote config store operations.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: TransportError,
    },

    #[error("failed to parse {path}: {reason}")]
    Parse { path: String, reason: String },

    #[error("failed to write {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("failed to back up {path}: {reason}")]
    Backup { path: String, reason: String },

    #[error("failed to restore from {path}: {reason}")]
    Restore { path: String, reason: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("cannot modify document: {0}")]
    Structure(String),
}

impl StoreError {
    pub(crate) fn from_document(path: &str, err: DocumentError) -> Self {
        match err {
            DocumentError::Parse(reason) => StoreError::Parse {
                path: path.to_string(),
                reason,
            },
            DocumentError::Serialize(reason) => StoreError::Write {
                path: path.to_string(),
                reason,
            },
            DocumentError::NotFound(what) => StoreError::NotFound(what),
            DocumentError::NotAMapping(what) => {
                StoreError::Structure(format!("{what} is not a mapping"))
            }
        }
    }
}
