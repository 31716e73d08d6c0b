//! Error types for the trainlog store.
//!
//! Backend failures are carried verbatim so callers can see what the
//! database reported. Contract violations (wrong bucket, malformed field
//! maps) get their own variants so they are never mistaken for I/O trouble.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the trainlog library.
#[derive(Debug, Error)]
pub enum LogStoreError {
    // Database errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Contract violations
    #[error("Unknown bucket: {0}")]
    UnknownBucket(String),

    #[error("Contract violation on bucket {bucket}: {message}")]
    ContractViolation { bucket: String, message: String },

    // Lookup errors
    #[error("Record {id} not found in bucket {bucket}")]
    NotFound { bucket: String, id: i64 },

    #[error("{0}")]
    Other(String),
}

/// Result type alias for trainlog operations.
pub type Result<T> = std::result::Result<T, LogStoreError>;

impl From<std::io::Error> for LogStoreError {
    fn from(err: std::io::Error) -> Self {
        LogStoreError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for LogStoreError {
    fn from(err: serde_json::Error) -> Self {
        LogStoreError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for LogStoreError {
    fn from(err: rusqlite::Error) -> Self {
        LogStoreError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl LogStoreError {
    /// Create a contract violation for a bucket.
    pub fn contract(bucket: impl std::fmt::Display, message: impl Into<String>) -> Self {
        LogStoreError::ContractViolation {
            bucket: bucket.to_string(),
            message: message.into(),
        }
    }

    /// True for programming errors: an unknown bucket or a malformed record.
    ///
    /// These are never retried or swallowed; they indicate a caller bug.
    pub fn is_contract_violation(&self) -> bool {
        matches!(
            self,
            LogStoreError::UnknownBucket(_) | LogStoreError::ContractViolation { .. }
        )
    }

    /// True when the error came from the persistence layer.
    pub fn is_backend_failure(&self) -> bool {
        matches!(
            self,
            LogStoreError::Database { .. } | LogStoreError::Io { .. }
        )
    }
}
