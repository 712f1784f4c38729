use std::io;
use std::result::Result as StdResult;

use thiserror::Error;

/// Errors that can occur in rekal
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RekalError {
    /// Database operation error.
    #[error("database error: {0}")]
    Database(String),

    /// Wire format error (bad magic, truncated frame, codec failure).
    #[error("wire format error: {0}")]
    Codec(String),

    /// Git subprocess error, carrying the underlying stderr line.
    #[error("git error: {0}")]
    Git(String),

    /// JSON serialization/deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid value for an enumerated field.
    #[error("invalid value: {0}")]
    InvalidValue(String),

    /// Command preconditions not met (not a git repo, not initialized).
    #[error("{0}")]
    Precondition(String),

    /// IO operation error.
    #[error("io error: {0}")]
    Io(#[from] io::Error),
}

/// Result type alias for rekal operations.
pub type Result<T> = StdResult<T, RekalError>;
