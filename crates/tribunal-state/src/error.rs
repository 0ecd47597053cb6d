//! Error types for tribunal-state

use thiserror::Error;

/// Errors raised by checkpoint stores.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Filesystem failure while reading or writing a checkpoint.
    #[error("checkpoint io failed: {0}")]
    Io(#[from] std::io::Error),

    /// The checkpoint document could not be encoded or decoded.
    #[error("checkpoint serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// No checkpoint exists for the requested key.
    #[error("checkpoint not found: {key}")]
    NotFound { key: String },

    /// Session ids become directory names, so they are restricted.
    #[error("invalid session id: {session_id:?}")]
    InvalidSessionId { session_id: String },

    /// A file in a session directory does not follow the checkpoint naming scheme.
    #[error("malformed checkpoint file name: {name}")]
    MalformedFileName { name: String },
}
