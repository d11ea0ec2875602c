//! Error types for the session scratch store.
//!
//! Messages never embed raw filesystem paths. Where a location has to be
//! identified, the log-safe tag from [`crate::utils::path_tag`] is used.

use thiserror::Error;

/// Main error type for the scratch store.
#[derive(Error, Debug)]
pub enum ScratchError {
    /// A caller-supplied name resolved outside its sandbox.
    #[error("Path traversal rejected in sandbox {sandbox}")]
    PathTraversal { sandbox: String },

    #[error("Invalid filename: {0}")]
    InvalidFilename(String),

    #[error("Invalid session identifier")]
    InvalidSessionId,

    #[error("Corrupt deletion record {tag}: {reason}")]
    CorruptMetadata { tag: String, reason: String },

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScratchError {
    /// Whether this error must be surfaced to the caller as an invalid request.
    pub fn is_invalid_request(&self) -> bool {
        matches!(
            self,
            ScratchError::PathTraversal { .. }
                | ScratchError::InvalidFilename(_)
                | ScratchError::InvalidSessionId
        )
    }
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, ScratchError>;
