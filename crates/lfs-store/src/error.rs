//! Error types for the lfs-store crate

use thiserror::Error;

/// Result type alias using `StoreError`
pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors that can occur during content store operations
#[derive(Error, Debug)]
pub enum StoreError {
    /// Object not found
    #[error("object not found: {0}")]
    NotFound(String),

    /// Storage key escapes the store root or is otherwise unusable
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// Written byte count differs from the pointer size
    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: u64, actual: u64 },

    /// Written bytes do not hash to the pointer oid
    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Multipart upload id unknown to the backend
    #[error("no such upload: {0}")]
    NoSuchUpload(String),

    /// A submitted part is missing or its etag differs
    #[error("invalid part: {0}")]
    InvalidPart(String),

    /// Backend request failed
    #[error("backend {operation} failed for {key}: {message}")]
    Backend {
        operation: &'static str,
        key: String,
        message: String,
    },

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Configuration(String),
}

impl StoreError {
    pub fn backend(operation: &'static str, key: impl Into<String>, message: impl ToString) -> Self {
        Self::Backend {
            operation,
            key: key.into(),
            message: message.to_string(),
        }
    }

    /// Size or hash mismatch
    pub fn is_integrity(&self) -> bool {
        matches!(self, Self::SizeMismatch { .. } | Self::HashMismatch { .. })
    }
}
