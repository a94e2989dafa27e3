//! Error types for the lfs-core crate

use thiserror::Error;

/// Result type alias using `CoreError`
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors from the coordination layer and its collaborators
#[derive(Error, Debug)]
pub enum CoreError {
    /// Request data is malformed
    #[error("validation failed: {0}")]
    Validation(String),

    /// Operation needs a multipart-capable backend
    #[error("operation not supported: {0}")]
    NotSupported(String),

    /// Storage error
    #[error("storage error: {0}")]
    Store(#[from] lfs_store::StoreError),
}
