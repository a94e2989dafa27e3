//! Error types for the lfs-crypto crate

use thiserror::Error;

/// Result type alias using `CryptoError`
pub type Result<T> = std::result::Result<T, CryptoError>;

/// Errors from hashing and token handling
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Oid is not a lowercase hex SHA-256 digest
    #[error("invalid oid: {0}")]
    InvalidOid(String),

    /// Token failed signature, expiry or claim checks
    #[error("invalid token: {0}")]
    InvalidToken(String),

    /// Token could not be produced
    #[error("token encoding failed: {0}")]
    Encoding(String),

    /// Hash verification failed
    #[error("hash verification failed: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    /// Hex decode error
    #[error("hex decode error: {0}")]
    HexDecode(#[from] hex::FromHexError),
}
