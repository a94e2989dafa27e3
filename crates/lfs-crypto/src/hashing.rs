//! Content hashing for object ids
//!
//! Objects are addressed by the lowercase hex SHA-256 of their bytes. This
//! module provides:
//! - Oid format validation
//! - An incremental hasher that also counts bytes, for streaming verification
//! - MD5 helpers for S3-style part ETags

use crate::{CryptoError, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Size of a SHA-256 digest in bytes
pub const HASH_BYTE_SIZE: usize = 32;

/// Length of a hex-encoded oid
pub const OID_HEX_LEN: usize = HASH_BYTE_SIZE * 2;

/// Oid of the empty object
pub const EMPTY_OID: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

/// Type alias for digest bytes
pub type HashOutput = [u8; HASH_BYTE_SIZE];

/// A SHA-256 digest identifying an object's content
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContentHash(HashOutput);

impl ContentHash {
    pub fn new(bytes: HashOutput) -> Self {
        Self(bytes)
    }

    /// Parse a lowercase hex oid
    pub fn from_hex(s: &str) -> Result<Self> {
        if !is_valid_oid(s) {
            return Err(CryptoError::InvalidOid(s.to_string()));
        }
        let bytes = hex::decode(s)?;
        let mut arr = [0u8; HASH_BYTE_SIZE];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    pub fn as_bytes(&self) -> &HashOutput {
        &self.0
    }

    /// Convert to the oid string form
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Debug for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ContentHash({})", self.to_hex())
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl AsRef<[u8]> for ContentHash {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Check that `oid` is 64 lowercase hex characters
pub fn is_valid_oid(oid: &str) -> bool {
    oid.len() == OID_HEX_LEN && oid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

/// An incremental hasher that tracks how many bytes it has seen
pub struct ObjectHasher {
    hasher: Sha256,
    bytes_processed: u64,
}

impl ObjectHasher {
    pub fn new() -> Self {
        Self {
            hasher: Sha256::new(),
            bytes_processed: 0,
        }
    }

    pub fn update(&mut self, data: &[u8]) {
        self.hasher.update(data);
        self.bytes_processed += data.len() as u64;
    }

    pub fn bytes_processed(&self) -> u64 {
        self.bytes_processed
    }

    /// Finalize into the digest and the total byte count
    pub fn finalize(self) -> (ContentHash, u64) {
        let digest: HashOutput = self.hasher.finalize().into();
        (ContentHash(digest), self.bytes_processed)
    }

    /// Finalize and compare against an expected oid and size
    pub fn matches(self, oid: &str, size: u64) -> bool {
        let (hash, count) = self.finalize();
        count == size && hash.to_hex() == oid
    }
}

impl Default for ObjectHasher {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash a buffer in one go
pub fn hash(data: &[u8]) -> ContentHash {
    let mut hasher = ObjectHasher::new();
    hasher.update(data);
    hasher.finalize().0
}

/// MD5 hex digest, used as the ETag of uploaded parts
pub fn md5_hash(data: &[u8]) -> String {
    use md5::Md5;
    let mut hasher = Md5::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}
