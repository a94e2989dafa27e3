//! Object pointers

use lfs_crypto::{is_valid_oid, ObjectHasher};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Result, StoreError};

/// An (oid, size) pair identifying one stored object
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pointer {
    pub oid: String,
    pub size: i64,
}

impl Pointer {
    pub fn new(oid: impl Into<String>, size: i64) -> Self {
        Self {
            oid: oid.into(),
            size,
        }
    }

    /// Oid is a SHA-256 hex digest and size is not negative
    pub fn is_valid(&self) -> bool {
        self.size >= 0 && is_valid_oid(&self.oid)
    }

    /// Size as unsigned, zero for negative sizes
    pub fn size_u64(&self) -> u64 {
        self.size.max(0) as u64
    }

    /// Storage key: `aa/bb/rest-of-oid`
    pub fn relative_path(&self) -> String {
        if self.oid.len() < 5 {
            return self.oid.clone();
        }
        format!("{}/{}/{}", &self.oid[0..2], &self.oid[2..4], &self.oid[4..])
    }

    /// Compare a finished hasher against this pointer
    pub fn check(&self, hasher: ObjectHasher) -> Result<()> {
        let (digest, count) = hasher.finalize();
        if count != self.size_u64() {
            return Err(StoreError::SizeMismatch {
                expected: self.size_u64(),
                actual: count,
            });
        }
        let actual = digest.to_hex();
        if actual != self.oid {
            return Err(StoreError::HashMismatch {
                expected: self.oid.clone(),
                actual,
            });
        }
        Ok(())
    }
}

impl fmt::Display for Pointer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.oid, self.size)
    }
}
