//! # LFS Store
//!
//! Content-addressed object storage for the LFS object service.
//!
//! This crate provides:
//! - **Pointers**: `(oid, size)` identity and storage key derivation
//! - **ContentStore**: exists, streamed get/put, integrity verification,
//!   presigned URLs and lazy key enumeration
//! - **MultipartBackend**: S3-style multipart task management
//! - **Backends**: memory, local filesystem, S3 and an S3 multipart decorator
//! - **Registry**: backend kind tag to constructor, resolved once at startup
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────┐
//! │         Batch / transfer handlers, coordinator      │
//! ├─────────────────────────────────────────────────────┤
//! │        ContentStore  (+ MultipartBackend)           │
//! ├────────────┬────────────┬──────────┬────────────────┤
//! │ MemoryStore│ LocalStore │ S3Store  │ S3MultipartStore│
//! │            │ (tokio fs) │ (minio)  │ (wraps S3Store) │
//! └────────────┴────────────┴──────────┴────────────────┘
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use lfs_store::{ContentStore, StoreRegistry, StorageConfig};
//!
//! let store = StoreRegistry::with_defaults().build(&config).await?;
//! store.put(&pointer, body).await?;
//! assert!(store.verify(&pointer).await?);
//! ```

pub mod error;
pub mod local;
pub mod memory;
pub mod multipart;
pub mod pointer;
pub mod registry;
pub mod s3;
pub mod s3_multipart;

pub use error::{Result, StoreError};
pub use local::LocalStore;
pub use memory::MemoryStore;
pub use multipart::{CompletedPart, MultipartBackend, UploadTask, UploadedPart};
pub use pointer::Pointer;
pub use registry::{StorageConfig, StoreRegistry};
pub use s3::{S3Config, S3Store};
pub use s3_multipart::S3MultipartStore;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use lfs_crypto::ObjectHasher;
use std::time::Duration;

/// Validity window of presigned URLs (15 minutes)
pub const PRESIGN_EXPIRY: Duration = Duration::from_secs(15 * 60);

/// Default multipart chunk size (64 MB)
pub const DEFAULT_CHUNK_SIZE: u64 = 64 * 1024 * 1024;

/// Highest part number accepted by S3-style backends
pub const MAX_PART_NUMBER: i32 = 10_000;

/// A stream of object bytes
pub type ObjectStream = BoxStream<'static, std::io::Result<Bytes>>;

/// A lazy stream of storage keys; dropping it stops enumeration
pub type KeyStream = BoxStream<'static, Result<String>>;

/// Trait for content-addressed object storage backends
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Backend kind tag
    fn kind(&self) -> &'static str;

    /// Check whether the object is stored
    async fn exists(&self, pointer: &Pointer) -> Result<bool>;

    /// Stream the object starting at byte `offset`
    async fn get(&self, pointer: &Pointer, offset: u64) -> Result<ObjectStream>;

    /// Store exactly `pointer.size` bytes from `body`.
    ///
    /// Bytes are hashed as they stream through. A size or hash mismatch
    /// leaves nothing behind and returns an integrity error.
    async fn put(&self, pointer: &Pointer, body: ObjectStream) -> Result<()>;

    /// Recompute hash and size of the stored bytes and compare with `pointer`
    async fn verify(&self, pointer: &Pointer) -> Result<bool> {
        let mut stream = match self.get(pointer, 0).await {
            Ok(stream) => stream,
            Err(StoreError::NotFound(_)) => return Ok(false),
            Err(e) => return Err(e),
        };

        let mut hasher = ObjectHasher::new();
        while let Some(chunk) = stream.next().await {
            hasher.update(&chunk?);
            if hasher.bytes_processed() > pointer.size_u64() {
                return Ok(false);
            }
        }
        Ok(pointer.check(hasher).is_ok())
    }

    /// Signed, time-limited URL for direct client download, if supported.
    ///
    /// `filename` is suggested as the download name when not empty.
    async fn url(&self, _pointer: &Pointer, _filename: &str) -> Result<Option<String>> {
        Ok(None)
    }

    /// Whether `url` can return direct links
    fn serves_direct(&self) -> bool {
        false
    }

    /// Enumerate storage keys under `prefix`
    fn iterate_keys(&self, prefix: &str) -> KeyStream;

    /// Multipart operations, when the backend has them
    fn multipart(&self) -> Option<&dyn MultipartBackend> {
        None
    }
}

/// Hashes incoming bytes for a put and rejects them once they overrun or
/// fail to match the pointer.
pub(crate) struct Intake<'a> {
    pointer: &'a Pointer,
    hasher: ObjectHasher,
}

impl<'a> Intake<'a> {
    pub(crate) fn new(pointer: &'a Pointer) -> Self {
        Self {
            pointer,
            hasher: ObjectHasher::new(),
        }
    }

    pub(crate) fn feed(&mut self, chunk: &[u8]) -> Result<()> {
        self.hasher.update(chunk);
        let expected = self.pointer.size_u64();
        if self.hasher.bytes_processed() > expected {
            return Err(StoreError::SizeMismatch {
                expected,
                actual: self.hasher.bytes_processed(),
            });
        }
        Ok(())
    }

    pub(crate) fn finish(self) -> Result<()> {
        self.pointer.check(self.hasher)
    }
}

/// Truncate a byte stream after `limit` bytes
pub fn take_bytes(stream: ObjectStream, limit: u64) -> ObjectStream {
    stream
        .scan(limit, |remaining, chunk| {
            if *remaining == 0 {
                return futures::future::ready(None);
            }
            let item = chunk.map(|mut bytes| {
                if bytes.len() as u64 > *remaining {
                    bytes.truncate(*remaining as usize);
                }
                *remaining -= bytes.len() as u64;
                bytes
            });
            futures::future::ready(Some(item))
        })
        .boxed()
}

/// Wrap an in-memory buffer as an object stream
pub fn stream_from_bytes(data: impl Into<Bytes>) -> ObjectStream {
    let data = data.into();
    futures::stream::once(async move { Ok(data) }).boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;

    #[tokio::test]
    async fn test_take_bytes_truncates() {
        let chunks = vec![
            Ok(Bytes::from_static(b"hello ")),
            Ok(Bytes::from_static(b"world")),
        ];
        let stream = futures::stream::iter(chunks).boxed();
        let out: Vec<Bytes> = take_bytes(stream, 8).try_collect().await.unwrap();
        assert_eq!(out.concat(), b"hello wo");
    }

    #[tokio::test]
    async fn test_take_bytes_zero() {
        let out: Vec<Bytes> = take_bytes(stream_from_bytes("abc"), 0)
            .try_collect()
            .await
            .unwrap();
        assert!(out.is_empty());
    }
}
