//! Multipart upload backend interface
//!
//! Mirrors the S3 multipart API: an object is uploaded as numbered parts
//! under an upload id, then merged by a completion call. Keys passed here are
//! pointer relative paths; backends add their own base path.

use crate::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// An unfinished multipart upload known to the backend
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadTask {
    pub key: String,
    pub upload_id: String,
}

/// A part the backend has already received
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UploadedPart {
    /// 1-based part number
    pub part_number: i32,
    pub size: i64,
    pub etag: String,
}

/// A part reference submitted for completion
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletedPart {
    pub part_number: i32,
    pub etag: String,
}

/// Backend operations needed to coordinate multipart uploads
#[async_trait]
pub trait MultipartBackend: Send + Sync {
    /// List unfinished uploads whose key starts with `key`
    async fn list_uploads(&self, key: &str) -> Result<Vec<UploadTask>>;

    /// Start a new upload and return its id
    async fn create_upload(&self, key: &str) -> Result<String>;

    /// List parts already received for an upload
    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<UploadedPart>>;

    /// Presigned URL the client PUTs one part's bytes to
    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String>;

    /// Merge parts into the final object.
    ///
    /// Returns `StoreError::NoSuchUpload` when the upload is already gone.
    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[CompletedPart]) -> Result<()>;

    /// Cancel an upload and discard its parts
    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<()>;
}
