//! In-memory content store for tests and development
//!
//! Also simulates an S3-style multipart backend so that the multipart
//! coordinator can be exercised without object storage.

use crate::{
    CompletedPart, ContentStore, Intake, KeyStream, MultipartBackend, ObjectStream, Pointer, Result,
    StoreError, UploadTask, UploadedPart,
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use dashmap::DashMap;
use futures::stream::StreamExt;
use lfs_crypto::hashing::md5_hash;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
struct MemoryUpload {
    key: String,
    parts: BTreeMap<i32, (Bytes, String)>,
}

/// An in-memory content store
#[derive(Clone)]
pub struct MemoryStore {
    objects: Arc<DashMap<String, Bytes>>,
    uploads: Arc<DashMap<String, MemoryUpload>>,
    completions: Arc<AtomicUsize>,
    multipart: bool,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Create an empty store with multipart support
    pub fn new() -> Self {
        Self {
            objects: Arc::new(DashMap::new()),
            uploads: Arc::new(DashMap::new()),
            completions: Arc::new(AtomicUsize::new(0)),
            multipart: true,
        }
    }

    /// Create an empty store that only offers basic transfers
    pub fn without_multipart() -> Self {
        Self {
            multipart: false,
            ..Self::new()
        }
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// Overwrite the raw bytes stored under `key`, bypassing verification
    pub fn insert_raw(&self, key: &str, data: impl Into<Bytes>) {
        self.objects.insert(key.to_string(), data.into());
    }

    /// Number of unfinished multipart uploads
    pub fn pending_uploads(&self) -> usize {
        self.uploads.len()
    }

    /// Number of completion requests that reached the backend
    pub fn completion_calls(&self) -> usize {
        self.completions.load(Ordering::SeqCst)
    }

    /// Receive one part, as a client following a presigned URL would.
    /// Returns the part's etag.
    pub fn upload_part(&self, upload_id: &str, part_number: i32, data: impl Into<Bytes>) -> Result<String> {
        let data = data.into();
        let mut upload = self
            .uploads
            .get_mut(upload_id)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        let etag = md5_hash(&data);
        upload.parts.insert(part_number, (data, etag.clone()));
        Ok(etag)
    }

    fn lookup(&self, pointer: &Pointer) -> Result<Bytes> {
        let key = pointer.relative_path();
        self.objects
            .get(&key)
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound(key))
    }
}

#[async_trait]
impl ContentStore for MemoryStore {
    fn kind(&self) -> &'static str {
        "memory"
    }

    async fn exists(&self, pointer: &Pointer) -> Result<bool> {
        Ok(self.objects.contains_key(&pointer.relative_path()))
    }

    async fn get(&self, pointer: &Pointer, offset: u64) -> Result<ObjectStream> {
        let data = self.lookup(pointer)?;
        let start = (offset as usize).min(data.len());
        Ok(crate::stream_from_bytes(data.slice(start..)))
    }

    async fn put(&self, pointer: &Pointer, mut body: ObjectStream) -> Result<()> {
        let mut intake = Intake::new(pointer);
        let mut buf = BytesMut::with_capacity(pointer.size_u64().min(1 << 20) as usize);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            intake.feed(&chunk)?;
            buf.extend_from_slice(&chunk);
        }
        intake.finish()?;
        self.objects.insert(pointer.relative_path(), buf.freeze());
        Ok(())
    }

    fn iterate_keys(&self, prefix: &str) -> KeyStream {
        let mut keys: Vec<String> = self
            .objects
            .iter()
            .map(|entry| entry.key().clone())
            .filter(|key| key.starts_with(prefix))
            .collect();
        keys.sort();
        futures::stream::iter(keys.into_iter().map(Ok)).boxed()
    }

    fn multipart(&self) -> Option<&dyn MultipartBackend> {
        if self.multipart {
            Some(self)
        } else {
            None
        }
    }
}

#[async_trait]
impl MultipartBackend for MemoryStore {
    async fn list_uploads(&self, key: &str) -> Result<Vec<UploadTask>> {
        Ok(self
            .uploads
            .iter()
            .filter(|entry| entry.value().key.starts_with(key))
            .map(|entry| UploadTask {
                key: entry.value().key.clone(),
                upload_id: entry.key().clone(),
            })
            .collect())
    }

    async fn create_upload(&self, key: &str) -> Result<String> {
        let upload_id = uuid::Uuid::new_v4().simple().to_string();
        self.uploads.insert(
            upload_id.clone(),
            MemoryUpload {
                key: key.to_string(),
                parts: BTreeMap::new(),
            },
        );
        Ok(upload_id)
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<UploadedPart>> {
        let upload = self
            .uploads
            .get(upload_id)
            .filter(|upload| upload.key == key)
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;
        Ok(upload
            .parts
            .iter()
            .map(|(number, (data, etag))| UploadedPart {
                part_number: *number,
                size: data.len() as i64,
                etag: etag.clone(),
            })
            .collect())
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String> {
        Ok(format!(
            "memory://{}?uploadId={}&partNumber={}&expires={}",
            key,
            upload_id,
            part_number,
            expires_in.as_secs()
        ))
    }

    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[CompletedPart]) -> Result<()> {
        self.completions.fetch_add(1, Ordering::SeqCst);

        let merged = {
            let upload = self
                .uploads
                .get(upload_id)
                .filter(|upload| upload.key == key)
                .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))?;

            let mut merged = BytesMut::new();
            let mut last = 0;
            for part in parts {
                if part.part_number <= last {
                    return Err(StoreError::InvalidPart(format!(
                        "part {} out of order",
                        part.part_number
                    )));
                }
                last = part.part_number;
                let (data, etag) = upload
                    .parts
                    .get(&part.part_number)
                    .ok_or_else(|| StoreError::InvalidPart(format!("part {} missing", part.part_number)))?;
                if etag != part.etag.trim_matches('"') {
                    return Err(StoreError::InvalidPart(format!(
                        "part {} etag mismatch",
                        part.part_number
                    )));
                }
                merged.extend_from_slice(data);
            }
            merged.freeze()
        };

        if self.uploads.remove(upload_id).is_none() {
            return Err(StoreError::NoSuchUpload(upload_id.to_string()));
        }
        self.objects.insert(key.to_string(), merged);
        Ok(())
    }

    async fn abort_upload(&self, _key: &str, upload_id: &str) -> Result<()> {
        self.uploads
            .remove(upload_id)
            .map(|_| ())
            .ok_or_else(|| StoreError::NoSuchUpload(upload_id.to_string()))
    }
}
