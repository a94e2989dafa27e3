//! Multipart upload coordination
//!
//! Large uploads are split into fixed-size parts that the client sends
//! straight to the backend through presigned URLs. The coordinator never sees
//! part bytes. It only:
//!
//! 1. discovers an unfinished backend task for the object key, aborting all of
//!    them when more than one exists,
//! 2. resumes a single task by reusing parts of the right size, or creates a
//!    new task,
//! 3. hands out one presigned URL per missing part,
//! 4. merges the parts on commit, treating an already-finished upload as done.
//!
//! Discovery is check-then-act. Two initiators may race and cancel each
//! other's tasks; idempotent commit and abort make them converge on a single
//! object.

use crate::context::OpContext;
use crate::hooks::{notify_committed, CommitHook};
use crate::meta::{MetaObject, MetaStore};
use crate::protocol::{AggregationParams, CommitManifest, MultipartEndpoint, PartAction};
use crate::{CoreError, Result};
use lfs_crypto::EMPTY_OID;
use lfs_store::{
    stream_from_bytes, CompletedPart, ContentStore, MultipartBackend, Pointer, StoreError, UploadedPart,
    DEFAULT_CHUNK_SIZE, MAX_PART_NUMBER, PRESIGN_EXPIRY,
};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Instrument};

/// Tuning for multipart uploads
#[derive(Clone, Debug)]
pub struct MultipartSettings {
    /// Size of every part but the last
    pub chunk_size: u64,
    /// Lifetime of presigned part URLs
    pub part_expiry: Duration,
}

impl Default for MultipartSettings {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            part_expiry: PRESIGN_EXPIRY,
        }
    }
}

/// Parts to upload for one object
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MultipartPlan {
    /// Empty for zero-size objects, which need no backend task
    pub upload_id: String,
    pub parts: Vec<PartAction>,
}

impl MultipartPlan {
    /// The verify step the client calls once all parts are uploaded
    pub fn verify_endpoint(&self, href: String, header: BTreeMap<String, String>) -> MultipartEndpoint {
        MultipartEndpoint {
            href,
            method: "POST".to_string(),
            header,
            params: Some(BTreeMap::from([("upload_id".to_string(), self.upload_id.clone())])),
            aggregation_params: Some(AggregationParams::part_ids()),
            expires_in: None,
        }
    }
}

/// Result of a commit
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommitOutcome {
    /// The backend merged the parts
    Merged,
    /// Another request completed the upload first
    AlreadyCompleted,
    /// Zero-size object with no parts; nothing to merge
    Empty,
}

/// Split `size` bytes into `(index, pos, len)` chunks with 1-based indices
pub fn partition(size: u64, chunk_size: u64) -> Vec<(i32, u64, u64)> {
    let chunk_size = chunk_size.max(1);
    let mut parts = Vec::new();
    let mut pos = 0;
    let mut index = 1;
    while pos < size {
        let len = chunk_size.min(size - pos);
        parts.push((index, pos, len));
        pos += len;
        index += 1;
    }
    parts
}

pub struct MultipartCoordinator {
    store: Arc<dyn ContentStore>,
    meta: Arc<dyn MetaStore>,
    hook: Arc<dyn CommitHook>,
    settings: MultipartSettings,
}

impl MultipartCoordinator {
    pub fn new(
        store: Arc<dyn ContentStore>,
        meta: Arc<dyn MetaStore>,
        hook: Arc<dyn CommitHook>,
        settings: MultipartSettings,
    ) -> Self {
        Self {
            store,
            meta,
            hook,
            settings,
        }
    }

    pub fn settings(&self) -> &MultipartSettings {
        &self.settings
    }

    /// Whether the configured store can run multipart uploads
    pub fn is_available(&self) -> bool {
        self.store.multipart().is_some()
    }

    fn backend(&self) -> Result<&dyn MultipartBackend> {
        self.store
            .multipart()
            .ok_or_else(|| CoreError::NotSupported(format!("{} store has no multipart uploads", self.store.kind())))
    }

    /// Work out which parts the client still has to upload
    pub async fn plan(&self, ctx: &OpContext, pointer: &Pointer) -> Result<MultipartPlan> {
        self.plan_parts(pointer).instrument(ctx.span("multipart.plan")).await
    }

    async fn plan_parts(&self, pointer: &Pointer) -> Result<MultipartPlan> {
        let backend = self.backend()?;
        let chunks = partition(pointer.size_u64(), self.settings.chunk_size);
        if chunks.is_empty() {
            return Ok(MultipartPlan {
                upload_id: String::new(),
                parts: Vec::new(),
            });
        }
        if chunks.len() > MAX_PART_NUMBER as usize {
            return Err(CoreError::Validation(format!(
                "object of {} bytes needs more than {} parts",
                pointer.size, MAX_PART_NUMBER
            )));
        }

        let key = pointer.relative_path();
        let (upload_id, uploaded) = self.resume_or_create(backend, &key).await?;

        let expires_in = self.settings.part_expiry.as_secs() as i64;
        let mut parts = Vec::with_capacity(chunks.len());
        for (index, pos, size) in chunks {
            match uploaded.get(&index).filter(|part| part.size as u64 == size) {
                Some(done) => parts.push(PartAction {
                    index,
                    pos,
                    size,
                    etag: Some(done.etag.clone()),
                    endpoint: None,
                }),
                None => {
                    let href = backend
                        .presign_part(&key, &upload_id, index, self.settings.part_expiry)
                        .await?;
                    parts.push(PartAction {
                        index,
                        pos,
                        size,
                        etag: None,
                        endpoint: Some(MultipartEndpoint {
                            href,
                            method: "PUT".to_string(),
                            expires_in: Some(expires_in),
                            ..MultipartEndpoint::default()
                        }),
                    });
                }
            }
        }

        debug!(
            oid = %pointer.oid,
            upload_id = %upload_id,
            parts = parts.len(),
            pending = parts.iter().filter(|p| p.endpoint.is_some()).count(),
            "planned multipart upload"
        );
        Ok(MultipartPlan { upload_id, parts })
    }

    async fn resume_or_create(
        &self,
        backend: &dyn MultipartBackend,
        key: &str,
    ) -> Result<(String, HashMap<i32, UploadedPart>)> {
        let mut tasks = backend.list_uploads(key).await?;
        tasks.retain(|task| task.key == key);

        if tasks.len() > 1 {
            warn!(key, count = tasks.len(), "aborting ambiguous multipart uploads");
            for task in &tasks {
                match backend.abort_upload(key, &task.upload_id).await {
                    Ok(()) | Err(StoreError::NoSuchUpload(_)) => {}
                    Err(e) => return Err(e.into()),
                }
            }
        } else if let Some(task) = tasks.pop() {
            match backend.list_parts(key, &task.upload_id).await {
                Ok(parts) => {
                    info!(key, upload_id = %task.upload_id, parts = parts.len(), "resuming multipart upload");
                    let parts = parts.into_iter().map(|part| (part.part_number, part)).collect();
                    return Ok((task.upload_id, parts));
                }
                Err(StoreError::NoSuchUpload(_)) => {
                    debug!(key, upload_id = %task.upload_id, "multipart upload vanished, starting over");
                }
                Err(e) => return Err(e.into()),
            }
        }

        let upload_id = backend.create_upload(key).await?;
        Ok((upload_id, HashMap::new()))
    }

    /// Merge the submitted parts into the final object
    pub async fn commit(&self, ctx: &OpContext, pointer: &Pointer, manifest: &CommitManifest) -> Result<CommitOutcome> {
        self.merge(pointer, manifest).instrument(ctx.span("multipart.commit")).await
    }

    async fn merge(&self, pointer: &Pointer, manifest: &CommitManifest) -> Result<CommitOutcome> {
        if manifest.part_ids.is_empty() {
            if pointer.size == 0 {
                debug!(oid = %pointer.oid, "zero-size commit, nothing to merge");
                return Ok(CommitOutcome::Empty);
            }
            return Err(CoreError::Validation("part list is empty".to_string()));
        }
        if manifest.upload_id.is_empty() {
            return Err(CoreError::Validation("upload_id is required".to_string()));
        }

        let mut seen = HashSet::new();
        let mut parts = Vec::with_capacity(manifest.part_ids.len());
        for part in &manifest.part_ids {
            if !(1..=MAX_PART_NUMBER).contains(&part.index) {
                return Err(CoreError::Validation(format!("part index {} out of range", part.index)));
            }
            if !seen.insert(part.index) {
                return Err(CoreError::Validation(format!("duplicate part index {}", part.index)));
            }
            parts.push(CompletedPart {
                part_number: part.index,
                etag: part.etag.clone(),
            });
        }
        parts.sort_by_key(|part| part.part_number);

        let key = pointer.relative_path();
        match self.backend()?.complete_upload(&key, &manifest.upload_id, &parts).await {
            Ok(()) => Ok(CommitOutcome::Merged),
            Err(StoreError::NoSuchUpload(_)) => {
                info!(key = %key, upload_id = %manifest.upload_id, "multipart upload already completed");
                Ok(CommitOutcome::AlreadyCompleted)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Commit, verify the merged bytes and record ownership.
    ///
    /// Returns `false` when the stored object does not match the pointer, in
    /// which case no ownership row is written.
    pub async fn commit_and_verify(
        &self,
        ctx: &OpContext,
        repository_id: i64,
        pointer: &Pointer,
        manifest: &CommitManifest,
    ) -> Result<bool> {
        let outcome = self.commit(ctx, pointer, manifest).await?;

        if outcome == CommitOutcome::Empty && pointer.oid == EMPTY_OID && !self.store.exists(pointer).await? {
            self.store.put(pointer, stream_from_bytes(bytes::Bytes::new())).await?;
        }

        if !self.store.verify(pointer).await? {
            warn!(oid = %pointer.oid, size = pointer.size, ?outcome, "committed object failed verification");
            return Ok(false);
        }

        self.meta.create(MetaObject::new(repository_id, pointer)).await?;
        notify_committed(self.hook.clone(), ctx.clone(), repository_id, pointer.clone());
        Ok(true)
    }
}
