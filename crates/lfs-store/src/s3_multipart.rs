//! S3 store with multipart uploads
//!
//! Wraps an [`S3Store`] and adds the multipart task operations. Everything
//! else is delegated to the wrapped store unchanged.

use crate::{
    CompletedPart, ContentStore, KeyStream, MultipartBackend, ObjectStream, Pointer, Result, S3Store,
    StoreError, UploadTask, UploadedPart,
};
use async_trait::async_trait;
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use std::time::Duration;
use tracing::{debug, info, warn};

const NO_SUCH_UPLOAD: &str = "NoSuchUpload";

/// Multipart-capable S3 store
#[derive(Clone, Debug)]
pub struct S3MultipartStore {
    base: S3Store,
}

impl S3MultipartStore {
    pub fn new(base: S3Store) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &S3Store {
        &self.base
    }
}

fn is_no_such_upload<E, R>(err: &SdkError<E, R>) -> bool
where
    E: ProvideErrorMetadata,
{
    err.as_service_error().and_then(|e| e.code()) == Some(NO_SUCH_UPLOAD)
}

#[async_trait]
impl ContentStore for S3MultipartStore {
    fn kind(&self) -> &'static str {
        "s3"
    }

    async fn exists(&self, pointer: &Pointer) -> Result<bool> {
        self.base.exists(pointer).await
    }

    async fn get(&self, pointer: &Pointer, offset: u64) -> Result<ObjectStream> {
        self.base.get(pointer, offset).await
    }

    async fn put(&self, pointer: &Pointer, body: ObjectStream) -> Result<()> {
        self.base.put(pointer, body).await
    }

    async fn verify(&self, pointer: &Pointer) -> Result<bool> {
        self.base.verify(pointer).await
    }

    async fn url(&self, pointer: &Pointer, filename: &str) -> Result<Option<String>> {
        self.base.url(pointer, filename).await
    }

    fn serves_direct(&self) -> bool {
        self.base.serves_direct()
    }

    fn iterate_keys(&self, prefix: &str) -> KeyStream {
        self.base.iterate_keys(prefix)
    }

    fn multipart(&self) -> Option<&dyn MultipartBackend> {
        Some(self)
    }
}

#[async_trait]
impl MultipartBackend for S3MultipartStore {
    async fn list_uploads(&self, key: &str) -> Result<Vec<UploadTask>> {
        let prefix = self.base.object_key(key);
        let mut tasks = Vec::new();
        let mut key_marker = None;
        let mut upload_id_marker = None;

        loop {
            let page = self
                .base
                .client()
                .list_multipart_uploads()
                .bucket(self.base.bucket())
                .prefix(&prefix)
                .set_key_marker(key_marker.take())
                .set_upload_id_marker(upload_id_marker.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("list_multipart_uploads", prefix.clone(), DisplayErrorContext(&e)))?;

            for upload in page.uploads() {
                if let (Some(object_key), Some(upload_id)) = (upload.key(), upload.upload_id()) {
                    tasks.push(UploadTask {
                        key: object_key
                            .strip_prefix(prefix.as_str())
                            .map(|rest| format!("{key}{rest}"))
                            .unwrap_or_else(|| object_key.to_string()),
                        upload_id: upload_id.to_string(),
                    });
                }
            }

            if !page.is_truncated().unwrap_or(false) {
                break;
            }
            key_marker = page.next_key_marker().map(str::to_string);
            upload_id_marker = page.next_upload_id_marker().map(str::to_string);
            if key_marker.is_none() && upload_id_marker.is_none() {
                break;
            }
        }

        debug!(key = %prefix, count = tasks.len(), "listed multipart uploads");
        Ok(tasks)
    }

    async fn create_upload(&self, key: &str) -> Result<String> {
        let object_key = self.base.object_key(key);
        let output = self
            .base
            .client()
            .create_multipart_upload()
            .bucket(self.base.bucket())
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StoreError::backend("create_multipart_upload", object_key.clone(), DisplayErrorContext(&e)))?;

        let upload_id = output
            .upload_id()
            .ok_or_else(|| StoreError::backend("create_multipart_upload", object_key.clone(), "missing upload id"))?
            .to_string();
        info!(key = %object_key, upload_id = %upload_id, "created multipart upload");
        Ok(upload_id)
    }

    async fn list_parts(&self, key: &str, upload_id: &str) -> Result<Vec<UploadedPart>> {
        let object_key = self.base.object_key(key);
        let mut parts = Vec::new();
        let mut marker = None;

        loop {
            let page = match self
                .base
                .client()
                .list_parts()
                .bucket(self.base.bucket())
                .key(&object_key)
                .upload_id(upload_id)
                .set_part_number_marker(marker.take())
                .send()
                .await
            {
                Ok(page) => page,
                Err(e) if is_no_such_upload(&e) => return Err(StoreError::NoSuchUpload(upload_id.to_string())),
                Err(e) => return Err(StoreError::backend("list_parts", object_key, DisplayErrorContext(&e))),
            };

            for part in page.parts() {
                if let Some(part_number) = part.part_number() {
                    parts.push(UploadedPart {
                        part_number,
                        size: part.size().unwrap_or_default(),
                        etag: part.e_tag().unwrap_or_default().trim_matches('"').to_string(),
                    });
                }
            }

            if !page.is_truncated().unwrap_or(false) {
                break;
            }
            marker = page.next_part_number_marker().map(str::to_string);
            if marker.is_none() {
                break;
            }
        }
        Ok(parts)
    }

    async fn presign_part(
        &self,
        key: &str,
        upload_id: &str,
        part_number: i32,
        expires_in: Duration,
    ) -> Result<String> {
        let object_key = self.base.object_key(key);
        let presigned = self
            .base
            .client()
            .upload_part()
            .bucket(self.base.bucket())
            .key(&object_key)
            .upload_id(upload_id)
            .part_number(part_number)
            .presigned(self.base.presigning(expires_in)?)
            .await
            .map_err(|e| StoreError::backend("presign_upload_part", object_key.clone(), DisplayErrorContext(&e)))?;
        Ok(presigned.uri().to_string())
    }

    async fn complete_upload(&self, key: &str, upload_id: &str, parts: &[CompletedPart]) -> Result<()> {
        let object_key = self.base.object_key(key);
        let completed = parts
            .iter()
            .map(|part| {
                S3CompletedPart::builder()
                    .part_number(part.part_number)
                    .e_tag(part.etag.clone())
                    .build()
            })
            .collect();

        match self
            .base
            .client()
            .complete_multipart_upload()
            .bucket(self.base.bucket())
            .key(&object_key)
            .upload_id(upload_id)
            .multipart_upload(CompletedMultipartUpload::builder().set_parts(Some(completed)).build())
            .send()
            .await
        {
            Ok(_) => {
                info!(key = %object_key, upload_id = %upload_id, parts = parts.len(), "completed multipart upload");
                Ok(())
            }
            Err(e) if is_no_such_upload(&e) => Err(StoreError::NoSuchUpload(upload_id.to_string())),
            Err(e) if e.as_service_error().and_then(|s| s.code()) == Some("InvalidPart") => {
                Err(StoreError::InvalidPart(upload_id.to_string()))
            }
            Err(e) => Err(StoreError::backend("complete_multipart_upload", object_key, DisplayErrorContext(&e))),
        }
    }

    async fn abort_upload(&self, key: &str, upload_id: &str) -> Result<()> {
        let object_key = self.base.object_key(key);
        match self
            .base
            .client()
            .abort_multipart_upload()
            .bucket(self.base.bucket())
            .key(&object_key)
            .upload_id(upload_id)
            .send()
            .await
        {
            Ok(_) => {
                warn!(key = %object_key, upload_id = %upload_id, "aborted multipart upload");
                Ok(())
            }
            Err(e) if is_no_such_upload(&e) => Err(StoreError::NoSuchUpload(upload_id.to_string())),
            Err(e) => Err(StoreError::backend("abort_multipart_upload", object_key, DisplayErrorContext(&e))),
        }
    }
}
