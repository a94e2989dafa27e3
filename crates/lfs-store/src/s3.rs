//! S3-compatible content store
//!
//! Basic object operations against any S3-compatible endpoint (AWS, MinIO,
//! RustFS and friends). Presigned GET URLs are handed out when
//! `serve_direct` is on. Multipart support lives in
//! [`S3MultipartStore`](crate::S3MultipartStore), which wraps this type.

use crate::{ContentStore, Intake, KeyStream, ObjectStream, Pointer, Result, StoreError, PRESIGN_EXPIRY};
use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_credential_types::Credentials;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::time::{Duration, Instant};
use tokio::io::AsyncWriteExt;
use tokio_util::io::ReaderStream;
use tracing::{debug, error, info};
use url::Url;

/// Connection settings for an S3-compatible bucket
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct S3Config {
    /// Custom endpoint, e.g. `http://localhost:9000` for MinIO
    pub endpoint: Option<String>,
    pub bucket: String,
    pub region: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Key prefix inside the bucket
    pub base_path: String,
    /// Hand out presigned URLs for direct client downloads
    pub serve_direct: bool,
    /// Host that replaces the endpoint host in presigned URLs (CDN)
    pub public_domain: Option<String>,
    pub force_path_style: bool,
    pub presign_expiry_secs: u64,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            endpoint: None,
            bucket: "lfs".to_string(),
            region: "us-east-1".to_string(),
            access_key_id: String::new(),
            secret_access_key: String::new(),
            base_path: "lfs/".to_string(),
            serve_direct: false,
            public_domain: None,
            force_path_style: true,
            presign_expiry_secs: PRESIGN_EXPIRY.as_secs(),
        }
    }
}

/// Content store backed by an S3 bucket
#[derive(Clone, Debug)]
pub struct S3Store {
    client: Client,
    bucket: String,
    base_path: String,
    serve_direct: bool,
    public_domain: Option<String>,
    presign_expiry: Duration,
}

impl S3Store {
    /// Build a client from `config` and wrap it
    pub async fn connect(config: &S3Config) -> Result<Self> {
        if config.bucket.is_empty() {
            return Err(StoreError::Configuration("s3 bucket is required".to_string()));
        }

        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.clone(),
            None,
            None,
            "lfs-config",
        );
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials);
        if let Some(endpoint) = &config.endpoint {
            loader = loader.endpoint_url(endpoint.clone());
        }
        let shared = loader.load().await;

        let client = Client::from_conf(
            aws_sdk_s3::config::Builder::from(&shared)
                .force_path_style(config.force_path_style)
                .build(),
        );

        info!(
            bucket = %config.bucket,
            endpoint = ?config.endpoint,
            serve_direct = config.serve_direct,
            "S3 content store configured"
        );
        Ok(Self::from_client(client, config))
    }

    /// Wrap an existing client
    pub fn from_client(client: Client, config: &S3Config) -> Self {
        Self {
            client,
            bucket: config.bucket.clone(),
            base_path: config.base_path.trim_matches('/').to_string(),
            serve_direct: config.serve_direct,
            public_domain: config.public_domain.clone().filter(|d| !d.is_empty()),
            presign_expiry: Duration::from_secs(config.presign_expiry_secs),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Full bucket key for a relative storage key
    pub fn object_key(&self, key: &str) -> String {
        if self.base_path.is_empty() {
            key.to_string()
        } else {
            format!("{}/{}", self.base_path, key)
        }
    }

    /// Relative storage key for a full bucket key
    fn relative_key<'a>(&self, object_key: &'a str) -> &'a str {
        if self.base_path.is_empty() {
            return object_key;
        }
        object_key
            .strip_prefix(self.base_path.as_str())
            .and_then(|rest| rest.strip_prefix('/'))
            .unwrap_or(object_key)
    }

    pub(crate) fn presigning(&self, expires_in: Duration) -> Result<PresigningConfig> {
        PresigningConfig::expires_in(expires_in).map_err(|e| StoreError::Configuration(e.to_string()))
    }

    /// Point a presigned URL at the public domain, forcing https
    pub(crate) fn rewrite_public(&self, presigned: &str) -> Result<String> {
        let Some(domain) = &self.public_domain else {
            return Ok(presigned.to_string());
        };
        let mut url = Url::parse(presigned).map_err(|e| StoreError::backend("presign", presigned, e))?;
        let (host, port) = match domain.rsplit_once(':') {
            Some((host, port)) => (host, port.parse::<u16>().ok()),
            None => (domain.as_str(), None),
        };
        let invalid = |_| StoreError::Configuration(format!("invalid public domain {domain}"));
        url.set_scheme("https").map_err(invalid)?;
        url.set_host(Some(host))
            .map_err(|e| StoreError::Configuration(format!("invalid public domain {domain}: {e}")))?;
        url.set_port(port).map_err(invalid)?;
        Ok(url.to_string())
    }
}

#[async_trait]
impl ContentStore for S3Store {
    fn kind(&self) -> &'static str {
        "minio"
    }

    async fn exists(&self, pointer: &Pointer) -> Result<bool> {
        let key = self.object_key(&pointer.relative_path());
        match self.client.head_object().bucket(&self.bucket).key(&key).send().await {
            Ok(_) => Ok(true),
            Err(e) if e.as_service_error().map(|s| s.is_not_found()).unwrap_or(false) => Ok(false),
            Err(e) => Err(StoreError::backend("head_object", key, DisplayErrorContext(&e))),
        }
    }

    async fn get(&self, pointer: &Pointer, offset: u64) -> Result<ObjectStream> {
        let key = self.object_key(&pointer.relative_path());
        let mut request = self.client.get_object().bucket(&self.bucket).key(&key);
        if offset > 0 {
            request = request.range(format!("bytes={offset}-"));
        }

        let response = match request.send().await {
            Ok(response) => response,
            Err(e) if e.as_service_error().map(|s| s.is_no_such_key()).unwrap_or(false) => {
                return Err(StoreError::NotFound(pointer.relative_path()))
            }
            Err(e) => return Err(StoreError::backend("get_object", key, DisplayErrorContext(&e))),
        };

        Ok(ReaderStream::new(response.body.into_async_read()).boxed())
    }

    async fn put(&self, pointer: &Pointer, mut body: ObjectStream) -> Result<()> {
        let key = self.object_key(&pointer.relative_path());
        let start = Instant::now();

        // Spool to disk so the hash is known before anything reaches the bucket.
        let spool = tempfile::NamedTempFile::new()?;
        let mut file = tokio::fs::File::from_std(spool.reopen()?);
        let mut intake = Intake::new(pointer);
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            intake.feed(&chunk)?;
            file.write_all(&chunk).await?;
        }
        file.flush().await?;
        intake.finish()?;

        let payload = ByteStream::from_path(spool.path())
            .await
            .map_err(|e| StoreError::backend("put_object", key.clone(), e))?;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .content_length(pointer.size)
            .body(payload)
            .send()
            .await
            .map_err(|e| {
                error!(bucket = %self.bucket, key = %key, error = %DisplayErrorContext(&e), "S3 upload failed");
                StoreError::backend("put_object", key.clone(), DisplayErrorContext(&e))
            })?;

        info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = pointer.size,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );
        Ok(())
    }

    async fn url(&self, pointer: &Pointer, filename: &str) -> Result<Option<String>> {
        if !self.serve_direct {
            return Ok(None);
        }
        let key = self.object_key(&pointer.relative_path());
        let mut request = self.client.get_object().bucket(&self.bucket).key(&key);
        if !filename.is_empty() {
            request = request.response_content_disposition(format!(
                "attachment; filename=\"{}\"",
                filename.replace('"', "\\\"")
            ));
        }
        let presigned = request
            .presigned(self.presigning(self.presign_expiry)?)
            .await
            .map_err(|e| StoreError::backend("presign_get", key.clone(), DisplayErrorContext(&e)))?;

        debug!(key = %key, "issued presigned download URL");
        self.rewrite_public(presigned.uri()).map(Some)
    }

    fn serves_direct(&self) -> bool {
        self.serve_direct
    }

    fn iterate_keys(&self, prefix: &str) -> KeyStream {
        let listing = Listing {
            store: self.clone(),
            prefix: self.object_key(prefix),
            token: None,
            buffer: VecDeque::new(),
            exhausted: false,
        };
        stream::try_unfold(listing, |mut listing| async move {
            let key = listing.next_key().await?;
            Ok::<_, StoreError>(key.map(|key| (key, listing)))
        })
        .boxed()
    }
}

/// Paged `list_objects_v2` state for `iterate_keys`
struct Listing {
    store: S3Store,
    prefix: String,
    token: Option<String>,
    buffer: VecDeque<String>,
    exhausted: bool,
}

impl Listing {
    async fn next_key(&mut self) -> Result<Option<String>> {
        loop {
            if let Some(key) = self.buffer.pop_front() {
                return Ok(Some(key));
            }
            if self.exhausted {
                return Ok(None);
            }

            let page = self
                .store
                .client
                .list_objects_v2()
                .bucket(&self.store.bucket)
                .prefix(&self.prefix)
                .set_continuation_token(self.token.take())
                .send()
                .await
                .map_err(|e| StoreError::backend("list_objects_v2", self.prefix.clone(), DisplayErrorContext(&e)))?;

            for object in page.contents() {
                if let Some(key) = object.key() {
                    self.buffer.push_back(self.store.relative_key(key).to_string());
                }
            }
            self.token = page.next_continuation_token().map(str::to_string);
            self.exhausted = !page.is_truncated().unwrap_or(false) || self.token.is_none();
        }
    }
}
