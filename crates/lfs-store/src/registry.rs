//! Storage backend registry
//!
//! Maps a backend kind tag from configuration to the constructor that builds
//! it. The registry is consulted once at startup and yields a single
//! `Arc<dyn ContentStore>` for the rest of the process.

use crate::{ContentStore, LocalStore, MemoryStore, Result, S3Config, S3MultipartStore, S3Store, StoreError};
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Storage section of the service configuration
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend kind tag: `memory`, `local`, `minio` or `s3`
    pub kind: String,
    /// Root directory for the `local` backend
    pub local_path: Option<PathBuf>,
    /// Bucket settings for `minio` and `s3`
    pub s3: Option<S3Config>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: "local".to_string(),
            local_path: Some(PathBuf::from("data/lfs")),
            s3: None,
        }
    }
}

impl StorageConfig {
    fn require_s3(&self) -> Result<&S3Config> {
        self.s3
            .as_ref()
            .ok_or_else(|| StoreError::Configuration(format!("{} storage needs an s3 section", self.kind)))
    }
}

/// Builds a content store from configuration
pub type StoreConstructor = for<'a> fn(&'a StorageConfig) -> BoxFuture<'a, Result<Arc<dyn ContentStore>>>;

/// Kind tag to constructor mapping
#[derive(Clone, Default)]
pub struct StoreRegistry {
    constructors: HashMap<String, StoreConstructor>,
}

impl StoreRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry with the built-in backends
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("memory", build_memory);
        registry.register("local", build_local);
        registry.register("minio", build_minio);
        registry.register("s3", build_s3);
        registry
    }

    /// Register or replace the constructor for `kind`
    pub fn register(&mut self, kind: &str, constructor: StoreConstructor) {
        self.constructors.insert(kind.to_string(), constructor);
    }

    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.constructors.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    /// Resolve `config.kind` and build the store
    pub async fn build(&self, config: &StorageConfig) -> Result<Arc<dyn ContentStore>> {
        let constructor = self.constructors.get(&config.kind).ok_or_else(|| {
            StoreError::Configuration(format!(
                "unknown storage kind {:?}, expected one of {:?}",
                config.kind,
                self.kinds()
            ))
        })?;
        let store = constructor(config).await?;
        tracing::info!(kind = store.kind(), "content store ready");
        Ok(store)
    }
}

fn build_memory(_config: &StorageConfig) -> BoxFuture<'_, Result<Arc<dyn ContentStore>>> {
    Box::pin(async { Ok(Arc::new(MemoryStore::new()) as Arc<dyn ContentStore>) })
}

fn build_local(config: &StorageConfig) -> BoxFuture<'_, Result<Arc<dyn ContentStore>>> {
    Box::pin(async move {
        let path = config
            .local_path
            .clone()
            .ok_or_else(|| StoreError::Configuration("local storage needs local_path".to_string()))?;
        Ok(Arc::new(LocalStore::new(path).await?) as Arc<dyn ContentStore>)
    })
}

fn build_minio(config: &StorageConfig) -> BoxFuture<'_, Result<Arc<dyn ContentStore>>> {
    Box::pin(async move {
        let store = S3Store::connect(config.require_s3()?).await?;
        Ok(Arc::new(store) as Arc<dyn ContentStore>)
    })
}

fn build_s3(config: &StorageConfig) -> BoxFuture<'_, Result<Arc<dyn ContentStore>>> {
    Box::pin(async move {
        let base = S3Store::connect(config.require_s3()?).await?;
        Ok(Arc::new(S3MultipartStore::new(base)) as Arc<dyn ContentStore>)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_builds_registered_kinds() {
        let registry = StoreRegistry::with_defaults();
        assert_eq!(registry.kinds(), vec!["local", "memory", "minio", "s3"]);

        let memory = StorageConfig {
            kind: "memory".to_string(),
            ..StorageConfig::default()
        };
        assert_eq!(registry.build(&memory).await.unwrap().kind(), "memory");

        let dir = TempDir::new().unwrap();
        let local = StorageConfig {
            kind: "local".to_string(),
            local_path: Some(dir.path().to_path_buf()),
            s3: None,
        };
        let store = registry.build(&local).await.unwrap();
        assert_eq!(store.kind(), "local");
        assert!(store.multipart().is_none());
    }

    #[tokio::test]
    async fn test_unknown_kind() {
        let config = StorageConfig {
            kind: "tape".to_string(),
            ..StorageConfig::default()
        };
        let err = StoreRegistry::with_defaults().build(&config).await.err().unwrap();
        assert!(matches!(err, StoreError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_s3_requires_section() {
        let config = StorageConfig {
            kind: "s3".to_string(),
            local_path: None,
            s3: None,
        };
        assert!(StoreRegistry::with_defaults().build(&config).await.is_err());
    }

    #[tokio::test]
    async fn test_custom_constructor() {
        fn build_plain(_config: &StorageConfig) -> BoxFuture<'_, Result<Arc<dyn ContentStore>>> {
            Box::pin(async { Ok(Arc::new(MemoryStore::without_multipart()) as Arc<dyn ContentStore>) })
        }

        let mut registry = StoreRegistry::new();
        registry.register("plain", build_plain);
        let config = StorageConfig {
            kind: "plain".to_string(),
            ..StorageConfig::default()
        };
        assert!(registry.build(&config).await.unwrap().multipart().is_none());
    }
}
