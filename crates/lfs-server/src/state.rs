//! Application state

use crate::config::GatewayConfig;
use lfs_core::{
    AccessTokenStore, CommitHook, MemoryDirectory, MemoryMetaStore, MetaStore, MultipartCoordinator, MultipartSettings,
    NoopHook, PermissionResolver, RepositoryStore, UserStore,
};
use lfs_crypto::TokenCodec;
use lfs_store::{ContentStore, StoreRegistry};
use std::sync::Arc;
use tracing::{info, warn};

/// Identity collaborators owned by the hosting platform
#[derive(Clone)]
pub struct Directory {
    pub repositories: Arc<dyn RepositoryStore>,
    pub users: Arc<dyn UserStore>,
    pub tokens: Arc<dyn AccessTokenStore>,
    pub permissions: Arc<dyn PermissionResolver>,
}

impl Directory {
    /// Serve every collaborator from one in-memory directory
    pub fn from_memory(directory: MemoryDirectory) -> Self {
        let directory = Arc::new(directory);
        Self {
            repositories: directory.clone(),
            users: directory.clone(),
            tokens: directory.clone(),
            permissions: directory,
        }
    }
}

/// Application state shared across handlers
pub struct AppState {
    /// Gateway configuration
    pub config: GatewayConfig,
    /// Content store resolved from the storage registry
    pub store: Arc<dyn ContentStore>,
    /// Per-repository ownership rows
    pub meta: Arc<dyn MetaStore>,
    /// Repository, user, token and permission lookups
    pub directory: Directory,
    /// Multipart upload coordinator
    pub coordinator: MultipartCoordinator,
    /// Capability token codec, absent when no secret is configured
    pub codec: Option<TokenCodec>,
}

impl AppState {
    /// Build the state from configuration with in-memory collaborators
    pub async fn new(config: GatewayConfig) -> anyhow::Result<Self> {
        let store = StoreRegistry::with_defaults().build(&config.storage).await?;
        if store.kind() == "memory" {
            warn!("Storage mode: in-memory (NOT persistent - for development only)");
        }

        // Without auth every repository is reachable, so create them on demand.
        let directory = MemoryDirectory::new().with_auto_create(!config.auth_enabled);

        Self::from_parts(
            config,
            store,
            Arc::new(MemoryMetaStore::new()),
            Directory::from_memory(directory),
            Arc::new(NoopHook),
        )
    }

    /// Assemble the state from explicit collaborators
    pub fn from_parts(
        config: GatewayConfig,
        store: Arc<dyn ContentStore>,
        meta: Arc<dyn MetaStore>,
        directory: Directory,
        hook: Arc<dyn CommitHook>,
    ) -> anyhow::Result<Self> {
        config.validate()?;

        let codec = config
            .jwt_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| TokenCodec::new(secret.as_bytes()));

        let coordinator = MultipartCoordinator::new(
            store.clone(),
            meta.clone(),
            hook,
            MultipartSettings {
                chunk_size: config.multipart_chunk_size,
                part_expiry: config.presign_expiry(),
            },
        );
        info!(
            store = store.kind(),
            multipart = coordinator.is_available(),
            serve_direct = store.serves_direct(),
            "gateway state ready"
        );

        Ok(Self {
            config,
            store,
            meta,
            directory,
            coordinator,
            codec,
        })
    }
}
