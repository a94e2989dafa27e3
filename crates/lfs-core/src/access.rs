//! Identity and permission collaborators
//!
//! Repository lookup, user lookup, opaque access tokens and the permission
//! model are owned by the hosting platform. The traits here are the slice of
//! them the gate consumes. `MemoryDirectory` implements all of them for
//! development and tests.

use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use lfs_crypto::hashing::hash;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

/// Access level of an identity on a repository
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccessMode {
    #[default]
    None,
    Read,
    Write,
    Admin,
    Owner,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Repository {
    pub id: i64,
    pub owner: String,
    pub name: String,
    pub is_private: bool,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub name: String,
    pub active: bool,
}

/// An opaque personal access token
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessToken {
    pub user_id: i64,
    /// e.g. `all`, `read:repository`, `write:repository`
    pub scopes: Vec<String>,
}

impl AccessToken {
    /// Whether the token's scopes cover `mode` on repositories
    pub fn allows(&self, mode: AccessMode) -> bool {
        self.scopes.iter().any(|scope| match scope.as_str() {
            "all" | "write:repository" => true,
            "read:repository" => mode <= AccessMode::Read,
            _ => false,
        })
    }
}

/// Pre-authenticated caller context supplied by the session layer
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum Actor {
    #[default]
    Anonymous,
    /// A signed-in user
    User { user_id: i64 },
    /// A CI task acting through its task token
    ServiceTask {
        task_id: i64,
        repository_id: i64,
        is_fork_pull_request: bool,
    },
}

impl Actor {
    pub fn user(user_id: i64) -> Self {
        Self::User { user_id }
    }

    pub fn user_id(&self) -> Option<i64> {
        match self {
            Self::User { user_id } => Some(*user_id),
            _ => None,
        }
    }

    /// Key used for per-caller rate limiting
    pub fn rate_key(&self) -> String {
        match self {
            Self::Anonymous => "anonymous".to_string(),
            Self::User { user_id } => format!("user:{user_id}"),
            Self::ServiceTask { task_id, .. } => format!("task:{task_id}"),
        }
    }
}

#[async_trait]
pub trait RepositoryStore: Send + Sync {
    async fn by_owner_and_name(&self, owner: &str, name: &str) -> Result<Option<Repository>>;

    async fn by_id(&self, id: i64) -> Result<Option<Repository>>;
}

#[async_trait]
pub trait UserStore: Send + Sync {
    async fn user(&self, id: i64) -> Result<Option<User>>;
}

#[async_trait]
pub trait AccessTokenStore: Send + Sync {
    /// Resolve a raw token value
    async fn lookup(&self, token: &str) -> Result<Option<AccessToken>>;
}

#[async_trait]
pub trait PermissionResolver: Send + Sync {
    /// Access level of `user_id` (None for anonymous) on `repository`
    async fn access_level(&self, user_id: Option<i64>, repository: &Repository) -> Result<AccessMode>;
}

/// In-memory directory of repositories, users, tokens and grants
#[derive(Clone, Default)]
pub struct MemoryDirectory {
    repositories: Arc<DashMap<i64, Repository>>,
    /// Lowercased `(owner, name)` to repository id
    names: Arc<DashMap<(String, String), i64>>,
    users: Arc<DashMap<i64, User>>,
    tokens: Arc<DashMap<String, AccessToken>>,
    grants: Arc<DashMap<(i64, i64), AccessMode>>,
    next_id: Arc<AtomicI64>,
    auto_create: bool,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create unknown repositories on first lookup (development mode)
    pub fn with_auto_create(mut self, auto_create: bool) -> Self {
        self.auto_create = auto_create;
        self
    }

    fn allocate_id(&self) -> i64 {
        self.next_id.fetch_add(1, Ordering::SeqCst) + 1
    }

    pub fn add_repository(&self, owner: &str, name: &str, is_private: bool) -> Repository {
        let repository = Repository {
            id: self.allocate_id(),
            owner: owner.to_string(),
            name: name.to_string(),
            is_private,
        };
        self.repositories.insert(repository.id, repository.clone());
        self.names.insert(name_key(owner, name), repository.id);
        repository
    }

    pub fn add_user(&self, name: &str) -> User {
        let user = User {
            id: self.allocate_id(),
            name: name.to_string(),
            active: true,
        };
        self.users.insert(user.id, user.clone());
        user
    }

    pub fn deactivate_user(&self, user_id: i64) {
        if let Some(mut user) = self.users.get_mut(&user_id) {
            user.active = false;
        }
    }

    pub fn grant(&self, user_id: i64, repository_id: i64, mode: AccessMode) {
        self.grants.insert((user_id, repository_id), mode);
    }

    /// Register an opaque token; only its digest is kept
    pub fn add_token(&self, token: &str, user_id: i64, scopes: &[&str]) {
        self.tokens.insert(
            hash(token.as_bytes()).to_hex(),
            AccessToken {
                user_id,
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
            },
        );
    }
}

fn name_key(owner: &str, name: &str) -> (String, String) {
    (owner.to_ascii_lowercase(), name.to_ascii_lowercase())
}

#[async_trait]
impl RepositoryStore for MemoryDirectory {
    async fn by_owner_and_name(&self, owner: &str, name: &str) -> Result<Option<Repository>> {
        let key = name_key(owner, name);
        let existing = self.names.get(&key).map(|id| *id);
        let id = match existing {
            Some(id) => id,
            None if self.auto_create => *self.names.entry(key).or_insert_with(|| {
                tracing::debug!(owner, name, "auto-creating repository");
                let repository = Repository {
                    id: self.allocate_id(),
                    owner: owner.to_string(),
                    name: name.to_string(),
                    is_private: false,
                };
                let id = repository.id;
                self.repositories.insert(id, repository);
                id
            }),
            None => return Ok(None),
        };
        Ok(self.repositories.get(&id).map(|repo| repo.value().clone()))
    }

    async fn by_id(&self, id: i64) -> Result<Option<Repository>> {
        Ok(self.repositories.get(&id).map(|repo| repo.value().clone()))
    }
}

#[async_trait]
impl UserStore for MemoryDirectory {
    async fn user(&self, id: i64) -> Result<Option<User>> {
        Ok(self.users.get(&id).map(|user| user.value().clone()))
    }
}

#[async_trait]
impl AccessTokenStore for MemoryDirectory {
    async fn lookup(&self, token: &str) -> Result<Option<AccessToken>> {
        Ok(self
            .tokens
            .get(&hash(token.as_bytes()).to_hex())
            .map(|t| t.value().clone()))
    }
}

#[async_trait]
impl PermissionResolver for MemoryDirectory {
    async fn access_level(&self, user_id: Option<i64>, repository: &Repository) -> Result<AccessMode> {
        let public = if repository.is_private {
            AccessMode::None
        } else {
            AccessMode::Read
        };
        let Some(user_id) = user_id else {
            return Ok(public);
        };

        let Some(user) = self.users.get(&user_id).map(|u| u.value().clone()) else {
            return Ok(AccessMode::None);
        };
        if !user.active {
            return Ok(AccessMode::None);
        }
        if user.name.eq_ignore_ascii_case(&repository.owner) {
            return Ok(AccessMode::Owner);
        }
        let granted = self
            .grants
            .get(&(user_id, repository.id))
            .map(|g| *g.value())
            .unwrap_or_default();
        Ok(granted.max(public))
    }
}
