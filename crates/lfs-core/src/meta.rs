//! Per-repository object ownership records
//!
//! A stored object is deduplicated across repositories; each repository that
//! may reference it owns one `MetaObject` row keyed by `(repository_id, oid)`.

use crate::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use lfs_store::Pointer;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Ownership row linking a repository to a stored object
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetaObject {
    pub repository_id: i64,
    pub oid: String,
    pub size: i64,
    pub created_at: DateTime<Utc>,
}

impl MetaObject {
    pub fn new(repository_id: i64, pointer: &Pointer) -> Self {
        Self {
            repository_id,
            oid: pointer.oid.clone(),
            size: pointer.size,
            created_at: Utc::now(),
        }
    }

    pub fn pointer(&self) -> Pointer {
        Pointer::new(self.oid.clone(), self.size)
    }
}

/// CRUD access to ownership rows
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Fetch the row for `oid` in a repository
    async fn get(&self, repository_id: i64, oid: &str) -> Result<Option<MetaObject>>;

    /// Insert a row unless one exists. Returns the stored row and whether it
    /// was already present.
    async fn create(&self, row: MetaObject) -> Result<(MetaObject, bool)>;

    /// Delete the row, returning how many rows remain for `oid` across all
    /// repositories
    async fn remove(&self, repository_id: i64, oid: &str) -> Result<usize>;

    /// Repositories holding a row for `oid`
    async fn repositories_with(&self, oid: &str) -> Result<Vec<i64>>;

    /// All rows of a repository, ordered by oid
    async fn list(&self, repository_id: i64) -> Result<Vec<MetaObject>>;
}

/// In-memory `MetaStore`
#[derive(Clone, Default)]
pub struct MemoryMetaStore {
    rows: Arc<DashMap<(i64, String), MetaObject>>,
}

impl MemoryMetaStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn get(&self, repository_id: i64, oid: &str) -> Result<Option<MetaObject>> {
        Ok(self
            .rows
            .get(&(repository_id, oid.to_string()))
            .map(|row| row.value().clone()))
    }

    async fn create(&self, row: MetaObject) -> Result<(MetaObject, bool)> {
        let key = (row.repository_id, row.oid.clone());
        let entry = self.rows.entry(key);
        match entry {
            dashmap::mapref::entry::Entry::Occupied(existing) => Ok((existing.get().clone(), true)),
            dashmap::mapref::entry::Entry::Vacant(slot) => {
                slot.insert(row.clone());
                Ok((row, false))
            }
        }
    }

    async fn remove(&self, repository_id: i64, oid: &str) -> Result<usize> {
        self.rows.remove(&(repository_id, oid.to_string()));
        Ok(self.rows.iter().filter(|row| row.key().1 == oid).count())
    }

    async fn repositories_with(&self, oid: &str) -> Result<Vec<i64>> {
        let mut ids: Vec<i64> = self
            .rows
            .iter()
            .filter(|row| row.key().1 == oid)
            .map(|row| row.key().0)
            .collect();
        ids.sort_unstable();
        Ok(ids)
    }

    async fn list(&self, repository_id: i64) -> Result<Vec<MetaObject>> {
        let mut rows: Vec<MetaObject> = self
            .rows
            .iter()
            .filter(|row| row.key().0 == repository_id)
            .map(|row| row.value().clone())
            .collect();
        rows.sort_by(|a, b| a.oid.cmp(&b.oid));
        Ok(rows)
    }
}
