//! Durable storage for grant records.
//!
//! Every accepted write bumps `meta.resource_version`; an update carrying a
//! stale version is rejected with [`StoreError::Conflict`], the only write
//! failure callers are expected to retry.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use sitelink_core::GrantRecord;

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn get(&self, namespace: &str, name: &str) -> Result<GrantRecord, StoreError>;

    async fn list(&self) -> Result<Vec<GrantRecord>, StoreError>;

    /// Insert a new record. Assigns `uid` when empty and starts the version at 1.
    async fn create(&self, record: GrantRecord) -> Result<GrantRecord, StoreError>;

    /// Replace a record if `uid` and `resource_version` still match.
    async fn update(&self, record: &GrantRecord) -> Result<GrantRecord, StoreError>;

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError>;
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("version conflict on {0}")]
    Conflict(String),
    #[error("{0} not found")]
    NotFound(String),
    #[error("{0} already exists")]
    AlreadyExists(String),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupted record: {0}")]
    Corrupted(#[from] serde_json::Error),
}

impl StoreError {
    pub fn is_conflict(&self) -> bool {
        matches!(self, StoreError::Conflict(_))
    }
}

fn key(namespace: &str, name: &str) -> String {
    format!("{}/{}", namespace, name)
}
