//! SQLite-backed object store.
//!
//! Records are stored as JSON next to their identity columns. Version
//! checks happen inside the `UPDATE ... WHERE` so concurrent writers are
//! arbitrated by the database, not by this process.

use std::path::Path;

use async_trait::async_trait;
use sitelink_core::GrantRecord;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use super::{key, ObjectStore, StoreError};

#[derive(Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Open or create a database at the given path.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                sqlx::Error::Configuration(format!("Failed to create db directory: {}", e).into())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .synchronous(sqlx::sqlite::SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        Self::new(pool).await
    }

    /// Wrap an existing pool, creating the table if needed.
    pub async fn new(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS grants (
                namespace TEXT NOT NULL,
                name TEXT NOT NULL,
                uid TEXT NOT NULL UNIQUE,
                resource_version INTEGER NOT NULL,
                body TEXT NOT NULL,
                PRIMARY KEY (namespace, name)
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn decode(body: &str) -> Result<GrantRecord, StoreError> {
        Ok(serde_json::from_str(body)?)
    }
}

#[async_trait]
impl ObjectStore for SqliteStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<GrantRecord, StoreError> {
        let row = sqlx::query("SELECT body FROM grants WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Self::decode(row.get("body")),
            None => Err(StoreError::NotFound(key(namespace, name))),
        }
    }

    async fn list(&self) -> Result<Vec<GrantRecord>, StoreError> {
        let rows = sqlx::query("SELECT body FROM grants ORDER BY namespace, name")
            .fetch_all(&self.pool)
            .await?;

        rows.iter().map(|row| Self::decode(row.get("body"))).collect()
    }

    async fn create(&self, mut record: GrantRecord) -> Result<GrantRecord, StoreError> {
        if record.meta.uid.is_empty() {
            record.meta.uid = Uuid::new_v4().to_string();
        }
        record.meta.resource_version = 1;
        let body = serde_json::to_string(&record)?;

        let result = sqlx::query(
            "INSERT OR IGNORE INTO grants (namespace, name, uid, resource_version, body)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(&record.meta.namespace)
        .bind(&record.meta.name)
        .bind(&record.meta.uid)
        .bind(record.meta.resource_version as i64)
        .bind(&body)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists(record.identity()));
        }
        Ok(record)
    }

    async fn update(&self, record: &GrantRecord) -> Result<GrantRecord, StoreError> {
        let mut next = record.clone();
        next.meta.resource_version += 1;
        let body = serde_json::to_string(&next)?;

        // Single conditional UPDATE: the version check and the write are atomic.
        let result = sqlx::query(
            "UPDATE grants SET resource_version = ?, body = ?
             WHERE namespace = ? AND name = ? AND uid = ? AND resource_version = ?",
        )
        .bind(next.meta.resource_version as i64)
        .bind(&body)
        .bind(&record.meta.namespace)
        .bind(&record.meta.name)
        .bind(&record.meta.uid)
        .bind(record.meta.resource_version as i64)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            let exists = sqlx::query("SELECT 1 FROM grants WHERE namespace = ? AND name = ?")
                .bind(&record.meta.namespace)
                .bind(&record.meta.name)
                .fetch_optional(&self.pool)
                .await?
                .is_some();
            return Err(if exists {
                StoreError::Conflict(record.identity())
            } else {
                StoreError::NotFound(record.identity())
            });
        }

        Ok(next)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM grants WHERE namespace = ? AND name = ?")
            .bind(namespace)
            .bind(name)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(key(namespace, name)));
        }
        Ok(())
    }
}
