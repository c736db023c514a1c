//! In-process object store.

use std::collections::BTreeMap;
use std::sync::Mutex;

use async_trait::async_trait;
use sitelink_core::GrantRecord;
use uuid::Uuid;

use super::{key, ObjectStore, StoreError};

/// Object store held entirely in memory.
#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, GrantRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn objects(&self) -> std::sync::MutexGuard<'_, BTreeMap<String, GrantRecord>> {
        self.objects.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ObjectStore for MemoryStore {
    async fn get(&self, namespace: &str, name: &str) -> Result<GrantRecord, StoreError> {
        let key = key(namespace, name);
        self.objects()
            .get(&key)
            .cloned()
            .ok_or(StoreError::NotFound(key))
    }

    async fn list(&self) -> Result<Vec<GrantRecord>, StoreError> {
        Ok(self.objects().values().cloned().collect())
    }

    async fn create(&self, mut record: GrantRecord) -> Result<GrantRecord, StoreError> {
        let key = record.identity();
        let mut objects = self.objects();
        if objects.contains_key(&key) {
            return Err(StoreError::AlreadyExists(key));
        }
        if record.meta.uid.is_empty() {
            record.meta.uid = Uuid::new_v4().to_string();
        }
        record.meta.resource_version = 1;
        objects.insert(key, record.clone());
        Ok(record)
    }

    async fn update(&self, record: &GrantRecord) -> Result<GrantRecord, StoreError> {
        let key = record.identity();
        let mut objects = self.objects();
        let current = objects
            .get_mut(&key)
            .ok_or_else(|| StoreError::NotFound(key.clone()))?;

        if current.meta.uid != record.meta.uid
            || current.meta.resource_version != record.meta.resource_version
        {
            return Err(StoreError::Conflict(key));
        }

        let mut next = record.clone();
        next.meta.resource_version += 1;
        *current = next.clone();
        Ok(next)
    }

    async fn delete(&self, namespace: &str, name: &str) -> Result<(), StoreError> {
        let key = key(namespace, name);
        self.objects()
            .remove(&key)
            .map(|_| ())
            .ok_or(StoreError::NotFound(key))
    }
}
