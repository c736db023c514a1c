//! In-memory grant registry.
//!
//! The registry caches every grant record the watcher has seen and is the
//! single place redemptions are decided. One mutex guards the cache; store
//! I/O always runs with the lock released.
//!
//! # Redemption
//!
//! A redemption validates the cached record and reserves one slot under the
//! lock, then persists `claimed + 1` with bounded retry. Outstanding
//! reservations count against the quota, so concurrent callers can never
//! consume more slots than the quota allows.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::Utc;
use sitelink_core::{GrantRecord, GrantSchema, Normalization, Refusal};

use crate::retry::{with_retry, RetryPolicy};
use crate::store::{ObjectStore, StoreError};

/// Why a redemption did not go through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RedeemError {
    /// Unknown, pending, expired or exhausted.
    #[error("No such claim")]
    NotFound,
    #[error("Claim refused")]
    Forbidden,
    #[error("Corrupted claim")]
    Corrupted,
    /// The usage counter could not be persisted.
    #[error("Internal error")]
    Unavailable,
}

impl From<Refusal> for RedeemError {
    fn from(refusal: Refusal) -> Self {
        match refusal {
            Refusal::NotFound => RedeemError::NotFound,
            Refusal::Forbidden => RedeemError::Forbidden,
            Refusal::Corrupted => RedeemError::Corrupted,
        }
    }
}

struct Entry {
    record: GrantRecord,
    /// Redemptions validated but not yet persisted.
    reserved: u32,
}

#[derive(Default)]
struct Inner {
    /// Keyed by uid, the redemption key.
    entries: HashMap<String, Entry>,
    /// `namespace/name` to uid.
    by_identity: HashMap<String, String>,
    normalization: Normalization,
}

impl Inner {
    /// Cache `record` under `identity`. Returns the uid now cached.
    ///
    /// A different uid evicts the previous entry; an older version of the
    /// same uid is ignored.
    fn upsert(&mut self, identity: &str, record: GrantRecord) -> String {
        let uid = record.meta.uid.clone();
        if let Some(previous) = self.by_identity.get(identity) {
            if *previous != uid {
                self.entries.remove(previous);
            }
        }
        self.by_identity.insert(identity.to_string(), uid.clone());

        match self.entries.get_mut(&uid) {
            Some(entry) if entry.record.meta.resource_version > record.meta.resource_version => {}
            Some(entry) => entry.record = record,
            None => {
                self.entries.insert(
                    uid.clone(),
                    Entry {
                        record,
                        reserved: 0,
                    },
                );
            }
        }
        uid
    }
}

enum WriteFailure {
    Store(StoreError),
    Refused(Refusal),
}

pub struct Registry {
    store: Arc<dyn ObjectStore>,
    inner: Mutex<Inner>,
    retry: RetryPolicy,
}

impl Registry {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self::with_retry_policy(store, RetryPolicy::default())
    }

    pub fn with_retry_policy(store: Arc<dyn ObjectStore>, retry: RetryPolicy) -> Self {
        Self {
            store,
            inner: Mutex::new(Inner::default()),
            retry,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Insert or replace the cached record for `identity`.
    pub fn upsert(&self, identity: &str, record: GrantRecord) {
        self.lock().upsert(identity, record);
    }

    /// Drop the cached record for `identity`, if any.
    pub fn remove(&self, identity: &str) {
        let mut inner = self.lock();
        if let Some(uid) = inner.by_identity.remove(identity) {
            inner.entries.remove(&uid);
            tracing::debug!(grant = %identity, "Grant evicted from registry");
        }
    }

    /// Normalize a record and persist it if anything changed.
    ///
    /// Returns whether a write was made. On a failed write the cache keeps
    /// the received record and the next notification retries.
    pub async fn reconcile(&self, identity: &str, record: GrantRecord) -> Result<bool, StoreError> {
        let candidate = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            let uid = inner.upsert(identity, record);
            let Some(entry) = inner.entries.get(&uid) else {
                return Ok(false);
            };
            let mut candidate = entry.record.clone();
            if !candidate.normalize(&inner.normalization, Utc::now()) {
                return Ok(false);
            }
            candidate
        };

        match self.store.update(&candidate).await {
            Ok(stored) => {
                tracing::info!(
                    grant = %identity,
                    status = %stored.status,
                    version = stored.meta.resource_version,
                    "Grant reconciled"
                );
                self.lock().upsert(identity, stored);
                Ok(true)
            }
            Err(e) => {
                tracing::warn!(grant = %identity, error = %e, "Failed to update grant");
                Err(e)
            }
        }
    }

    /// Attempt one redemption of the grant whose uid is `key`.
    ///
    /// # Security
    ///
    /// The presented secret is compared in constant time, and only after
    /// availability checks. Unknown, expired and exhausted grants all
    /// answer [`RedeemError::NotFound`].
    pub async fn redeem(&self, key: &str, presented: &[u8]) -> Result<GrantRecord, RedeemError> {
        let (snapshot, normalization) = {
            let mut inner = self.lock();
            let inner = &mut *inner;
            let entry = inner.entries.get_mut(key).ok_or(RedeemError::NotFound)?;
            entry
                .record
                .check_redeemable(presented, entry.reserved, Utc::now())?;
            entry.reserved += 1;
            (entry.record.clone(), inner.normalization.clone())
        };

        let store = &self.store;
        let result = with_retry(
            self.retry,
            |e: &WriteFailure| matches!(e, WriteFailure::Store(e) if e.is_conflict()),
            |attempt| {
                let snapshot = snapshot.clone();
                let normalization = normalization.clone();
                async move {
                    let mut current = if attempt == 1 {
                        snapshot
                    } else {
                        // Someone else wrote first: start over from the stored value.
                        let latest = match store
                            .get(&snapshot.meta.namespace, &snapshot.meta.name)
                            .await
                        {
                            Ok(latest) => latest,
                            Err(e) => return Err(WriteFailure::Store(e)),
                        };
                        if latest.meta.uid != snapshot.meta.uid {
                            return Err(WriteFailure::Refused(Refusal::NotFound));
                        }
                        if let Err(refusal) = latest.check_redeemable(presented, 0, Utc::now()) {
                            return Err(WriteFailure::Refused(refusal));
                        }
                        latest
                    };
                    current.claimed += 1;
                    current.normalize(&normalization, Utc::now());
                    store.update(&current).await.map_err(WriteFailure::Store)
                }
            },
        )
        .await;

        let mut inner = self.lock();
        if let Some(entry) = inner.entries.get_mut(key) {
            entry.reserved = entry.reserved.saturating_sub(1);
        }

        match result {
            Ok(stored) => {
                let identity = stored.identity();
                inner.upsert(&identity, stored.clone());
                tracing::info!(
                    grant = %identity,
                    claimed = stored.claimed,
                    quota = ?stored.effective_quota(),
                    "Grant redeemed"
                );
                Ok(stored)
            }
            Err(WriteFailure::Refused(refusal)) => Err(refusal.into()),
            Err(WriteFailure::Store(e)) => {
                tracing::warn!(
                    grant = %snapshot.identity(),
                    error = %e,
                    "Could not persist redemption"
                );
                Err(RedeemError::Unavailable)
            }
        }
    }

    /// Set the base redemption URL. Returns whether it changed.
    pub fn set_base_url(&self, base_url: Option<String>) -> bool {
        let mut inner = self.lock();
        if inner.normalization.base_url == base_url {
            return false;
        }
        tracing::info!(base_url = ?base_url, "Redemption base URL updated");
        inner.normalization.base_url = base_url;
        true
    }

    /// Set the CA handed to redeemers. Returns whether it changed.
    pub fn set_ca(&self, ca: Option<String>) -> bool {
        let mut inner = self.lock();
        if inner.normalization.ca == ca {
            return false;
        }
        inner.normalization.ca = ca;
        true
    }

    pub fn base_url(&self) -> Option<String> {
        self.lock().normalization.base_url.clone()
    }

    /// Reconcile every cached record. Returns the number written.
    pub async fn recheck(&self) -> usize {
        let cached: Vec<(String, GrantRecord)> = {
            let inner = self.lock();
            inner
                .entries
                .values()
                .map(|e| (e.record.identity(), e.record.clone()))
                .collect()
        };

        let mut written = 0;
        for (identity, record) in cached {
            if let Ok(true) = self.reconcile(&identity, record).await {
                written += 1;
            }
        }
        written
    }

    /// Schema of the grant whose uid is `key`.
    pub fn schema_of(&self, key: &str) -> Option<GrantSchema> {
        self.lock().entries.get(key).map(|e| e.record.schema)
    }

    /// Cached record for `identity`.
    pub fn get(&self, identity: &str) -> Option<GrantRecord> {
        let inner = self.lock();
        let uid = inner.by_identity.get(identity)?;
        inner.entries.get(uid).map(|e| e.record.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
