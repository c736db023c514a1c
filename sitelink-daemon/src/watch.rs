//! Polling watch over the grant store.
//!
//! Each poll lists the store, compares `(uid, resource_version)` with the
//! previous poll, and reports creations, updates and deletions to the
//! manager. Writes made by the registry itself come back as updates and
//! reconcile to no-ops. A record whose reconcile failed is reported again
//! on the next poll.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;

use crate::manager::Manager;
use crate::store::{ObjectStore, StoreError};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

pub struct Watcher {
    store: Arc<dyn ObjectStore>,
    manager: Arc<Manager>,
    /// identity to (uid, resource_version) as of the last poll.
    seen: HashMap<String, (String, u64)>,
}

impl Watcher {
    pub fn new(store: Arc<dyn ObjectStore>, manager: Arc<Manager>) -> Self {
        Self {
            store,
            manager,
            seen: HashMap::new(),
        }
    }

    /// One pass. Returns the number of changes reported.
    pub async fn poll_once(&mut self) -> Result<usize, StoreError> {
        let records = self.store.list().await?;
        let mut listed = HashSet::with_capacity(records.len());
        let mut current = HashMap::with_capacity(records.len());
        let mut changes = 0;

        for record in records {
            let identity = record.identity();
            listed.insert(identity.clone());
            let stamp = (record.meta.uid.clone(), record.meta.resource_version);
            if self.seen.get(&identity) == Some(&stamp) {
                current.insert(identity, stamp);
                continue;
            }

            changes += 1;
            match self.manager.grant_changed(&identity, Some(record)).await {
                Ok(_) => {
                    current.insert(identity, stamp);
                }
                Err(e) => {
                    tracing::debug!(
                        grant = %identity,
                        error = %e,
                        "Reconcile failed, retrying on next poll"
                    );
                }
            }
        }

        for identity in self.seen.keys() {
            if !listed.contains(identity) {
                // Removal cannot fail.
                let _ = self.manager.grant_changed(identity, None).await;
                changes += 1;
            }
        }

        self.seen = current;
        Ok(changes)
    }

    /// Poll every `interval` until `shutdown` fires.
    pub async fn run(mut self, interval: Duration, mut shutdown: broadcast::Receiver<()>) {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.recv() => {
                    tracing::info!("Shutdown signal received, stopping grant watch");
                    break;
                }
                _ = ticker.tick() => {
                    match self.poll_once().await {
                        Ok(0) => {}
                        Ok(changes) => tracing::debug!(changes, "Grant changes processed"),
                        Err(e) => tracing::warn!(error = %e, "Failed to list grants"),
                    }
                }
            }
        }
    }
}
