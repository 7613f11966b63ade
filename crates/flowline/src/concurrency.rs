//! Per-key serialization used wherever the design calls for "single writer
//! per key, readers lock-free": manifest publish per dataset, run-key
//! creation per `(workflowDefinitionId, runKeyNormalized)`, trigger dedupe
//! per `(triggerId, dedupeKey)`, and auto-materialize claims per
//! `(workflowId, assetId, partitionKey)`.

use dashmap::DashMap;
use std::hash::Hash;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// A map of lazily-created, per-key async mutexes. Distinct keys never
/// block each other; the same key always serializes.
#[derive(Debug)]
pub struct KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    locks: DashMap<K, Arc<Mutex<()>>>,
}

impl<K> Default for KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }
}

impl<K> KeyedLock<K>
where
    K: Eq + Hash + Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `key`, creating its mutex on first use. The
    /// returned guard holds the key's mutex until dropped.
    pub async fn acquire(&self, key: K) -> OwnedMutexGuard<()> {
        let mutex = self
            .locks
            .entry(key)
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        mutex.lock_owned().await
    }
}
