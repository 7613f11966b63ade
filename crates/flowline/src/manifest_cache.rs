//! Manifest Cache (C3): per-`(datasetId, manifestShard)` snapshot of the
//! latest published manifest plus its partitions, with TTL and an
//! invalidation hook C1 calls on every publish/replace.

use crate::clock::SharedClock;
use crate::error::FlowResult;
use crate::ids::DatasetId;
use crate::manifest_store::{ManifestStore, ManifestWithPartitions};
use crate::model::Dataset;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

#[derive(Debug, Clone)]
struct CacheEntry {
    manifest: ManifestWithPartitions,
    cached_at: DateTime<Utc>,
}

#[derive(Debug, Default, Clone, serde::Serialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub invalidations: u64,
}

/// The lookup order for queries is cache hit -> per-shard store read ->
/// fill, matching §4.3. A per-key async lock (reused as the cache's own
/// write path) ensures a single writer per `(dataset, shard)`; readers
/// never block on it.
pub struct ManifestCache {
    entries: DashMap<(DatasetId, String), CacheEntry>,
    locks: crate::concurrency::KeyedLock<(DatasetId, String)>,
    ttl: Duration,
    clock: SharedClock,
    hits: AtomicU64,
    misses: AtomicU64,
    invalidations: AtomicU64,
}

impl ManifestCache {
    pub fn new(ttl: Duration, clock: SharedClock) -> Self {
        Self {
            entries: DashMap::new(),
            locks: crate::concurrency::KeyedLock::new(),
            ttl,
            clock,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            invalidations: self.invalidations.load(Ordering::Relaxed),
        }
    }

    /// Invalidate a single `(dataset, shard)` entry. C1 calls this inside
    /// the same logical operation as every publish/replace.
    pub fn invalidate(&self, dataset_id: DatasetId, shard: &str) {
        if self.entries.remove(&(dataset_id, shard.to_string())).is_some() {
            self.invalidations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn is_fresh(&self, entry: &CacheEntry) -> bool {
        self.clock.now() - entry.cached_at < self.ttl
    }

    /// Cache-hit -> per-shard store read -> fill.
    pub async fn get_or_fill(
        &self,
        store: &dyn ManifestStore,
        dataset_id: DatasetId,
        shard: &str,
    ) -> FlowResult<Option<ManifestWithPartitions>> {
        if let Some(entry) = self.entries.get(&(dataset_id, shard.to_string())) {
            if self.is_fresh(&entry) {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Ok(Some(entry.manifest.clone()));
            }
        }
        self.misses.fetch_add(1, Ordering::Relaxed);

        let _guard = self.locks.acquire((dataset_id, shard.to_string())).await;
        // Re-check: another writer may have filled it while we waited.
        if let Some(entry) = self.entries.get(&(dataset_id, shard.to_string())) {
            if self.is_fresh(&entry) {
                return Ok(Some(entry.manifest.clone()));
            }
        }

        let fetched = store.latest_published_manifest(dataset_id, shard).await?;
        if let Some(manifest) = &fetched {
            self.entries.insert(
                (dataset_id, shard.to_string()),
                CacheEntry {
                    manifest: manifest.clone(),
                    cached_at: self.clock.now(),
                },
            );
        }
        Ok(fetched)
    }

    /// Enumerate active datasets, group their manifests by shard, and load
    /// the latest published manifest per shard, warming the cache ahead of
    /// query traffic.
    pub async fn prime(&self, store: &dyn ManifestStore, datasets: &[Dataset], shards: &[String]) {
        for dataset in datasets {
            for shard in shards {
                let _ = self.get_or_fill(store, dataset.id, shard).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::ids::SchemaVersionId;
    use crate::manifest_store::memory::InMemoryManifestStore;
    use crate::manifest_store::NewManifest;
    use crate::model::{Dataset, DatasetStatus, WriteFormat};
    use serde_json::Value;

    fn dataset() -> Dataset {
        let now = Utc::now();
        Dataset {
            id: DatasetId::new(),
            slug: "events".into(),
            name: "events".into(),
            status: DatasetStatus::Active,
            write_format: WriteFormat::Duckdb,
            default_storage_target_id: None,
            metadata: Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn invalidation_forces_a_refill() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = InMemoryManifestStore::new(clock.clone());
        let cache = ManifestCache::new(Duration::seconds(60), clock.clone());

        let ds = store.create_dataset(dataset()).await.unwrap();
        let schema = store
            .create_schema_version(ds.id, vec![], None)
            .await
            .unwrap();
        store
            .create_dataset_manifest(NewManifest {
                dataset_id: ds.id,
                version: 1,
                schema_version_id: SchemaVersionId::new(),
                parent_manifest_id: None,
                manifest_shard: "default".into(),
                summary: Value::Null,
                metadata: Value::Null,
                published: true,
                partitions: vec![],
            })
            .await
            .unwrap();
        let _ = schema;

        let first = cache.get_or_fill(&store, ds.id, "default").await.unwrap();
        assert!(first.is_some());
        assert_eq!(cache.stats().misses, 1);

        let second = cache.get_or_fill(&store, ds.id, "default").await.unwrap();
        assert!(second.is_some());
        assert_eq!(cache.stats().hits, 1);

        cache.invalidate(ds.id, "default");
        let third = cache.get_or_fill(&store, ds.id, "default").await.unwrap();
        assert!(third.is_some());
        assert_eq!(cache.stats().misses, 2);
    }
}
