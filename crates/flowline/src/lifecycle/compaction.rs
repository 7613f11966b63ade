//! Compaction planner and chunked executor (§4.4, step 1-5).
//!
//! Checkpoint ownership is exclusive per manifest: [`CompactionEngine`]
//! keeps at most one in-flight [`CompactionCheckpoint`] per `manifestId`
//! behind a keyed lock, so a concurrent second caller resumes the same
//! plan instead of racing a new one.

use crate::clock::SharedClock;
use crate::concurrency::KeyedLock;
use crate::config::Runtime;
use crate::error::{FlowError, FlowResult};
use crate::event_bus::EventBus;
use crate::ids::{CompactionCheckpointId, ManifestId, PartitionId};
use crate::manifest_cache::ManifestCache;
use crate::manifest_store::{ManifestStore, NewPartition, ReplacePartitions};
use crate::model::{CheckpointStatus, CompactionCheckpoint, CompactionGroup, Partition};
use crate::partition_storage::{PartitionSource, PartitionStorage, WritePartitionRequest};
use dashmap::DashMap;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

pub struct CompactionEngine {
    store: Arc<dyn ManifestStore>,
    partition_storage: Arc<dyn PartitionStorage>,
    cache: Arc<ManifestCache>,
    event_bus: Arc<dyn EventBus>,
    config: Runtime,
    clock: SharedClock,
    checkpoints: DashMap<ManifestId, Arc<Mutex<CompactionCheckpoint>>>,
    locks: KeyedLock<ManifestId>,
}

impl CompactionEngine {
    pub fn new(
        store: Arc<dyn ManifestStore>,
        partition_storage: Arc<dyn PartitionStorage>,
        cache: Arc<ManifestCache>,
        event_bus: Arc<dyn EventBus>,
        config: Runtime,
        clock: SharedClock,
    ) -> Self {
        Self {
            store,
            partition_storage,
            cache,
            event_bus,
            config,
            clock,
            checkpoints: DashMap::new(),
            locks: KeyedLock::new(),
        }
    }

    /// Group a manifest's `duckdb` partitions into [`CompactionGroup`]s.
    /// Groups of size 1 are discarded, per §4.4 step 1.
    fn plan_groups(&self, partitions: &[Partition]) -> Vec<CompactionGroup> {
        let mut eligible: Vec<&Partition> = partitions
            .iter()
            .filter(|p| p.file_format == "duckdb")
            .filter(|p| p.file_size_bytes.unwrap_or(0) <= self.config.small_partition_bytes as i64)
            .collect();
        eligible.sort_by_key(|p| p.start_time);

        let mut groups = Vec::new();
        let mut current: Vec<&Partition> = Vec::new();
        let mut current_bytes: i64 = 0;

        let mut flush = |current: &mut Vec<&Partition>, current_bytes: &mut i64, groups: &mut Vec<CompactionGroup>| {
            if current.len() > 1 {
                let first = current[0];
                groups.push(CompactionGroup {
                    group_id: format!("grp-{}", groups.len()),
                    storage_target_id: first.storage_target_id,
                    table_name: first.table_name.clone(),
                    source_partition_ids: current.iter().map(|p| p.id).collect(),
                    replacement_partition_id: PartitionId::new(),
                    total_bytes: *current_bytes,
                });
            }
            current.clear();
            *current_bytes = 0;
        };

        for partition in eligible {
            let same_bucket = current.last().is_some_and(|p| {
                p.storage_target_id == partition.storage_target_id
                    && p.table_name == partition.table_name
            });
            let bytes = partition.file_size_bytes.unwrap_or(0);
            let would_exceed_bytes = current_bytes + bytes > self.config.target_partition_bytes as i64;
            let would_exceed_count = current.len() + 1 > self.config.max_partitions_per_group;

            if !same_bucket || would_exceed_bytes || would_exceed_count {
                flush(&mut current, &mut current_bytes, &mut groups);
            }
            current.push(partition);
            current_bytes += bytes;
        }
        flush(&mut current, &mut current_bytes, &mut groups);
        groups
    }

    /// Create a fresh checkpoint, or return the in-flight one for this
    /// manifest. A change in `chunkPartitionLimit` invalidates and
    /// rebuilds the existing plan.
    pub async fn plan_or_resume(
        &self,
        dataset_id: crate::ids::DatasetId,
        manifest_id: ManifestId,
    ) -> FlowResult<Arc<Mutex<CompactionCheckpoint>>> {
        let _guard = self.locks.acquire(manifest_id).await;

        if let Some(existing) = self.checkpoints.get(&manifest_id) {
            let needs_rebuild = {
                let checkpoint = existing.lock().await;
                checkpoint.status != CheckpointStatus::Completed
                    && checkpoint.chunk_partition_limit != self.config.chunk_partition_limit
            };
            if !needs_rebuild {
                return Ok(existing.clone());
            }
        }

        let manifest_with_partitions = self.store.get_manifest(manifest_id).await?;
        let groups = self.plan_groups(&manifest_with_partitions.partitions);

        let checkpoint = CompactionCheckpoint {
            id: CompactionCheckpointId::new(),
            dataset_id,
            manifest_id,
            manifest_shard: manifest_with_partitions.manifest.manifest_shard.clone(),
            groups,
            completed_group_ids: Vec::new(),
            chunk_attempts: HashMap::new(),
            stats: Default::default(),
            cursor: 0,
            retry_count: 0,
            status: CheckpointStatus::Pending,
            chunk_partition_limit: self.config.chunk_partition_limit,
        };
        let handle = Arc::new(Mutex::new(checkpoint));
        self.checkpoints.insert(manifest_id, handle.clone());
        Ok(handle)
    }

    /// Run one chunk: select up to `chunkPartitionLimit` partitions across
    /// consecutive remaining groups, materialize each, write replacements,
    /// and apply them in a single `replacePartitionsInManifest` call.
    /// Returns `true` once the checkpoint reaches `completed`.
    pub async fn run_chunk(&self, checkpoint: &Arc<Mutex<CompactionCheckpoint>>) -> FlowResult<bool> {
        let mut guard = checkpoint.lock().await;
        if guard.status == CheckpointStatus::Completed {
            return Ok(true);
        }
        guard.status = CheckpointStatus::Running;
        if guard.retry_count > 0 {
            self.event_bus.publish(
                "compaction.resume",
                json!({"checkpointId": guard.id.0, "manifestId": guard.manifest_id.0}),
            );
        }

        let remaining: Vec<CompactionGroup> = guard
            .remaining_groups()
            .take_while({
                let mut budget = self.config.chunk_partition_limit;
                move |g| {
                    if budget == 0 {
                        return false;
                    }
                    budget = budget.saturating_sub(g.source_partition_ids.len());
                    true
                }
            })
            .cloned()
            .collect();

        if remaining.is_empty() {
            guard.status = CheckpointStatus::Completed;
            self.cache.invalidate(guard.dataset_id, &guard.manifest_shard);
            return Ok(true);
        }

        let manifest = self.store.get_manifest(guard.manifest_id).await?;
        let by_id: HashMap<PartitionId, Partition> =
            manifest.partitions.into_iter().map(|p| (p.id, p)).collect();

        let mut remove = Vec::new();
        let mut add = Vec::new();
        let mut completed_this_chunk = Vec::new();
        let mut chunk_rows = 0i64;
        let mut chunk_bytes = 0i64;

        for group in &remaining {
            let sources: Vec<&Partition> = group
                .source_partition_ids
                .iter()
                .filter_map(|id| by_id.get(id))
                .collect();

            if sources.len() != group.source_partition_ids.len() {
                // A source partition vanished underneath us (e.g. expired
                // by retention); skip without blocking the rest of the plan.
                completed_this_chunk.push(group.group_id.clone());
                self.event_bus.publish(
                    "compaction.group.skipped",
                    json!({"groupId": group.group_id, "reason": "source partition missing"}),
                );
                continue;
            }

            let min_start = sources.iter().map(|p| p.start_time).min().expect("non-empty");
            let max_end = sources.iter().map(|p| p.end_time).max().expect("non-empty");
            let row_count: i64 = sources.iter().filter_map(|p| p.row_count).sum();

            let attempts = guard.chunk_attempts.entry(group.group_id.clone()).or_insert(0);
            *attempts += 1;

            let write_result = self
                .partition_storage
                .write_partition(WritePartitionRequest {
                    dataset_slug: guard.manifest_shard.clone(),
                    partition_id: group.replacement_partition_id,
                    partition_key: sources[0].partition_key.clone(),
                    table_name: group.table_name.clone(),
                    schema: serde_json::Value::Null,
                    source: PartitionSource::File(format!("union:{}", group.group_id)),
                    row_count_hint: Some(row_count),
                })
                .await
                .map_err(|e| {
                    guard.stats.last_error = Some(e.message.clone());
                    e
                })?;

            remove.extend(group.source_partition_ids.iter().copied());
            add.push(NewPartition {
                partition_key: sources[0].partition_key.clone(),
                storage_target_id: group.storage_target_id,
                file_format: "duckdb".to_string(),
                file_path: write_result.relative_path,
                file_size_bytes: Some(write_result.file_size_bytes),
                row_count: Some(write_result.row_count),
                start_time: min_start,
                end_time: max_end,
                checksum: Some(write_result.checksum),
                table_name: group.table_name.clone(),
            });
            chunk_rows += row_count;
            chunk_bytes += group.total_bytes;
            completed_this_chunk.push(group.group_id.clone());
        }

        if !remove.is_empty() || !add.is_empty() {
            self.store
                .replace_partitions_in_manifest(
                    guard.manifest_id,
                    ReplacePartitions {
                        remove,
                        add,
                        summary_patch: serde_json::Value::Null,
                        metadata_patch: serde_json::Value::Null,
                    },
                )
                .await
                .map_err(|e| {
                    guard.stats.last_error = Some(e.message.clone());
                    e
                })?;
        }

        guard.completed_group_ids.extend(completed_this_chunk.iter().cloned());
        guard.cursor += remaining.len();
        guard.stats.chunks += 1;
        guard.stats.rows += chunk_rows;
        guard.stats.bytes += chunk_bytes;
        guard.stats.partitions += remaining
            .iter()
            .map(|g| g.source_partition_ids.len() as i64)
            .sum::<i64>();
        if guard.stats.history.len() >= 50 {
            guard.stats.history.remove(0);
        }
        guard.stats.history.push(json!({
            "chunk": guard.stats.chunks,
            "groups": completed_this_chunk,
        }));

        for group_id in &completed_this_chunk {
            self.event_bus.publish(
                "compaction.group.compacted",
                json!({"groupId": group_id, "manifestId": guard.manifest_id.0}),
            );
        }

        self.cache.invalidate(guard.dataset_id, &guard.manifest_shard);

        let done = guard.completed_group_ids.len() >= guard.groups.len();
        if done {
            guard.status = CheckpointStatus::Completed;
        }
        Ok(done)
    }

    /// Mark a checkpoint `failed`, preserving its cursor for resume, and
    /// surface the error to the caller.
    pub async fn fail_checkpoint(
        &self,
        checkpoint: &Arc<Mutex<CompactionCheckpoint>>,
        error: &FlowError,
    ) {
        let mut guard = checkpoint.lock().await;
        guard.status = CheckpointStatus::Failed;
        guard.retry_count += 1;
        guard.stats.last_error = Some(error.message.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::event_bus::BroadcastEventBus;
    use crate::ids::{DatasetId, SchemaVersionId, StorageTargetId};
    use crate::manifest_store::memory::InMemoryManifestStore;
    use crate::manifest_store::NewManifest;
    use crate::model::{Dataset, DatasetStatus, WriteFormat};
    use crate::partition_storage::InMemoryPartitionStorage;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::collections::BTreeMap;

    fn dataset() -> Dataset {
        let now = Utc::now();
        Dataset {
            id: DatasetId::new(),
            slug: "events".into(),
            name: "events".into(),
            status: DatasetStatus::Active,
            write_format: WriteFormat::Duckdb,
            default_storage_target_id: None,
            metadata: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn compaction_conserves_row_count_and_time_range() {
        let clock = system_clock();
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryManifestStore::new(clock.clone()));
        let partition_storage: Arc<dyn PartitionStorage> = InMemoryPartitionStorage::new();
        let cache = Arc::new(ManifestCache::new(chrono::Duration::seconds(60), clock.clone()));
        let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let config = Runtime {
            small_partition_bytes: u64::MAX,
            target_partition_bytes: u64::MAX,
            max_partitions_per_group: 10,
            chunk_partition_limit: 10,
            ..Runtime::default()
        };

        let ds = store.create_dataset(dataset()).await.unwrap();
        let schema = store
            .create_schema_version(ds.id, vec![], None)
            .await
            .unwrap();

        let storage_target_id = StorageTargetId::new();
        let base = Utc::now();
        let partitions: Vec<NewPartition> = (0..3)
            .map(|i| NewPartition {
                partition_key: BTreeMap::new(),
                storage_target_id,
                file_format: "duckdb".to_string(),
                file_path: format!("p{i}.duckdb"),
                file_size_bytes: Some(100),
                row_count: Some(10),
                start_time: base + ChronoDuration::hours(i),
                end_time: base + ChronoDuration::hours(i + 1),
                checksum: None,
                table_name: "events".to_string(),
            })
            .collect();

        let manifest = store
            .create_dataset_manifest(NewManifest {
                dataset_id: ds.id,
                version: 1,
                schema_version_id: schema.id,
                parent_manifest_id: None,
                manifest_shard: "default".into(),
                summary: serde_json::Value::Null,
                metadata: serde_json::Value::Null,
                published: true,
                partitions,
            })
            .await
            .unwrap();

        let engine = CompactionEngine::new(
            store.clone(),
            partition_storage,
            cache,
            event_bus,
            config,
            clock,
        );

        let checkpoint = engine.plan_or_resume(ds.id, manifest.manifest.id).await.unwrap();
        {
            let guard = checkpoint.lock().await;
            assert_eq!(guard.groups.len(), 1);
            assert_eq!(guard.groups[0].source_partition_ids.len(), 3);
        }

        let done = engine.run_chunk(&checkpoint).await.unwrap();
        assert!(done);

        let refreshed = store.get_manifest(manifest.manifest.id).await.unwrap();
        assert_eq!(refreshed.partitions.len(), 1);
        assert_eq!(refreshed.partitions[0].row_count, Some(30));
        assert_eq!(refreshed.partitions[0].start_time, base);
        assert_eq!(refreshed.partitions[0].end_time, base + ChronoDuration::hours(3));
    }

    #[tokio::test]
    async fn singleton_groups_are_not_compacted() {
        let clock = system_clock();
        let store: Arc<dyn ManifestStore> = Arc::new(InMemoryManifestStore::new(clock.clone()));
        let partition_storage: Arc<dyn PartitionStorage> = InMemoryPartitionStorage::new();
        let cache = Arc::new(ManifestCache::new(chrono::Duration::seconds(60), clock.clone()));
        let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let engine = CompactionEngine::new(
            store.clone(),
            partition_storage,
            cache,
            event_bus,
            Runtime::default(),
            clock,
        );

        let ds = store.create_dataset(dataset()).await.unwrap();
        let schema = store.create_schema_version(ds.id, vec![], None).await.unwrap();
        let manifest = store
            .create_dataset_manifest(NewManifest {
                dataset_id: ds.id,
                version: 1,
                schema_version_id: schema.id,
                parent_manifest_id: None,
                manifest_shard: "default".into(),
                summary: serde_json::Value::Null,
                metadata: serde_json::Value::Null,
                published: true,
                partitions: vec![NewPartition {
                    partition_key: BTreeMap::new(),
                    storage_target_id: StorageTargetId::new(),
                    file_format: "duckdb".to_string(),
                    file_path: "p0.duckdb".to_string(),
                    file_size_bytes: Some(100),
                    row_count: Some(10),
                    start_time: Utc::now(),
                    end_time: Utc::now(),
                    checksum: None,
                    table_name: "events".to_string(),
                }],
            })
            .await
            .unwrap();

        let checkpoint = engine.plan_or_resume(ds.id, manifest.manifest.id).await.unwrap();
        let guard = checkpoint.lock().await;
        assert!(guard.groups.is_empty());
    }
}
