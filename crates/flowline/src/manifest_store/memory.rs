//! In-memory reference implementation of [`ManifestStore`], used by tests
//! and by the CLI's local-mode. One [`tokio::sync::RwLock`] per dataset
//! approximates the "single writer per shard" guarantee of §5 without
//! pulling in a database driver.

use super::{
    ManifestStore, ManifestWithPartitions, NewManifest, NewPartition, PartitionQueryFilter,
    ReplacePartitions,
};
use crate::clock::SharedClock;
use crate::error::FlowError;
use crate::error::FlowResult;
use crate::ids::{DatasetId, ManifestId, PartitionId, SchemaVersionId, StorageTargetId};
use crate::model::manifest::deep_merge;
use crate::model::{
    Dataset, Manifest, ManifestStatus, Partition, SchemaField, SchemaVersion, StorageTarget,
    TimeRange,
};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::HashMap;
use tokio::sync::RwLock;

#[derive(Default)]
struct DatasetState {
    dataset: Option<Dataset>,
    schema_versions: Vec<SchemaVersion>,
    manifests: HashMap<ManifestId, Manifest>,
    partitions: HashMap<PartitionId, Partition>,
    ingestion_batches: HashMap<String, ManifestId>,
}

pub struct InMemoryManifestStore {
    datasets: DashMap<DatasetId, RwLock<DatasetState>>,
    storage_targets: DashMap<StorageTargetId, StorageTarget>,
    clock: SharedClock,
}

impl InMemoryManifestStore {
    pub fn new(clock: SharedClock) -> Self {
        Self {
            datasets: DashMap::new(),
            storage_targets: DashMap::new(),
            clock,
        }
    }

    fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    fn partitions_for(state: &DatasetState, manifest_id: ManifestId) -> Vec<Partition> {
        let mut partitions: Vec<Partition> = state
            .partitions
            .values()
            .filter(|p| p.manifest_id == manifest_id)
            .cloned()
            .collect();
        partitions.sort_by_key(|p| p.start_time);
        partitions
    }

    fn insert_partitions(
        state: &mut DatasetState,
        dataset_id: DatasetId,
        manifest_id: ManifestId,
        specs: Vec<NewPartition>,
    ) -> Vec<Partition> {
        specs
            .into_iter()
            .map(|spec| {
                let partition = Partition {
                    id: PartitionId::new(),
                    dataset_id,
                    manifest_id,
                    partition_key: spec.partition_key,
                    storage_target_id: spec.storage_target_id,
                    file_format: spec.file_format,
                    file_path: spec.file_path,
                    file_size_bytes: spec.file_size_bytes,
                    row_count: spec.row_count,
                    start_time: spec.start_time,
                    end_time: spec.end_time,
                    checksum: spec.checksum,
                    table_name: spec.table_name,
                    lifecycle: Value::Null,
                };
                state.partitions.insert(partition.id, partition.clone());
                partition
            })
            .collect()
    }
}

#[async_trait]
impl ManifestStore for InMemoryManifestStore {
    async fn upsert_storage_target(&self, target: StorageTarget) -> FlowResult<StorageTarget> {
        self.storage_targets.insert(target.id, target.clone());
        Ok(target)
    }

    async fn create_dataset(&self, dataset: Dataset) -> FlowResult<Dataset> {
        let entry = self.datasets.entry(dataset.id).or_default();
        let mut state = entry.write().await;
        if state.dataset.is_some() {
            return Err(FlowError::conflict(format!(
                "dataset '{}' already exists",
                dataset.slug
            )));
        }
        state.dataset = Some(dataset.clone());
        Ok(dataset)
    }

    async fn update_dataset(
        &self,
        dataset_id: DatasetId,
        patch: Value,
        if_match: Option<DateTime<Utc>>,
    ) -> FlowResult<Dataset> {
        let entry = self
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let mut state = entry.write().await;
        let dataset = state
            .dataset
            .as_mut()
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;

        if let Some(expected) = if_match {
            let truncated = dataset.updated_at.trunc_subsecs(3);
            if truncated != expected.trunc_subsecs(3) {
                return Err(FlowError::concurrent_update(
                    "dataset was modified since ifMatch was read",
                ));
            }
        }

        let mut as_value = serde_json::to_value(&*dataset).map_err(|e| {
            FlowError::internal(format!("failed to serialize dataset for patch: {e}"))
        })?;
        crate::model::manifest::deep_merge(&mut as_value, &patch);
        let mut updated: Dataset = serde_json::from_value(as_value)
            .map_err(|e| FlowError::internal(format!("failed to apply dataset patch: {e}")))?;
        updated.updated_at = self.now();
        *dataset = updated.clone();
        Ok(updated)
    }

    async fn get_dataset(&self, dataset_id: DatasetId) -> FlowResult<Dataset> {
        let entry = self
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let state = entry.read().await;
        state
            .dataset
            .clone()
            .ok_or_else(|| FlowError::not_found("dataset not found"))
    }

    async fn create_schema_version(
        &self,
        dataset_id: DatasetId,
        fields: Vec<SchemaField>,
        checksum: Option<String>,
    ) -> FlowResult<SchemaVersion> {
        let entry = self
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let mut state = entry.write().await;

        if let Some(checksum) = &checksum {
            if let Some(existing) = state
                .schema_versions
                .iter()
                .find(|v| v.checksum.as_deref() == Some(checksum.as_str()))
            {
                return Ok(existing.clone());
            }
        }

        let next_version = state.schema_versions.iter().map(|v| v.version).max().unwrap_or(0) + 1;
        let schema_version = SchemaVersion {
            id: SchemaVersionId::new(),
            dataset_id,
            version: next_version,
            checksum,
            fields,
        };
        state.schema_versions.push(schema_version.clone());
        Ok(schema_version)
    }

    async fn create_dataset_manifest(
        &self,
        input: NewManifest,
    ) -> FlowResult<ManifestWithPartitions> {
        let entry = self
            .datasets
            .get(&input.dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let mut state = entry.write().await;

        let max_version = state.manifests.values().map(|m| m.version).max().unwrap_or(0);
        if input.version <= max_version {
            return Err(FlowError::conflict(format!(
                "manifest version {} is not greater than current max {}",
                input.version, max_version
            )));
        }

        let manifest_id = ManifestId::new();
        let partitions = Self::insert_partitions(
            &mut state,
            input.dataset_id,
            manifest_id,
            input.partitions,
        );

        let mut manifest = Manifest {
            id: manifest_id,
            dataset_id: input.dataset_id,
            version: input.version,
            status: if input.published {
                ManifestStatus::Published
            } else {
                ManifestStatus::Draft
            },
            schema_version_id: input.schema_version_id,
            parent_manifest_id: input.parent_manifest_id,
            manifest_shard: input.manifest_shard,
            summary: input.summary,
            statistics: Value::Null,
            metadata: input.metadata,
            partition_count: 0,
            total_rows: 0,
            total_bytes: 0,
            published_at: if input.published { Some(self.now()) } else { None },
        };
        manifest.recompute_rollups(&partitions);
        state.manifests.insert(manifest_id, manifest.clone());

        if input.published {
            if let Some(parent_id) = input.parent_manifest_id {
                if let Some(parent) = state.manifests.get_mut(&parent_id) {
                    if parent.status == ManifestStatus::Published {
                        parent.status = ManifestStatus::Superseded;
                    }
                }
            }
        }

        Ok(ManifestWithPartitions {
            manifest,
            partitions,
        })
    }

    async fn get_manifest(&self, manifest_id: ManifestId) -> FlowResult<ManifestWithPartitions> {
        for entry in self.datasets.iter() {
            let state = entry.value().read().await;
            if let Some(manifest) = state.manifests.get(&manifest_id) {
                return Ok(ManifestWithPartitions {
                    manifest: manifest.clone(),
                    partitions: Self::partitions_for(&state, manifest_id),
                });
            }
        }
        Err(FlowError::not_found("manifest not found"))
    }

    async fn latest_published_manifest(
        &self,
        dataset_id: DatasetId,
        shard: &str,
    ) -> FlowResult<Option<ManifestWithPartitions>> {
        let entry = self
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let state = entry.read().await;
        let latest = state
            .manifests
            .values()
            .filter(|m| m.status == ManifestStatus::Published && m.manifest_shard == shard)
            .max_by_key(|m| m.version)
            .cloned();
        Ok(latest.map(|manifest| {
            let partitions = Self::partitions_for(&state, manifest.id);
            ManifestWithPartitions {
                manifest,
                partitions,
            }
        }))
    }

    async fn replace_partitions_in_manifest(
        &self,
        manifest_id: ManifestId,
        patch: ReplacePartitions,
    ) -> FlowResult<ManifestWithPartitions> {
        for entry in self.datasets.iter() {
            let mut state = entry.write().await;
            if !state.manifests.contains_key(&manifest_id) {
                continue;
            }

            for id in &patch.remove {
                state.partitions.remove(id);
            }
            let dataset_id = state.manifests[&manifest_id].dataset_id;
            Self::insert_partitions(&mut state, dataset_id, manifest_id, patch.add);

            let manifest = state.manifests.get_mut(&manifest_id).expect("checked above");
            deep_merge(
                &mut manifest.summary,
                &Value::Object(
                    [("lifecycle".to_string(), patch.summary_patch)]
                        .into_iter()
                        .collect(),
                ),
            );
            deep_merge(
                &mut manifest.metadata,
                &Value::Object(
                    [("lifecycle".to_string(), patch.metadata_patch)]
                        .into_iter()
                        .collect(),
                ),
            );

            let partitions = Self::partitions_for(&state, manifest_id);
            state
                .manifests
                .get_mut(&manifest_id)
                .expect("checked above")
                .recompute_rollups(&partitions);

            return Ok(ManifestWithPartitions {
                manifest: state.manifests[&manifest_id].clone(),
                partitions,
            });
        }
        Err(FlowError::not_found("manifest not found"))
    }

    async fn list_partitions_for_query(
        &self,
        dataset_id: DatasetId,
        range: TimeRange,
        filter: PartitionQueryFilter,
    ) -> FlowResult<Vec<Partition>> {
        let entry = self
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let state = entry.read().await;
        let published: std::collections::HashSet<ManifestId> = state
            .manifests
            .values()
            .filter(|m| m.status == ManifestStatus::Published)
            .map(|m| m.id)
            .collect();

        let mut partitions: Vec<Partition> = state
            .partitions
            .values()
            .filter(|p| published.contains(&p.manifest_id))
            .filter(|p| p.time_range().overlaps(&range))
            .filter(|p| p.matches_partition_key(&filter.partition_key))
            .cloned()
            .collect();
        partitions.sort_by_key(|p| p.start_time);
        Ok(partitions)
    }

    async fn record_ingestion_batch(
        &self,
        dataset_id: DatasetId,
        idempotency_key: String,
        manifest_id: ManifestId,
    ) -> FlowResult<ManifestId> {
        let entry = self
            .datasets
            .get(&dataset_id)
            .ok_or_else(|| FlowError::not_found("dataset not found"))?;
        let mut state = entry.write().await;
        let existing = state
            .ingestion_batches
            .entry(idempotency_key)
            .or_insert(manifest_id);
        Ok(*existing)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::system_clock;
    use crate::model::{DatasetStatus, WriteFormat};

    fn new_dataset() -> Dataset {
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
    async fn manifest_version_must_increase() {
        let store = InMemoryManifestStore::new(system_clock());
        let dataset = store.create_dataset(new_dataset()).await.unwrap();
        let schema = store
            .create_schema_version(dataset.id, vec![], None)
            .await
            .unwrap();

        let first = NewManifest {
            dataset_id: dataset.id,
            version: 1,
            schema_version_id: schema.id,
            parent_manifest_id: None,
            manifest_shard: "default".into(),
            summary: Value::Null,
            metadata: Value::Null,
            published: true,
            partitions: vec![],
        };
        store.create_dataset_manifest(first).await.unwrap();

        let conflicting = NewManifest {
            dataset_id: dataset.id,
            version: 1,
            schema_version_id: schema.id,
            parent_manifest_id: None,
            manifest_shard: "default".into(),
            summary: Value::Null,
            metadata: Value::Null,
            published: true,
            partitions: vec![],
        };
        let err = store.create_dataset_manifest(conflicting).await.unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn publishing_child_supersedes_published_parent() {
        let store = InMemoryManifestStore::new(system_clock());
        let dataset = store.create_dataset(new_dataset()).await.unwrap();
        let schema = store
            .create_schema_version(dataset.id, vec![], None)
            .await
            .unwrap();

        let parent = store
            .create_dataset_manifest(NewManifest {
                dataset_id: dataset.id,
                version: 1,
                schema_version_id: schema.id,
                parent_manifest_id: None,
                manifest_shard: "default".into(),
                summary: Value::Null,
                metadata: Value::Null,
                published: true,
                partitions: vec![],
            })
            .await
            .unwrap();

        store
            .create_dataset_manifest(NewManifest {
                dataset_id: dataset.id,
                version: 2,
                schema_version_id: schema.id,
                parent_manifest_id: Some(parent.manifest.id),
                manifest_shard: "default".into(),
                summary: Value::Null,
                metadata: Value::Null,
                published: true,
                partitions: vec![],
            })
            .await
            .unwrap();

        let refreshed = store.get_manifest(parent.manifest.id).await.unwrap();
        assert_eq!(refreshed.manifest.status, ManifestStatus::Superseded);
    }

    #[tokio::test]
    async fn ingestion_batch_is_idempotent() {
        let store = InMemoryManifestStore::new(system_clock());
        let dataset = store.create_dataset(new_dataset()).await.unwrap();
        let m1 = ManifestId::new();
        let m2 = ManifestId::new();
        let first = store
            .record_ingestion_batch(dataset.id, "batch-1".into(), m1)
            .await
            .unwrap();
        let second = store
            .record_ingestion_batch(dataset.id, "batch-1".into(), m2)
            .await
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(first, m1);
    }
}
