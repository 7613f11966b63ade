//! Manifest Store (C1): the transactional catalog of datasets, schema
//! versions, manifests, and partitions. [`ManifestStore`] is the trait
//! every persistence backend implements; [`memory::InMemoryManifestStore`]
//! is the reference implementation used by tests and by callers that
//! don't need durability. `flowline-postgres-store` provides a
//! `tokio-postgres`-backed implementation of the same trait.

pub mod memory;

use crate::error::FlowResult;
use crate::ids::{DatasetId, ManifestId, PartitionId, SchemaVersionId, StorageTargetId};
use crate::model::{Dataset, Manifest, Partition, SchemaVersion, StorageTarget, TimeRange};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use std::collections::BTreeMap;

/// Input to [`ManifestStore::create_dataset_manifest`].
#[derive(Debug, Clone)]
pub struct NewManifest {
    pub dataset_id: DatasetId,
    pub version: i64,
    pub schema_version_id: SchemaVersionId,
    pub parent_manifest_id: Option<ManifestId>,
    pub manifest_shard: String,
    pub summary: Value,
    pub metadata: Value,
    pub published: bool,
    pub partitions: Vec<NewPartition>,
}

/// A partition as supplied at manifest-creation time, before an id is
/// assigned.
#[derive(Debug, Clone)]
pub struct NewPartition {
    pub partition_key: BTreeMap<String, String>,
    pub storage_target_id: StorageTargetId,
    pub file_format: String,
    pub file_path: String,
    pub file_size_bytes: Option<i64>,
    pub row_count: Option<i64>,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub checksum: Option<String>,
    pub table_name: String,
}

/// Input to [`ManifestStore::replace_partitions_in_manifest`].
#[derive(Debug, Clone, Default)]
pub struct ReplacePartitions {
    pub remove: Vec<PartitionId>,
    pub add: Vec<NewPartition>,
    pub summary_patch: Value,
    pub metadata_patch: Value,
}

/// Optional filter applied to [`ManifestStore::list_partitions_for_query`].
#[derive(Debug, Clone, Default)]
pub struct PartitionQueryFilter {
    pub partition_key: BTreeMap<String, String>,
}

#[derive(Debug, Clone)]
pub struct ManifestWithPartitions {
    pub manifest: Manifest,
    pub partitions: Vec<Partition>,
}

/// The transactional catalog operations of §4.1.
#[async_trait]
pub trait ManifestStore: Send + Sync {
    async fn upsert_storage_target(&self, target: StorageTarget) -> FlowResult<StorageTarget>;

    async fn create_dataset(&self, dataset: Dataset) -> FlowResult<Dataset>;

    /// `ifMatch` is an optimistic-concurrency token: the caller's last-seen
    /// `updatedAt`, truncated to millisecond precision. A mismatch against
    /// the stored value fails with [`crate::error::ErrorKind::ConcurrentUpdate`].
    async fn update_dataset(
        &self,
        dataset_id: DatasetId,
        patch: Value,
        if_match: Option<DateTime<Utc>>,
    ) -> FlowResult<Dataset>;

    async fn get_dataset(&self, dataset_id: DatasetId) -> FlowResult<Dataset>;

    async fn create_schema_version(
        &self,
        dataset_id: DatasetId,
        fields: Vec<crate::model::SchemaField>,
        checksum: Option<String>,
    ) -> FlowResult<SchemaVersion>;

    /// Asserts `input.version > max(existing version for dataset)`,
    /// inserts partitions, recomputes rollups, and — when `published` with
    /// a `parentManifestId` that is itself `published` — supersedes the
    /// parent in the same transaction.
    async fn create_dataset_manifest(
        &self,
        input: NewManifest,
    ) -> FlowResult<ManifestWithPartitions>;

    async fn get_manifest(&self, manifest_id: ManifestId) -> FlowResult<ManifestWithPartitions>;

    /// The latest `published` manifest for `(dataset_id, shard)`, if any.
    async fn latest_published_manifest(
        &self,
        dataset_id: DatasetId,
        shard: &str,
    ) -> FlowResult<Option<ManifestWithPartitions>>;

    /// Deep-merges `lifecycle` subtrees under `summary.lifecycle` /
    /// `metadata.lifecycle`; rollups refreshed. Used exclusively by
    /// lifecycle chunks (C4).
    async fn replace_partitions_in_manifest(
        &self,
        manifest_id: ManifestId,
        patch: ReplacePartitions,
    ) -> FlowResult<ManifestWithPartitions>;

    /// Partitions whose `[start,end]` overlaps `range`, belonging only to
    /// `published` manifests, filtered by partition-key equality on the
    /// keys supplied in `filter`.
    async fn list_partitions_for_query(
        &self,
        dataset_id: DatasetId,
        range: TimeRange,
        filter: PartitionQueryFilter,
    ) -> FlowResult<Vec<Partition>>;

    /// Idempotent: repeating the same `(dataset_id, idempotency_key)`
    /// returns the manifest id recorded the first time.
    async fn record_ingestion_batch(
        &self,
        dataset_id: DatasetId,
        idempotency_key: String,
        manifest_id: ManifestId,
    ) -> FlowResult<ManifestId>;
}
