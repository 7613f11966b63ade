//! Manifest and partition entities (§3), the append-only catalog chain
//! that C1 (Manifest Store) persists and C4 (Lifecycle Engine) rewrites.

use crate::ids::{DatasetId, ManifestId, PartitionId, SchemaVersionId, StorageTargetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ManifestStatus {
    Draft,
    Published,
    Superseded,
}

/// `(id, datasetId, version, status, schemaVersionId, parentManifestId?,
/// manifestShard, summary, statistics, metadata, partitionCount,
/// totalRows, totalBytes, publishedAt?)`.
///
/// Invariant: per dataset, `version` is strictly increasing across all
/// manifests; publishing a child whose parent is `published` atomically
/// supersedes the parent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    pub id: ManifestId,
    pub dataset_id: DatasetId,
    pub version: i64,
    pub status: ManifestStatus,
    pub schema_version_id: SchemaVersionId,
    pub parent_manifest_id: Option<ManifestId>,
    pub manifest_shard: String,
    #[serde(default)]
    pub summary: Value,
    #[serde(default)]
    pub statistics: Value,
    #[serde(default)]
    pub metadata: Value,
    pub partition_count: i64,
    pub total_rows: i64,
    pub total_bytes: i64,
    pub published_at: Option<DateTime<Utc>>,
}

impl Manifest {
    /// Recompute the rollup fields from the manifest's current partitions.
    /// Called after every insert/replace under the same lock that touches
    /// the manifest's partition set.
    pub fn recompute_rollups(&mut self, partitions: &[Partition]) {
        self.partition_count = partitions.len() as i64;
        self.total_rows = partitions.iter().filter_map(|p| p.row_count).sum();
        self.total_bytes = partitions.iter().filter_map(|p| p.file_size_bytes).sum();
    }
}

/// A partition's time range: inclusive start, exclusive end.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeRange {
    pub fn overlaps(&self, other: &TimeRange) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn union(ranges: &[TimeRange]) -> Option<TimeRange> {
        let start = ranges.iter().map(|r| r.start).min()?;
        let end = ranges.iter().map(|r| r.end).max()?;
        Some(TimeRange { start, end })
    }
}

/// `(id, datasetId, manifestId, partitionKey, storageTargetId, fileFormat,
/// filePath, fileSizeBytes?, rowCount?, startTime, endTime, checksum?,
/// metadata{tableName, lifecycle?})`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Partition {
    pub id: PartitionId,
    pub dataset_id: DatasetId,
    pub manifest_id: ManifestId,
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
    #[serde(default)]
    pub lifecycle: Value,
}

impl Partition {
    pub fn time_range(&self) -> TimeRange {
        TimeRange {
            start: self.start_time,
            end: self.end_time,
        }
    }

    pub fn matches_partition_key(&self, filter: &BTreeMap<String, String>) -> bool {
        filter
            .iter()
            .all(|(k, v)| self.partition_key.get(k) == Some(v))
    }
}

/// Deep-merge `patch` into `summary.lifecycle`/`metadata.lifecycle`
/// subtrees only, per §4.1 `replacePartitionsInManifest`.
pub fn deep_merge(base: &mut Value, patch: &Value) {
    match (base, patch) {
        (Value::Object(base_map), Value::Object(patch_map)) => {
            for (key, patch_value) in patch_map {
                deep_merge(
                    base_map.entry(key.clone()).or_insert(Value::Null),
                    patch_value,
                );
            }
        }
        (base_slot, patch_value) => {
            *base_slot = patch_value.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn deep_merge_overlays_nested_objects() {
        let mut base = json!({"lifecycle": {"a": 1, "b": {"x": 1}}});
        let patch = json!({"lifecycle": {"b": {"y": 2}}});
        deep_merge(&mut base, &patch);
        assert_eq!(base, json!({"lifecycle": {"a": 1, "b": {"x": 1, "y": 2}}}));
    }

    #[test]
    fn time_ranges_overlap_half_open() {
        let a = TimeRange {
            start: "2025-01-01T00:00:00Z".parse().unwrap(),
            end: "2025-01-02T00:00:00Z".parse().unwrap(),
        };
        let b = TimeRange {
            start: "2025-01-02T00:00:00Z".parse().unwrap(),
            end: "2025-01-03T00:00:00Z".parse().unwrap(),
        };
        assert!(!a.overlaps(&b), "half-open ranges sharing only a boundary must not overlap");
    }
}
