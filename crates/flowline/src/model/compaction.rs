//! Compaction checkpoint entity (§3), the resumable state C4's compaction
//! planner/executor owns exclusively per manifest.

use crate::ids::{CompactionCheckpointId, DatasetId, ManifestId, PartitionId, StorageTargetId};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

/// A group of source partitions slated to be replaced by one compacted
/// output partition, as planned by [`crate::lifecycle::compaction`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionGroup {
    pub group_id: String,
    pub storage_target_id: StorageTargetId,
    pub table_name: String,
    pub source_partition_ids: Vec<PartitionId>,
    pub replacement_partition_id: PartitionId,
    pub total_bytes: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CompactionStats {
    pub bytes: i64,
    pub rows: i64,
    pub partitions: i64,
    pub chunks: i64,
    #[serde(default)]
    pub history: Vec<Value>,
    pub last_error: Option<String>,
}

/// `(id, datasetId, manifestId, manifestShard,
/// metadata{groups[],completedGroupIds,chunkAttempts}, stats, cursor,
/// retryCount, status)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompactionCheckpoint {
    pub id: CompactionCheckpointId,
    pub dataset_id: DatasetId,
    pub manifest_id: ManifestId,
    pub manifest_shard: String,
    pub groups: Vec<CompactionGroup>,
    #[serde(default)]
    pub completed_group_ids: Vec<String>,
    #[serde(default)]
    pub chunk_attempts: std::collections::HashMap<String, u32>,
    pub stats: CompactionStats,
    pub cursor: usize,
    pub retry_count: u32,
    pub status: CheckpointStatus,
    /// The `chunkPartitionLimit` this plan was built under; a config
    /// change invalidates and rebuilds the plan (§4.4 step 2).
    pub chunk_partition_limit: usize,
}

impl CompactionCheckpoint {
    pub fn remaining_groups(&self) -> impl Iterator<Item = &CompactionGroup> {
        self.groups
            .iter()
            .filter(move |g| !self.completed_group_ids.contains(&g.group_id))
    }
}
