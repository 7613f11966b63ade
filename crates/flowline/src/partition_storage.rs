//! Partition Storage Adapter (C2): an opaque `writePartition` /
//! locate-partition interface used by lifecycle and ingestion. The actual
//! blob-storage drivers (local FS, S3, GCS, Azure) are external
//! collaborators (§1 non-goals); this module only specifies the contract
//! and a deterministic in-memory adapter for tests.

use crate::error::FlowResult;
use crate::ids::{PartitionId, StorageTargetId};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// What to write: either already-materialized rows or a reference to a
/// source file the adapter should copy/merge from.
#[derive(Debug, Clone)]
pub enum PartitionSource {
    Rows(Vec<Value>),
    File(String),
}

#[derive(Debug, Clone)]
pub struct WritePartitionRequest {
    pub dataset_slug: String,
    pub partition_id: PartitionId,
    pub partition_key: BTreeMap<String, String>,
    pub table_name: String,
    pub schema: Value,
    pub source: PartitionSource,
    pub row_count_hint: Option<i64>,
}

#[derive(Debug, Clone)]
pub struct WritePartitionResult {
    pub relative_path: String,
    pub file_size_bytes: i64,
    pub row_count: i64,
    pub checksum: String,
}

/// Implementations are treated as pure functions with deterministic
/// output paths per `partitionId`: writing the same partition twice must
/// produce the same `relativePath`.
#[async_trait]
pub trait PartitionStorage: Send + Sync {
    async fn write_partition(
        &self,
        request: WritePartitionRequest,
    ) -> FlowResult<WritePartitionResult>;

    /// A stable URI consumed by the (out-of-scope) query engine.
    fn resolve_partition_location(
        &self,
        relative_path: &str,
        storage_target_id: StorageTargetId,
        config: &Value,
    ) -> String;
}

/// Deterministic reference adapter: "writes" partitions into an in-memory
/// map keyed by the stable path derived from `partitionId`, computing row
/// count and a content checksum from the row payload.
#[derive(Default)]
pub struct InMemoryPartitionStorage {
    written: Mutex<BTreeMap<String, Vec<Value>>>,
}

impl InMemoryPartitionStorage {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn stable_path(dataset_slug: &str, table_name: &str, partition_id: PartitionId) -> String {
        format!("{dataset_slug}/{table_name}/{partition_id}.parquet")
    }
}

#[async_trait]
impl PartitionStorage for InMemoryPartitionStorage {
    async fn write_partition(
        &self,
        request: WritePartitionRequest,
    ) -> FlowResult<WritePartitionResult> {
        let path = Self::stable_path(
            &request.dataset_slug,
            &request.table_name,
            request.partition_id,
        );
        let rows = match request.source {
            PartitionSource::Rows(rows) => rows,
            PartitionSource::File(_) => Vec::new(),
        };
        let row_count = request.row_count_hint.unwrap_or(rows.len() as i64);
        let checksum = checksum_of(&rows);
        let file_size_bytes = rows
            .iter()
            .map(|r| serde_json::to_vec(r).map(|b| b.len()).unwrap_or(0))
            .sum::<usize>() as i64;

        self.written.lock().await.insert(path.clone(), rows);

        Ok(WritePartitionResult {
            relative_path: path,
            file_size_bytes,
            row_count,
            checksum,
        })
    }

    fn resolve_partition_location(
        &self,
        relative_path: &str,
        storage_target_id: StorageTargetId,
        _config: &Value,
    ) -> String {
        format!("memory://{storage_target_id}/{relative_path}")
    }
}

fn checksum_of(rows: &[Value]) -> String {
    use std::collections::hash_map::DefaultHasher;
    use std::hash::{Hash, Hasher};

    let mut hasher = DefaultHasher::new();
    for row in rows {
        row.to_string().hash(&mut hasher);
    }
    format!("{:016x}", hasher.finish())
}
