//! Dataset and schema-version entities (§3).

use crate::ids::{DatasetId, SchemaVersionId, StorageTargetId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatasetStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WriteFormat {
    Duckdb,
    Parquet,
}

/// A dataset: the top-level catalog entry that manifests/partitions hang
/// off of.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dataset {
    pub id: DatasetId,
    pub slug: String,
    pub name: String,
    pub status: DatasetStatus,
    pub write_format: WriteFormat,
    pub default_storage_target_id: Option<StorageTargetId>,
    #[serde(default)]
    pub metadata: Value,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A storage target: where a partition's file physically lives. The
/// adapter behind it (local FS, S3, GCS, Azure) is an external
/// collaborator — `flowline` only tracks the reference.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageTarget {
    pub id: StorageTargetId,
    pub kind: String,
    #[serde(default)]
    pub config: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Timestamp,
    String,
    Double,
    Integer,
    Boolean,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaField {
    pub name: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default)]
    pub nullable: bool,
}

/// `(id, datasetId, version monotonic per dataset, checksum?, fields[])`.
/// Identical checksums may be reused; new checksums get the next integer
/// version.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchemaVersion {
    pub id: SchemaVersionId,
    pub dataset_id: DatasetId,
    pub version: i64,
    pub checksum: Option<String>,
    pub fields: Vec<SchemaField>,
}
