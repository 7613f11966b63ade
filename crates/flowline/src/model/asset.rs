//! Asset declarations and partitioning specs (§3), consumed by C8 (asset
//! graph) and referenced by C6 (run creation partition-key validation).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AssetDirection {
    Produces,
    Consumes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeGranularity {
    Minute,
    Hour,
    Day,
    Week,
    Month,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeWindowPartitioning {
    pub granularity: TimeGranularity,
    pub timezone: Option<String>,
    pub format: Option<String>,
    pub lookback_windows: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticPartitioning {
    pub keys: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DynamicPartitioning {
    pub max_keys: Option<u32>,
    pub retention_days: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Partitioning {
    TimeWindow(TimeWindowPartitioning),
    Static(StaticPartitioning),
    Dynamic(DynamicPartitioning),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FreshnessPolicy {
    pub max_age_ms: Option<u64>,
    pub ttl_ms: Option<u64>,
    pub cadence_ms: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializePriority {
    Low,
    Normal,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutoMaterializePolicy {
    pub enabled: bool,
    #[serde(default)]
    pub on_upstream_update: bool,
    #[serde(default)]
    pub priority: Option<MaterializePriority>,
    #[serde(default)]
    pub parameter_defaults: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetDeclaration {
    pub asset_id: String,
    pub direction: AssetDirection,
    #[serde(default)]
    pub schema: Value,
    pub freshness: Option<FreshnessPolicy>,
    pub auto_materialize: Option<AutoMaterializePolicy>,
    pub partitioning: Option<Partitioning>,
}

/// A recorded materialization of `(asset_id, partition_key)` produced by a
/// run step at success time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetSnapshot {
    pub run_id: crate::ids::WorkflowRunId,
    pub step_id: String,
    pub asset_id: String,
    pub partition_key: Option<String>,
    pub produced_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub payload: Value,
    #[serde(default)]
    pub schema: Value,
    pub freshness: Option<FreshnessPolicy>,
}
