//! Event trigger and delivery entities (§3), owned by C7 (Event & Schedule
//! Engine).

use crate::ids::{DeliveryId, TriggerId, WorkflowDefinitionId, WorkflowRunId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PredicateOperator {
    Eq,
    Neq,
    In,
    Contains,
    Regex,
    Exists,
    Gt,
    Gte,
    Lt,
    Lte,
}

/// A single clause: `jsonPath <op> value`, with optional case-sensitivity
/// and regex flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PredicateClause {
    pub json_path: String,
    pub operator: PredicateOperator,
    #[serde(default)]
    pub value: Value,
    #[serde(default = "default_true")]
    pub case_sensitive: bool,
    pub flags: Option<String>,
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriggerStatus {
    Active,
    Paused,
}

/// `(id, workflowDefinitionId, status, eventType, eventSource?,
/// predicates[], parameterTemplate, runKeyTemplate?,
/// idempotencyKeyExpression?, throttleWindowMs?, throttleCount?,
/// maxConcurrency?, metadata)`, per §3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventTrigger {
    pub id: TriggerId,
    pub workflow_definition_id: WorkflowDefinitionId,
    pub event_type: String,
    pub source_filter: Option<String>,
    #[serde(default)]
    pub predicates: Vec<PredicateClause>,
    pub parameter_template: Value,
    pub run_key_template: Option<String>,
    pub idempotency_key_expression: Option<String>,
    pub throttle_window_ms: Option<u64>,
    pub throttle_count: Option<u32>,
    pub max_concurrency: Option<u32>,
    #[serde(default)]
    pub metadata: Value,
    pub status: TriggerStatus,
    #[serde(default)]
    pub consecutive_failures: u32,
    pub paused_at: Option<DateTime<Utc>>,
    pub pause_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl EventTrigger {
    pub fn is_active(&self) -> bool {
        self.status == TriggerStatus::Active
    }
}

/// `status` field of a `TriggerDelivery`, per §3/§4.7.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryStatus {
    Pending,
    Matched,
    Throttled,
    Skipped,
    Launched,
    Failed,
}

/// One matching event's progress through a trigger's delivery pipeline
/// (§4.7). Retained for the timeline (C9) and for trigger auto-pause
/// accounting.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerDelivery {
    pub id: DeliveryId,
    pub trigger_id: TriggerId,
    pub event_id: crate::ids::EventId,
    pub status: DeliveryStatus,
    pub attempts: u32,
    pub dedupe_key: Option<String>,
    /// Set when `status == Skipped` and dedupe found an existing delivery.
    pub existing_delivery_id: Option<DeliveryId>,
    pub throttled_until: Option<DateTime<Utc>>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub workflow_run_id: Option<WorkflowRunId>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TriggerDelivery {
    pub fn is_active(&self) -> bool {
        matches!(
            self.status,
            DeliveryStatus::Pending | DeliveryStatus::Matched | DeliveryStatus::Launched
        )
    }
}
