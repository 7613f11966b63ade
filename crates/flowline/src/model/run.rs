//! Workflow run and run-step entities (§3), owned by C6 (Workflow
//! Executor).

use crate::ids::{WorkflowDefinitionId, WorkflowRunId, WorkflowRunStepId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Canceled,
}

impl RunStatus {
    pub fn is_active(self) -> bool {
        matches!(self, RunStatus::Pending | RunStatus::Running)
    }

    pub fn is_terminal(self) -> bool {
        !self.is_active()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetrySummary {
    pub pending_steps: Vec<String>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub overdue_steps: Vec<String>,
}

/// `(id, workflowDefinitionId, status, runKey?, runKeyNormalized?,
/// parameters, context, output, partitionKey?, triggeredBy?, trigger?,
/// startedAt?, completedAt?, durationMs?, currentStepId?,
/// currentStepIndex?, metrics, retrySummary, createdAt, updatedAt)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: WorkflowRunId,
    pub workflow_definition_id: WorkflowDefinitionId,
    pub status: RunStatus,
    pub run_key: Option<String>,
    pub run_key_normalized: Option<String>,
    #[serde(default)]
    pub parameters: Value,
    #[serde(default)]
    pub context: Value,
    #[serde(default)]
    pub output: Value,
    pub partition_key: Option<String>,
    pub triggered_by: Option<String>,
    #[serde(default)]
    pub trigger: Value,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<i64>,
    pub current_step_id: Option<String>,
    pub current_step_index: Option<usize>,
    #[serde(default)]
    pub metrics: Value,
    #[serde(default)]
    pub retry_summary: RetrySummary,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn mark_started(&mut self, now: DateTime<Utc>) {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::Running;
            self.started_at = Some(now);
        }
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, status: RunStatus, now: DateTime<Utc>) {
        self.status = status;
        self.completed_at = Some(now);
        if let Some(started) = self.started_at {
            self.duration_ms = Some((now - started).num_milliseconds());
        } else {
            self.duration_ms = Some(0);
        }
        self.updated_at = now;
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryState {
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

/// `(id, workflowRunId, stepId, attempt, status, input, output,
/// errorMessage?, producedAssets[], parentStepId?, fanoutIndex?,
/// templateStepId?, retryState, retryAttempts, nextAttemptAt?,
/// lastHeartbeatAt?)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRunStep {
    pub id: WorkflowRunStepId,
    pub workflow_run_id: WorkflowRunId,
    pub step_id: String,
    pub attempt: u32,
    pub status: RunStepStatus,
    #[serde(default)]
    pub input: Value,
    #[serde(default)]
    pub output: Value,
    pub error_message: Option<String>,
    #[serde(default)]
    pub produced_assets: Vec<String>,
    pub parent_step_id: Option<String>,
    pub fanout_index: Option<u32>,
    pub template_step_id: Option<String>,
    #[serde(default)]
    pub retry_state: RetryState,
    pub retry_attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub last_heartbeat_at: Option<DateTime<Utc>>,
}
