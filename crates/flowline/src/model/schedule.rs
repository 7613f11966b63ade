//! Cron-driven schedule entity (§3), the other half of C7 alongside event
//! triggers.

use crate::ids::{ScheduleId, WorkflowDefinitionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScheduleStatus {
    Active,
    Paused,
}

/// `(id, workflowDefinitionId, cronExpression, timezone, catchUp,
/// parameterTemplate, startWindow?, endWindow?, status, lastMaterializedAt?,
/// nextFireAt?, createdAt, updatedAt)`.
///
/// `catchUp = false` collapses any number of missed fire times into a
/// single materialization of the most recent one.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: ScheduleId,
    pub workflow_definition_id: WorkflowDefinitionId,
    pub cron_expression: String,
    pub timezone: String,
    #[serde(default)]
    pub catch_up: bool,
    #[serde(default)]
    pub parameter_template: Value,
    pub start_window: Option<DateTime<Utc>>,
    pub end_window: Option<DateTime<Utc>>,
    pub status: ScheduleStatus,
    pub last_materialized_at: Option<DateTime<Utc>>,
    pub next_fire_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    pub fn is_active(&self) -> bool {
        self.status == ScheduleStatus::Active
    }

    /// Whether `at` falls inside the schedule's optional start/end window.
    pub fn within_window(&self, at: DateTime<Utc>) -> bool {
        if let Some(start) = self.start_window {
            if at < start {
                return false;
            }
        }
        if let Some(end) = self.end_window {
            if at >= end {
                return false;
            }
        }
        true
    }
}
