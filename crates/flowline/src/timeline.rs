//! Activity & Timeline Aggregator (C9): merge runs, trigger deliveries,
//! and trigger-pause signals for a workflow into one time-ordered feed.

use crate::ids::{TriggerId, WorkflowDefinitionId};
use crate::model::{DeliveryStatus, RunStatus, TriggerDelivery, WorkflowRun};
use chrono::{DateTime, Duration, Utc};

pub const DEFAULT_LIMIT: usize = 200;
pub const MAX_LIMIT: usize = 500;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimelineEntryKind {
    Run,
    Delivery,
    TriggerPaused,
}

#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub kind: TimelineEntryKind,
    pub status: String,
    pub detail: serde_json::Value,
}

/// A trigger crossing its auto-pause failure threshold (§4.7), surfaced
/// on the timeline as `trigger_paused`. The source-level `source_paused`
/// signal is a non-goal here: there is no standalone event-source entity
/// in this reference tier to pause.
#[derive(Debug, Clone)]
pub struct TriggerPauseSignal {
    pub trigger_id: TriggerId,
    pub paused_at: DateTime<Utc>,
    pub reason: Option<String>,
}

/// Resolve a `1h|3h|6h|12h|24h|3d|7d` range preset to a duration. Unknown
/// presets fall back to the 24h default, matching an unspecified `range`.
pub fn range_duration(preset: &str) -> Duration {
    match preset {
        "1h" => Duration::hours(1),
        "3h" => Duration::hours(3),
        "6h" => Duration::hours(6),
        "12h" => Duration::hours(12),
        "3d" => Duration::days(3),
        "7d" => Duration::days(7),
        _ => Duration::hours(24),
    }
}

#[derive(Debug, Clone, Default)]
pub struct TimelineQuery {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub range: Option<String>,
    pub limit: Option<usize>,
    pub statuses: Option<Vec<String>>,
}

impl TimelineQuery {
    pub fn resolve_window(&self, now: DateTime<Utc>) -> (DateTime<Utc>, DateTime<Utc>) {
        match (self.from, self.to) {
            (Some(from), Some(to)) => (from, to),
            _ => (now - range_duration(self.range.as_deref().unwrap_or("24h")), now),
        }
    }

    pub fn resolve_limit(&self) -> usize {
        self.limit.unwrap_or(DEFAULT_LIMIT).min(MAX_LIMIT)
    }
}

/// Merge runs/deliveries/pause-signals for one workflow into a single
/// feed, sorted by `timestamp` descending with ties broken by `id`
/// ascending, truncated to `query.resolve_limit()`.
pub fn build(
    _workflow_definition_id: WorkflowDefinitionId,
    runs: &[WorkflowRun],
    deliveries: &[TriggerDelivery],
    pause_signals: &[TriggerPauseSignal],
    query: &TimelineQuery,
    now: DateTime<Utc>,
) -> Vec<TimelineEntry> {
    let (from, to) = query.resolve_window(now);
    let mut entries = Vec::new();

    for run in runs {
        if run.created_at < from || run.created_at > to {
            continue;
        }
        let status = format!("{:?}", run.status).to_lowercase();
        if !status_allowed(&query.statuses, &status) {
            continue;
        }
        entries.push(TimelineEntry {
            id: run.id.0.to_string(),
            timestamp: run.created_at,
            kind: TimelineEntryKind::Run,
            status,
            detail: serde_json::json!({
                "runId": run.id.0,
                "runKey": run.run_key,
                "status": format!("{:?}", run.status),
            }),
        });
    }

    for delivery in deliveries {
        if delivery.created_at < from || delivery.created_at > to {
            continue;
        }
        let status = format!("{:?}", delivery.status).to_lowercase();
        if !status_allowed(&query.statuses, &status) {
            continue;
        }
        entries.push(TimelineEntry {
            id: delivery.id.0.to_string(),
            timestamp: delivery.created_at,
            kind: TimelineEntryKind::Delivery,
            status,
            detail: serde_json::json!({
                "deliveryId": delivery.id.0,
                "triggerId": delivery.trigger_id.0,
                "status": format!("{:?}", delivery.status),
                "workflowRunId": delivery.workflow_run_id.map(|id| id.0),
            }),
        });
    }

    for signal in pause_signals {
        if signal.paused_at < from || signal.paused_at > to {
            continue;
        }
        if !status_allowed(&query.statuses, "paused") {
            continue;
        }
        entries.push(TimelineEntry {
            id: signal.trigger_id.0.to_string(),
            timestamp: signal.paused_at,
            kind: TimelineEntryKind::TriggerPaused,
            status: "paused".to_string(),
            detail: serde_json::json!({
                "triggerId": signal.trigger_id.0,
                "reason": signal.reason,
            }),
        });
    }

    entries.sort_by(|a, b| b.timestamp.cmp(&a.timestamp).then_with(|| a.id.cmp(&b.id)));
    entries.truncate(query.resolve_limit());
    entries
}

fn status_allowed(statuses: &Option<Vec<String>>, status: &str) -> bool {
    match statuses {
        None => true,
        Some(allowed) => allowed.iter().any(|s| s.eq_ignore_ascii_case(status)),
    }
}

/// Whether `status` represents a terminal run status, used by callers
/// deciding whether to keep polling a run referenced from a timeline
/// entry.
pub fn is_terminal_run_status(status: RunStatus) -> bool {
    matches!(status, RunStatus::Succeeded | RunStatus::Failed | RunStatus::Canceled)
}

/// Whether a delivery status is terminal (no further pipeline progress
/// expected without external intervention).
pub fn is_terminal_delivery_status(status: DeliveryStatus) -> bool {
    matches!(
        status,
        DeliveryStatus::Launched | DeliveryStatus::Skipped | DeliveryStatus::Failed
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{WorkflowDefinitionId, WorkflowRunId};
    use crate::model::RunStatus;
    use serde_json::Value;

    fn run(id_seed: u8, created_at: DateTime<Utc>, status: RunStatus) -> WorkflowRun {
        WorkflowRun {
            id: WorkflowRunId::new(),
            workflow_definition_id: WorkflowDefinitionId::new(),
            status,
            run_key: Some(format!("k{id_seed}")),
            run_key_normalized: None,
            parameters: Value::Null,
            context: Value::Null,
            output: Value::Null,
            partition_key: None,
            triggered_by: None,
            trigger: Value::Null,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            current_step_id: None,
            current_step_index: None,
            metrics: Value::Null,
            retry_summary: Default::default(),
            created_at,
            updated_at: created_at,
        }
    }

    #[test]
    fn entries_sort_newest_first() {
        let now = Utc::now();
        let runs = vec![
            run(1, now - Duration::minutes(10), RunStatus::Succeeded),
            run(2, now - Duration::minutes(1), RunStatus::Running),
        ];
        let query = TimelineQuery::default();
        let entries = build(WorkflowDefinitionId::new(), &runs, &[], &[], &query, now);
        assert_eq!(entries.len(), 2);
        assert!(entries[0].timestamp > entries[1].timestamp);
    }

    #[test]
    fn entries_outside_range_are_excluded() {
        let now = Utc::now();
        let runs = vec![run(1, now - Duration::days(2), RunStatus::Succeeded)];
        let query = TimelineQuery {
            range: Some("1h".to_string()),
            ..Default::default()
        };
        let entries = build(WorkflowDefinitionId::new(), &runs, &[], &[], &query, now);
        assert!(entries.is_empty());
    }

    #[test]
    fn limit_is_capped_at_500() {
        let query = TimelineQuery {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(query.resolve_limit(), MAX_LIMIT);
    }

    #[test]
    fn status_filter_excludes_non_matching_entries() {
        let now = Utc::now();
        let runs = vec![
            run(1, now - Duration::minutes(5), RunStatus::Succeeded),
            run(2, now - Duration::minutes(4), RunStatus::Failed),
        ];
        let query = TimelineQuery {
            statuses: Some(vec!["failed".to_string()]),
            ..Default::default()
        };
        let entries = build(WorkflowDefinitionId::new(), &runs, &[], &[], &query, now);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "failed");
    }
}
