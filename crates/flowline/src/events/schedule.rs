//! Cron schedule materialization (§4.7 "Schedule materialization"):
//! compute fire times in the schedule's timezone, collapse or catch up
//! missed fires, gate by the start/end window, and launch a run per
//! fire.

use crate::error::{FlowError, FlowResult};
use crate::executor::{CreateRunOutcome, Executor, NewRunRequest};
use crate::model::{Schedule, WorkflowDefinition, WorkflowRun};
use crate::template;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use std::str::FromStr;

/// Upper bound on how many missed fires a single catch-up materialization
/// replays, so a long-paused schedule with a tight cron expression can't
/// flood the run queue in one call.
const MAX_CATCH_UP_FIRES: usize = 100;

fn parse_timezone(timezone: &str) -> FlowResult<Tz> {
    Tz::from_str(timezone).map_err(|_| FlowError::validation(format!("unknown timezone: {timezone}")))
}

fn parse_cron(cron_expression: &str) -> FlowResult<CronSchedule> {
    CronSchedule::from_str(cron_expression)
        .map_err(|e| FlowError::validation(format!("invalid cron expression: {e}")))
}

/// The next fire time strictly after `after`, in UTC.
pub fn next_fire_at(cron_expression: &str, timezone: &str, after: DateTime<Utc>) -> FlowResult<Option<DateTime<Utc>>> {
    let tz = parse_timezone(timezone)?;
    let schedule = parse_cron(cron_expression)?;
    let after_tz = after.with_timezone(&tz);
    Ok(schedule.after(&after_tz).next().map(|dt| dt.with_timezone(&Utc)))
}

/// Every fire time in `(since, until]`, capped at `MAX_CATCH_UP_FIRES`.
fn fires_between(
    cron_expression: &str,
    timezone: &str,
    since: DateTime<Utc>,
    until: DateTime<Utc>,
) -> FlowResult<Vec<DateTime<Utc>>> {
    let tz = parse_timezone(timezone)?;
    let schedule = parse_cron(cron_expression)?;
    let since_tz = since.with_timezone(&tz);
    let until_tz = until.with_timezone(&tz);
    let fires = schedule
        .after(&since_tz)
        .take_while(|dt| *dt <= until_tz)
        .take(MAX_CATCH_UP_FIRES)
        .map(|dt| dt.with_timezone(&Utc))
        .collect();
    Ok(fires)
}

/// One materialization pass: compute the fires due since
/// `schedule.last_materialized_at`, gate by the window, launch a run per
/// fire (or only the latest when `catch_up` is false), and return the
/// created runs. Advances `schedule.last_materialized_at`/`next_fire_at`
/// in place; the caller persists the mutated schedule.
pub async fn materialize(
    schedule: &mut Schedule,
    workflow: &WorkflowDefinition,
    now: DateTime<Utc>,
    executor: &Executor,
) -> FlowResult<Vec<WorkflowRun>> {
    if !schedule.is_active() {
        return Ok(Vec::new());
    }

    let since = schedule.last_materialized_at.unwrap_or(now - chrono::Duration::minutes(1));
    let mut fires = fires_between(&schedule.cron_expression, &schedule.timezone, since, now)?;
    fires.retain(|at| schedule.within_window(*at));

    if !schedule.catch_up {
        if let Some(latest) = fires.pop() {
            fires = vec![latest];
        }
    }

    let mut launched = Vec::with_capacity(fires.len());
    for fire_at in &fires {
        let context = serde_json::json!({"scheduledFor": fire_at, "scheduleId": schedule.id.0});
        let parameters = template::render_json(&schedule.parameter_template, &context)?;
        let outcome = executor
            .create_run(
                workflow,
                NewRunRequest {
                    parameters: Some(parameters),
                    run_key: Some(format!("schedule:{}:{}", schedule.id.0, fire_at.to_rfc3339())),
                    partition_key: None,
                    triggered_by: Some(format!("schedule:{}", schedule.id.0)),
                    trigger: context,
                },
            )
            .await?;
        if let CreateRunOutcome::Created(run) = outcome {
            launched.push(run);
        }
    }

    schedule.last_materialized_at = Some(now);
    schedule.next_fire_at = next_fire_at(&schedule.cron_expression, &schedule.timezone, now)?;
    schedule.updated_at = now;

    Ok(launched)
}
