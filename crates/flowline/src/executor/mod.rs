//! Workflow Executor (C6): run creation, the run/step state machines,
//! retries, partition/run-key enforcement, asset tracking, replay, and
//! diffing.

pub mod fanout;
pub mod retry;
pub mod service_client;

use crate::clock::SharedClock;
use crate::concurrency::KeyedLock;
use crate::error::{ErrorKind, FlowError, FlowResult};
use crate::ids::{WorkflowDefinitionId, WorkflowRunId, WorkflowRunStepId};
use crate::model::{
    AssetSnapshot, FanOutSpec, Partitioning, RetryState, RunStatus, RunStepStatus, StepKind,
    WorkflowDefinition, WorkflowRun, WorkflowRunStep, WorkflowStep,
};
use crate::queue::{QueueKind, QueueSubstrate};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tokio::sync::RwLock;
use unicode_normalization::UnicodeNormalization;

/// The external job/container runtime and remote service fleet are
/// non-goals (§1); steps execute through this trait so the reference
/// executor can be driven deterministically under test.
#[async_trait]
pub trait StepRunner: Send + Sync {
    async fn run_step(&self, step: &WorkflowStep, input: &Value) -> FlowResult<Value>;
}

/// Always succeeds, echoing the input as output. Used by tests and by
/// callers exercising only the DAG/state-machine behavior.
#[derive(Default)]
pub struct NoopStepRunner;

#[async_trait]
impl StepRunner for NoopStepRunner {
    async fn run_step(&self, _step: &WorkflowStep, input: &Value) -> FlowResult<Value> {
        Ok(input.clone())
    }
}

/// Unicode NFKC normalize, lowercase (a practical case-fold), trim, and
/// cap at 200 chars, per §4.6 step 3.
pub fn normalize_run_key(raw: &str) -> String {
    let normalized: String = raw.nfkc().collect::<String>().to_lowercase();
    normalized.trim().chars().take(200).collect()
}

fn validate_partition_key(partitioning: &Partitioning, partition_key: &str) -> Result<(), String> {
    match partitioning {
        Partitioning::TimeWindow(spec) => {
            let instant: DateTime<Utc> = partition_key
                .parse()
                .map_err(|_| format!("Invalid partition key for timeWindow asset: {partition_key}"))?;
            let aligned = match spec.granularity {
                crate::model::TimeGranularity::Minute => instant.timestamp() % 60 == 0,
                crate::model::TimeGranularity::Hour => {
                    instant.timestamp() % 3600 == 0
                }
                crate::model::TimeGranularity::Day => {
                    use chrono::Timelike;
                    instant.hour() == 0 && instant.minute() == 0 && instant.second() == 0
                }
                crate::model::TimeGranularity::Week | crate::model::TimeGranularity::Month => true,
            };
            if !aligned {
                return Err(format!(
                    "partition key {partition_key} does not align to granularity {:?}",
                    spec.granularity
                ));
            }
            Ok(())
        }
        Partitioning::Static(spec) => {
            if spec.keys.iter().any(|k| k == partition_key) {
                Ok(())
            } else {
                Err(format!("Invalid partition key: {partition_key} is not a declared static key"))
            }
        }
        Partitioning::Dynamic(_) => Ok(()),
    }
}

#[derive(Debug, Clone, Default)]
pub struct NewRunRequest {
    pub parameters: Option<Value>,
    pub run_key: Option<String>,
    pub partition_key: Option<String>,
    pub triggered_by: Option<String>,
    pub trigger: Value,
}

pub enum CreateRunOutcome {
    Created(WorkflowRun),
    /// A `(workflowDefinitionId, runKeyNormalized)` conflict: the caller
    /// gets the already-active run back instead of a new one.
    Conflict(WorkflowRun),
}

struct RunState {
    run: WorkflowRun,
    steps: Vec<WorkflowRunStep>,
}

/// Outcome of driving one step (or fan-out child) through
/// [`Executor::run_step_with_retries`]: the terminal result, the attempt
/// number it finished on (1 if it succeeded or failed without a retry),
/// and the most recently computed backoff instant, if any retry was
/// scheduled along the way.
struct StepAttemptOutcome {
    result: FlowResult<Value>,
    attempt: u32,
    next_attempt_at: Option<DateTime<Utc>>,
}

pub struct Executor {
    queue: Arc<dyn QueueSubstrate>,
    clock: SharedClock,
    runs: DashMap<WorkflowRunId, RwLock<RunState>>,
    active_run_keys: DashMap<(WorkflowDefinitionId, String), WorkflowRunId>,
    run_key_lock: KeyedLock<(WorkflowDefinitionId, String)>,
}

impl Executor {
    pub fn new(queue: Arc<dyn QueueSubstrate>, clock: SharedClock) -> Self {
        Self {
            queue,
            clock,
            runs: DashMap::new(),
            active_run_keys: DashMap::new(),
            run_key_lock: KeyedLock::new(),
        }
    }

    fn partitioning_specs(workflow: &WorkflowDefinition) -> Vec<Partitioning> {
        workflow
            .asset_declarations()
            .into_iter()
            .filter_map(|(_, asset)| asset.partitioning.clone())
            .collect()
    }

    pub async fn create_run(
        &self,
        workflow: &WorkflowDefinition,
        request: NewRunRequest,
    ) -> FlowResult<CreateRunOutcome> {
        let now = self.clock.now();
        let parameters = request
            .parameters
            .unwrap_or_else(|| workflow.default_parameters.clone());

        let specs = Self::partitioning_specs(workflow);
        if !specs.is_empty() {
            let Some(partition_key) = &request.partition_key else {
                return Err(FlowError::partition_key_invalid("partitionKey is required"));
            };
            for spec in &specs {
                validate_partition_key(spec, partition_key)
                    .map_err(FlowError::partition_key_invalid)?;
            }
        }

        let run_key_normalized = request.run_key.as_deref().map(normalize_run_key);

        let _guard = if let Some(key) = &run_key_normalized {
            Some(self.run_key_lock.acquire((workflow.id, key.clone())).await)
        } else {
            None
        };

        if let Some(key) = &run_key_normalized {
            if let Some(existing_id) = self.active_run_keys.get(&(workflow.id, key.clone())) {
                let entry = self.runs.get(&existing_id).expect("active run tracked");
                let existing_run = entry.read().await.run.clone();
                return Ok(CreateRunOutcome::Conflict(existing_run));
            }
        }

        let run = WorkflowRun {
            id: WorkflowRunId::new(),
            workflow_definition_id: workflow.id,
            status: RunStatus::Pending,
            run_key: request.run_key,
            run_key_normalized: run_key_normalized.clone(),
            parameters,
            context: Value::Object(Default::default()),
            output: Value::Null,
            partition_key: request.partition_key,
            triggered_by: request.triggered_by,
            trigger: request.trigger,
            started_at: None,
            completed_at: None,
            duration_ms: None,
            current_step_id: None,
            current_step_index: None,
            metrics: Value::Null,
            retry_summary: Default::default(),
            created_at: now,
            updated_at: now,
        };

        self.runs.insert(
            run.id,
            RwLock::new(RunState {
                run: run.clone(),
                steps: Vec::new(),
            }),
        );
        if let Some(key) = run_key_normalized {
            self.active_run_keys.insert((workflow.id, key), run.id);
        }

        let enqueue_key = run
            .run_key_normalized
            .clone()
            .unwrap_or_else(|| run.id.to_string());
        if let Err(e) = self
            .queue
            .enqueue(
                QueueKind::WorkflowRun,
                enqueue_key,
                serde_json::json!({"runId": run.id.0}),
            )
            .await
        {
            let handle = self.runs.get(&run.id).expect("just inserted");
            let mut entry = handle.write().await;
            entry.run.mark_completed(RunStatus::Failed, now);
            entry.run.duration_ms = Some(0);
            return Err(FlowError::new(ErrorKind::QueueUnavailable, e));
        }

        Ok(CreateRunOutcome::Created(run))
    }

    fn release_run_key(&self, workflow_id: WorkflowDefinitionId, run_key_normalized: &Option<String>) {
        if let Some(key) = run_key_normalized {
            self.active_run_keys.remove(&(workflow_id, key.clone()));
        }
    }

    pub async fn get_run(&self, run_id: WorkflowRunId) -> FlowResult<WorkflowRun> {
        let entry = self
            .runs
            .get(&run_id)
            .ok_or_else(|| FlowError::not_found("run not found"))?;
        Ok(entry.read().await.run.clone())
    }

    pub async fn get_steps(&self, run_id: WorkflowRunId) -> FlowResult<Vec<WorkflowRunStep>> {
        let entry = self
            .runs
            .get(&run_id)
            .ok_or_else(|| FlowError::not_found("run not found"))?;
        Ok(entry.read().await.steps.clone())
    }

    /// All runs created against `workflow_id`, in no particular order.
    /// Used by the activity timeline (C9), which does its own sorting.
    pub async fn list_runs_for_workflow(&self, workflow_id: WorkflowDefinitionId) -> Vec<WorkflowRun> {
        let mut out = Vec::new();
        for entry in self.runs.iter() {
            let state = entry.value().read().await;
            if state.run.workflow_definition_id == workflow_id {
                out.push(state.run.clone());
            }
        }
        out
    }

    /// Drive a run to completion against `workflow`'s topological order,
    /// using `runner` for each non-fanout step. Steps are executed in
    /// topological order; true sibling concurrency is a worker-pool
    /// concern layered on top of this state machine.
    pub async fn drive_to_completion(
        &self,
        workflow: &WorkflowDefinition,
        run_id: WorkflowRunId,
        runner: &dyn StepRunner,
    ) -> FlowResult<Vec<AssetSnapshot>> {
        let now = self.clock.now();
        {
            let handle = self.runs.get(&run_id).expect("run exists");
            let mut entry = handle.write().await;
            entry.run.mark_started(now);
        }

        let mut produced = Vec::new();
        let mut run_failed = false;

        for step_id in &workflow.dag.topological_order {
            let step = workflow
                .steps
                .iter()
                .find(|s| &s.id == step_id)
                .expect("topological order only contains known steps");

            {
                let handle = self.runs.get(&run_id).expect("run exists");
                let mut entry = handle.write().await;
                entry.run.current_step_id = Some(step.id.clone());
                entry.run.updated_at = self.clock.now();
            }

            let (mut run_step, child_steps) = if let StepKind::Fanout { fanout } = &step.kind {
                let context = {
                    let handle = self.runs.get(&run_id).expect("run exists");
                    let entry = handle.read().await;
                    entry.run.parameters.clone()
                };
                self.run_fanout_step(run_id, step, fanout, &context, runner).await
            } else {
                let input = {
                    let handle = self.runs.get(&run_id).expect("run exists");
                    let entry = handle.read().await;
                    entry.run.parameters.clone()
                };
                let outcome = self.run_step_with_retries(step, runner, &input).await;
                let mut run_step = WorkflowRunStep {
                    id: WorkflowRunStepId::new(),
                    workflow_run_id: run_id,
                    step_id: step.id.clone(),
                    attempt: outcome.attempt,
                    status: RunStepStatus::Succeeded,
                    input,
                    output: Value::Null,
                    error_message: None,
                    produced_assets: Vec::new(),
                    parent_step_id: None,
                    fanout_index: None,
                    template_step_id: None,
                    retry_state: RetryState::default(),
                    retry_attempts: outcome.attempt.saturating_sub(1),
                    next_attempt_at: outcome.next_attempt_at,
                    last_heartbeat_at: None,
                };
                match outcome.result {
                    Ok(output) => run_step.output = output,
                    Err(e) => {
                        run_step.status = RunStepStatus::Failed;
                        run_step.error_message = Some(e.message.clone());
                    }
                }
                (run_step, Vec::new())
            };

            let handle = self.runs.get(&run_id).expect("run exists");
            let mut entry = handle.write().await;
            if run_step.status == RunStepStatus::Succeeded {
                for asset in &step.produces {
                    let snapshot = AssetSnapshot {
                        run_id,
                        step_id: step.id.clone(),
                        asset_id: asset.asset_id.clone(),
                        partition_key: entry.run.partition_key.clone(),
                        produced_at: self.clock.now(),
                        updated_at: self.clock.now(),
                        created_at: self.clock.now(),
                        payload: run_step.output.clone(),
                        schema: asset.schema.clone(),
                        freshness: asset.freshness.clone(),
                    };
                    run_step.produced_assets.push(asset.asset_id.clone());
                    produced.push(snapshot);
                }
            } else {
                run_failed = true;
            }
            entry.steps.extend(child_steps);
            entry.steps.push(run_step);
            if run_failed {
                break;
            }
        }

        let handle = self.runs.get(&run_id).expect("run exists");
        let mut entry = handle.write().await;
        let final_status = if run_failed {
            RunStatus::Failed
        } else {
            RunStatus::Succeeded
        };
        entry.run.current_step_id = None;
        entry.run.mark_completed(final_status, self.clock.now());
        let workflow_id = entry.run.workflow_definition_id;
        let run_key_normalized = entry.run.run_key_normalized.clone();
        drop(entry);
        self.release_run_key(workflow_id, &run_key_normalized);

        Ok(produced)
    }

    /// Run `step` (or a fan-out child materialized from a template)
    /// through its retry policy, returning not just the terminal result
    /// but the attempt number it finished on and the most recently
    /// computed backoff instant — both of which the caller records onto
    /// the `WorkflowRunStep` (§3: `retryAttempts`, `nextAttemptAt`).
    async fn run_step_with_retries(
        &self,
        step: &WorkflowStep,
        runner: &dyn StepRunner,
        input: &Value,
    ) -> StepAttemptOutcome {
        let mut attempt = 1;
        let mut rng = rand::thread_rng();
        let mut next_attempt_at = None;
        loop {
            match runner.run_step(step, input).await {
                Ok(output) => {
                    return StepAttemptOutcome {
                        result: Ok(output),
                        attempt,
                        next_attempt_at,
                    };
                }
                Err(_) if attempt < step.retry_policy.max_attempts => {
                    next_attempt_at = Some(retry::next_attempt_at(
                        &step.retry_policy,
                        attempt + 1,
                        self.clock.now(),
                        &mut rng,
                    ));
                    attempt += 1;
                }
                Err(e) => {
                    return StepAttemptOutcome {
                        result: Err(e),
                        attempt,
                        next_attempt_at,
                    };
                }
            }
        }
    }

    /// Evaluate a fan-out step's `collection`, materialize and dispatch
    /// its children up to `maxConcurrency`, and aggregate their outputs
    /// under `storeResultsAs` (§4.6). Returns the fan-out step's own run
    /// step (status derived from whether any child failed) plus one run
    /// step per materialized child, each tagged with `parentStepId`,
    /// `fanoutIndex`, and `templateStepId`.
    async fn run_fanout_step(
        &self,
        run_id: WorkflowRunId,
        parent_step: &WorkflowStep,
        fanout: &FanOutSpec,
        context: &Value,
        runner: &dyn StepRunner,
    ) -> (WorkflowRunStep, Vec<WorkflowRunStep>) {
        let elements = match fanout::evaluate_collection(fanout, context) {
            Ok(elements) => elements,
            Err(e) => {
                let run_step = WorkflowRunStep {
                    id: WorkflowRunStepId::new(),
                    workflow_run_id: run_id,
                    step_id: parent_step.id.clone(),
                    attempt: 1,
                    status: RunStepStatus::Failed,
                    input: context.clone(),
                    output: Value::Null,
                    error_message: Some(e.message.clone()),
                    produced_assets: Vec::new(),
                    parent_step_id: None,
                    fanout_index: None,
                    template_step_id: Some(fanout.template_id.clone()),
                    retry_state: RetryState::default(),
                    retry_attempts: 0,
                    next_attempt_at: None,
                    last_heartbeat_at: Some(self.clock.now()),
                };
                return (run_step, Vec::new());
            }
        };

        let children = fanout::materialize_children(elements);
        let template_id = fanout.template_id.clone();
        let retry_policy = parent_step.retry_policy.clone();
        let template_kind = (*fanout.template).clone();

        let results = fanout::dispatch(children, fanout.max_concurrency, |child| {
            let child_step = WorkflowStep {
                id: format!("{template_id}-{}", child.index),
                depends_on: Vec::new(),
                retry_policy: retry_policy.clone(),
                kind: template_kind.clone(),
                store_result_as: None,
                produces: Vec::new(),
            };
            let index = child.index;
            let element = child.element;
            async move {
                let outcome = self.run_step_with_retries(&child_step, runner, &element).await;
                (index, child_step.id.clone(), element, outcome)
            }
        })
        .await;

        let mut child_steps = Vec::with_capacity(results.len());
        let mut aggregated = Vec::with_capacity(results.len());
        let mut first_error: Option<FlowError> = None;

        for (index, child_step_id, element, outcome) in results {
            let mut child_run_step = WorkflowRunStep {
                id: WorkflowRunStepId::new(),
                workflow_run_id: run_id,
                step_id: child_step_id,
                attempt: outcome.attempt,
                status: RunStepStatus::Succeeded,
                input: element,
                output: Value::Null,
                error_message: None,
                produced_assets: Vec::new(),
                parent_step_id: Some(parent_step.id.clone()),
                fanout_index: Some(index),
                template_step_id: Some(fanout.template_id.clone()),
                retry_state: RetryState::default(),
                retry_attempts: outcome.attempt.saturating_sub(1),
                next_attempt_at: outcome.next_attempt_at,
                last_heartbeat_at: Some(self.clock.now()),
            };
            match outcome.result {
                Ok(output) => {
                    aggregated.push(output.clone());
                    child_run_step.output = output;
                }
                Err(e) => {
                    child_run_step.status = RunStepStatus::Failed;
                    child_run_step.error_message = Some(e.message.clone());
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
            child_steps.push(child_run_step);
        }

        let mut parent_run_step = WorkflowRunStep {
            id: WorkflowRunStepId::new(),
            workflow_run_id: run_id,
            step_id: parent_step.id.clone(),
            attempt: 1,
            status: RunStepStatus::Succeeded,
            input: context.clone(),
            output: Value::Null,
            error_message: None,
            produced_assets: Vec::new(),
            parent_step_id: None,
            fanout_index: None,
            template_step_id: Some(fanout.template_id.clone()),
            retry_state: RetryState::default(),
            retry_attempts: 0,
            next_attempt_at: None,
            last_heartbeat_at: Some(self.clock.now()),
        };
        match first_error {
            Some(e) => {
                parent_run_step.status = RunStepStatus::Failed;
                parent_run_step.error_message = Some(e.message.clone());
            }
            None => {
                let mut aggregate = serde_json::Map::new();
                aggregate.insert(fanout.store_results_as.clone(), Value::Array(aggregated));
                parent_run_step.output = Value::Object(aggregate);
            }
        }

        (parent_run_step, child_steps)
    }

    /// Create a new run with the same `(parameters, triggeredBy, trigger,
    /// partitionKey)` as `source_run_id`. Fails with `stale_assets` if any
    /// supplied `stale_asset_ids` is non-empty, unless `allow_stale_assets`.
    pub async fn replay(
        &self,
        workflow: &WorkflowDefinition,
        source_run_id: WorkflowRunId,
        allow_stale_assets: bool,
        stale_asset_ids: Vec<String>,
    ) -> FlowResult<CreateRunOutcome> {
        if !stale_asset_ids.is_empty() && !allow_stale_assets {
            return Err(FlowError::stale_assets(serde_json::json!({
                "staleAssets": stale_asset_ids,
            })));
        }
        let source = self.get_run(source_run_id).await?;
        self.create_run(
            workflow,
            NewRunRequest {
                parameters: Some(source.parameters),
                run_key: None,
                partition_key: source.partition_key,
                triggered_by: source.triggered_by,
                trigger: source.trigger,
            },
        )
        .await
    }

    /// JSON diffs of parameters/context/output, status-transition diff,
    /// and produced-asset diff by `(assetId, partitionKey)`, between two
    /// runs of the same workflow.
    pub async fn diff(&self, base_run_id: WorkflowRunId, compare_run_id: WorkflowRunId) -> FlowResult<Value> {
        let base = self.get_run(base_run_id).await?;
        let compare = self.get_run(compare_run_id).await?;
        let base_steps = self.get_steps(base_run_id).await?;
        let compare_steps = self.get_steps(compare_run_id).await?;

        Ok(serde_json::json!({
            "parameters": json_diff(&base.parameters, &compare.parameters),
            "context": json_diff(&base.context, &compare.context),
            "output": json_diff(&base.output, &compare.output),
            "statusTransitions": {
                "base": format!("{:?}", base.status),
                "compare": format!("{:?}", compare.status),
            },
            "assets": asset_diff(&base_steps, &compare_steps),
        }))
    }
}

fn json_diff(base: &Value, compare: &Value) -> Value {
    if base == compare {
        Value::Null
    } else {
        serde_json::json!({"base": base, "compare": compare})
    }
}

fn asset_diff(base_steps: &[WorkflowRunStep], compare_steps: &[WorkflowRunStep]) -> Value {
    let base_assets: std::collections::HashSet<&String> =
        base_steps.iter().flat_map(|s| s.produced_assets.iter()).collect();
    let compare_assets: std::collections::HashSet<&String> =
        compare_steps.iter().flat_map(|s| s.produced_assets.iter()).collect();

    let only_in_base: Vec<&&String> = base_assets.difference(&compare_assets).collect();
    let only_in_compare: Vec<&&String> = compare_assets.difference(&base_assets).collect();
    serde_json::json!({
        "onlyInBase": only_in_base,
        "onlyInCompare": only_in_compare,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{BundleRef, Jitter, RetryPolicy, RetryStrategy, WorkflowDefinitionId};
    use crate::queue::InMemoryQueue;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn job_step(id: &str, depends_on: &[&str]) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            depends_on: depends_on.iter().map(|s| s.to_string()).collect(),
            retry_policy: RetryPolicy::default(),
            kind: StepKind::Job {
                bundle: BundleRef {
                    strategy: None,
                    slug: "noop".into(),
                    version: None,
                    export_name: None,
                    entry_point: None,
                },
            },
            store_result_as: None,
            produces: Vec::new(),
        }
    }

    fn fanout_step(id: &str, template_id: &str, collection: &str, max_concurrency: u32) -> WorkflowStep {
        WorkflowStep {
            id: id.to_string(),
            depends_on: Vec::new(),
            retry_policy: RetryPolicy::default(),
            kind: StepKind::Fanout {
                fanout: FanOutSpec {
                    collection: collection.to_string(),
                    max_items: 10,
                    max_concurrency,
                    store_results_as: "results".to_string(),
                    template_id: template_id.to_string(),
                    template: Box::new(StepKind::Job {
                        bundle: BundleRef {
                            strategy: None,
                            slug: "noop".into(),
                            version: None,
                            export_name: None,
                            entry_point: None,
                        },
                    }),
                },
            },
            store_result_as: None,
            produces: Vec::new(),
        }
    }

    /// Fails its first `failures_before_success` calls, then always
    /// succeeds, echoing the input. Used to exercise retry bookkeeping.
    struct FlakyStepRunner {
        remaining_failures: AtomicU32,
    }

    #[async_trait]
    impl StepRunner for FlakyStepRunner {
        async fn run_step(&self, _step: &WorkflowStep, input: &Value) -> FlowResult<Value> {
            if self.remaining_failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                Some(n.saturating_sub(1))
            })
            .unwrap()
                > 0
            {
                Err(FlowError::new(ErrorKind::Internal, "flaky failure"))
            } else {
                Ok(input.clone())
            }
        }
    }

    fn workflow(steps: Vec<WorkflowStep>) -> WorkflowDefinition {
        let now = Utc::now();
        let mut def = WorkflowDefinition {
            id: WorkflowDefinitionId::new(),
            slug: "w1".into(),
            name: "w1".into(),
            version: 1,
            description: None,
            steps,
            parameters_schema: Value::Null,
            default_parameters: Value::Null,
            output_schema: Value::Null,
            metadata: Value::Null,
            dag: Default::default(),
            created_at: now,
            updated_at: now,
        };
        crate::dag::validate_and_normalize(&mut def).unwrap();
        def
    }

    #[tokio::test]
    async fn run_succeeds_in_topological_order() {
        let def = workflow(vec![job_step("a", &[]), job_step("b", &["a"])]);
        let executor = Executor::new(InMemoryQueue::new(), crate::clock::system_clock());
        let outcome = executor
            .create_run(&def, NewRunRequest::default())
            .await
            .unwrap();
        let CreateRunOutcome::Created(run) = outcome else {
            panic!("expected created run");
        };
        executor
            .drive_to_completion(&def, run.id, &NoopStepRunner)
            .await
            .unwrap();
        let finished = executor.get_run(run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);
        let steps = executor.get_steps(run.id).await.unwrap();
        assert_eq!(steps[0].step_id, "a");
        assert_eq!(steps[1].step_id, "b");
    }

    #[tokio::test]
    async fn duplicate_run_key_returns_conflict() {
        let def = workflow(vec![job_step("a", &[])]);
        let executor = Executor::new(InMemoryQueue::new(), crate::clock::system_clock());
        let first = executor
            .create_run(
                &def,
                NewRunRequest {
                    run_key: Some("K".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let CreateRunOutcome::Created(first_run) = first else {
            panic!("expected created run");
        };

        let second = executor
            .create_run(
                &def,
                NewRunRequest {
                    run_key: Some("K".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        match second {
            CreateRunOutcome::Conflict(existing) => assert_eq!(existing.id, first_run.id),
            CreateRunOutcome::Created(_) => panic!("expected conflict"),
        }
    }

    #[tokio::test]
    async fn partition_key_required_when_assets_are_partitioned() {
        let mut step = job_step("a", &[]);
        step.produces.push(crate::model::AssetDeclaration {
            asset_id: "ds".to_string(),
            direction: crate::model::AssetDirection::Produces,
            schema: Value::Null,
            freshness: None,
            auto_materialize: None,
            partitioning: Some(Partitioning::TimeWindow(crate::model::TimeWindowPartitioning {
                granularity: crate::model::TimeGranularity::Hour,
                timezone: None,
                format: None,
                lookback_windows: None,
            })),
        });
        let def = workflow(vec![step]);
        let executor = Executor::new(InMemoryQueue::new(), crate::clock::system_clock());

        let err = executor
            .create_run(&def, NewRunRequest::default())
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::error::ErrorKind::PartitionKeyInvalid);

        let ok = executor
            .create_run(
                &def,
                NewRunRequest {
                    partition_key: Some("2025-01-01T00:00:00Z".to_string()),
                    ..Default::default()
                },
            )
            .await;
        assert!(ok.is_ok());
    }

    #[tokio::test]
    async fn fanout_step_expands_children_and_aggregates_results() {
        let def = workflow(vec![fanout_step(
            "fo",
            "fo-child",
            "{{items | json_encode}}",
            2,
        )]);
        let executor = Executor::new(InMemoryQueue::new(), crate::clock::system_clock());
        let outcome = executor
            .create_run(
                &def,
                NewRunRequest {
                    parameters: Some(serde_json::json!({"items": [1, 2, 3]})),
                    ..Default::default()
                },
            )
            .await
            .unwrap();
        let CreateRunOutcome::Created(run) = outcome else {
            panic!("expected created run");
        };
        executor
            .drive_to_completion(&def, run.id, &NoopStepRunner)
            .await
            .unwrap();

        let finished = executor.get_run(run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);

        let steps = executor.get_steps(run.id).await.unwrap();
        // one parent run step plus one per fanned-out element
        assert_eq!(steps.len(), 4);

        let children: Vec<&WorkflowRunStep> =
            steps.iter().filter(|s| s.parent_step_id.is_some()).collect();
        assert_eq!(children.len(), 3);
        for child in &children {
            assert_eq!(child.parent_step_id.as_deref(), Some("fo"));
            assert_eq!(child.template_step_id.as_deref(), Some("fo-child"));
            assert!(child.step_id.starts_with("fo-child-"));
        }

        let parent = steps.iter().find(|s| s.step_id == "fo").unwrap();
        assert_eq!(parent.status, RunStepStatus::Succeeded);
        let results = parent.output["results"].as_array().unwrap();
        assert_eq!(results.len(), 3);
    }

    #[tokio::test]
    async fn retried_step_records_attempt_count_and_next_attempt_at() {
        let mut step = job_step("a", &[]);
        step.retry_policy = RetryPolicy {
            max_attempts: 3,
            strategy: RetryStrategy::Fixed,
            initial_delay_ms: 10,
            max_delay_ms: 10,
            jitter: Jitter::None,
        };
        let def = workflow(vec![step]);
        let executor = Executor::new(InMemoryQueue::new(), crate::clock::system_clock());
        let outcome = executor
            .create_run(&def, NewRunRequest::default())
            .await
            .unwrap();
        let CreateRunOutcome::Created(run) = outcome else {
            panic!("expected created run");
        };

        let runner = FlakyStepRunner {
            remaining_failures: AtomicU32::new(2),
        };
        executor
            .drive_to_completion(&def, run.id, &runner)
            .await
            .unwrap();

        let finished = executor.get_run(run.id).await.unwrap();
        assert_eq!(finished.status, RunStatus::Succeeded);

        let steps = executor.get_steps(run.id).await.unwrap();
        assert_eq!(steps.len(), 1);
        assert_eq!(steps[0].attempt, 3);
        assert_eq!(steps[0].retry_attempts, 2);
        assert!(steps[0].next_attempt_at.is_some());
    }
}
