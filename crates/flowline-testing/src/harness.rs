//! An in-memory [`Flowline`] wired to a [`FixedClock`] an integration
//! test can advance deterministically, plus the convenience methods
//! scenario tests reach for repeatedly: register-and-run, drive a run to
//! completion, and read back its terminal status.

use chrono::{DateTime, Duration, Utc};
use flowline::clock::FixedClock;
use flowline::config::Runtime;
use flowline::error::FlowResult;
use flowline::executor::{CreateRunOutcome, NewRunRequest, NoopStepRunner};
use flowline::ids::WorkflowRunId;
use flowline::model::{WorkflowDefinition, WorkflowRun};
use flowline::Flowline;
use std::sync::Arc;

/// Bundles a [`Flowline`] with the [`FixedClock`] backing it, so a test
/// can assert on both engine behavior and the clock it drove.
pub struct TestHarness {
    pub flowline: Flowline,
    pub clock: Arc<FixedClock>,
}

impl TestHarness {
    /// A harness with default [`Runtime`] config and the clock fixed at
    /// the moment of construction.
    pub fn new() -> Self {
        Self::at(Utc::now())
    }

    /// A harness with the clock fixed at `start`.
    pub fn at(start: DateTime<Utc>) -> Self {
        let clock = Arc::new(FixedClock::new(start));
        let flowline = Flowline::in_memory(Runtime::default(), clock.clone());
        Self { flowline, clock }
    }

    /// A harness with a non-default [`Runtime`], clock fixed at `start`.
    pub fn with_config(config: Runtime, start: DateTime<Utc>) -> Self {
        let clock = Arc::new(FixedClock::new(start));
        let flowline = Flowline::in_memory(config, clock.clone());
        Self { flowline, clock }
    }

    pub fn advance(&self, delta: Duration) {
        self.clock.advance(delta);
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Register `definition` and return the normalized copy the engine
    /// stored (DAG order, bundle/fanout normalization applied).
    pub fn register(&self, definition: WorkflowDefinition) -> FlowResult<WorkflowDefinition> {
        self.flowline.create_workflow(definition)
    }

    /// Create a run for `slug` and drive every step with
    /// [`NoopStepRunner`] until the run reaches a terminal status.
    pub async fn run_to_completion(&self, slug: &str, request: NewRunRequest) -> FlowResult<WorkflowRun> {
        let workflow = self.flowline.get_workflow(slug)?;
        let outcome = self.flowline.run_workflow(slug, request).await?;
        let run_id = match outcome {
            CreateRunOutcome::Created(run) => run.id,
            CreateRunOutcome::Conflict(run) => run.id,
        };
        self.flowline
            .executor
            .drive_to_completion(&workflow, run_id, &NoopStepRunner)
            .await?;
        self.flowline.executor.get_run(run_id).await
    }

    /// Fetch a run by id.
    pub async fn get_run(&self, run_id: WorkflowRunId) -> FlowResult<WorkflowRun> {
        self.flowline.executor.get_run(run_id).await
    }
}

impl Default for TestHarness {
    fn default() -> Self {
        Self::new()
    }
}
