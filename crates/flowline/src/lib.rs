//! Workflow orchestration and dataset-lifecycle core.
//!
//! This crate is organized by component rather than by layer: DAG
//! validation (`dag`), run execution (`executor`), the event/schedule
//! delivery pipeline (`events`), the asset graph (`assets`), manifest
//! storage and caching (`manifest_store`, `manifest_cache`), dataset
//! lifecycle maintenance (`lifecycle`), and activity aggregation
//! (`timeline`) each own their slice of the domain model (`model`).
//! Queueing, pub/sub, and partition storage are external collaborators
//! specified as traits (`queue`, `event_bus`, `partition_storage`) with
//! in-memory reference implementations for tests and standalone runs.

pub mod assets;
pub mod clock;
pub mod concurrency;
pub mod config;
pub mod dag;
pub mod error;
pub mod event_bus;
pub mod events;
pub mod executor;
pub mod ids;
pub mod json;
pub mod lifecycle;
pub mod manifest_cache;
pub mod manifest_store;
pub mod model;
pub mod partition_storage;
pub mod queue;
pub mod template;
pub mod timeline;

use crate::assets::AssetGraph;
use crate::clock::SharedClock;
use crate::config::Runtime;
use crate::error::{FlowError, FlowResult};
use crate::event_bus::{BroadcastEventBus, EventBus};
use crate::events::DeliveryEngine;
use crate::executor::{CreateRunOutcome, Executor, NewRunRequest};
use crate::ids::WorkflowRunId;
use crate::lifecycle::audit::{AuditPruner, InMemoryAuditLog};
use crate::lifecycle::{CompactionEngine, RetentionEngine};
use crate::manifest_cache::ManifestCache;
use crate::manifest_store::memory::InMemoryManifestStore;
use crate::manifest_store::ManifestStore;
use crate::model::WorkflowDefinition;
use crate::partition_storage::{InMemoryPartitionStorage, PartitionStorage};
use crate::queue::{InMemoryQueue, QueueSubstrate};
use crate::timeline::{TimelineEntry, TimelineQuery};
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;

/// The assembled, in-memory-backed reference deployment of every
/// component, wired together with the defaults a standalone run or test
/// suite needs. A production deployment swaps `manifest_store` for the
/// Postgres-backed implementation and `queue`/`event_bus` for managed
/// equivalents; the component APIs are unchanged either way.
pub struct Flowline {
    pub config: Runtime,
    pub clock: SharedClock,
    pub manifest_store: Arc<dyn ManifestStore>,
    pub partition_storage: Arc<dyn PartitionStorage>,
    pub manifest_cache: Arc<ManifestCache>,
    pub queue: Arc<dyn QueueSubstrate>,
    pub event_bus: Arc<dyn EventBus>,
    pub executor: Arc<Executor>,
    pub delivery_engine: Arc<DeliveryEngine>,
    pub compaction: Arc<CompactionEngine>,
    pub retention: Arc<RetentionEngine>,
    pub audit_pruner: Arc<AuditPruner>,
    /// Registered workflow definitions, keyed by slug. The reference
    /// deployment keeps these in memory alongside the run/step state the
    /// executor tracks; a durable deployment would back this with the
    /// same catalog store as datasets.
    workflow_definitions: DashMap<String, WorkflowDefinition>,
}

impl Flowline {
    /// Build a fully in-memory instance suitable for tests and for
    /// running the engine without external infrastructure.
    pub fn in_memory(config: Runtime, clock: SharedClock) -> Self {
        let manifest_store: Arc<dyn ManifestStore> = Arc::new(InMemoryManifestStore::new(clock.clone()));
        Self::with_manifest_store(config, clock, manifest_store)
    }

    /// Build an instance backed by `manifest_store`, e.g. a
    /// `flowline-postgres-store::PostgresManifestStore` for a deployment
    /// that needs durability across process restarts. Queueing and event
    /// delivery remain in-process; swapping those for managed equivalents
    /// doesn't change any component's API.
    pub fn with_manifest_store(config: Runtime, clock: SharedClock, manifest_store: Arc<dyn ManifestStore>) -> Self {
        let partition_storage: Arc<dyn PartitionStorage> = InMemoryPartitionStorage::new();
        let manifest_cache = Arc::new(ManifestCache::new(
            chrono::Duration::milliseconds(config.default_throttle_window_ms as i64),
            clock.clone(),
        ));
        let queue: Arc<dyn QueueSubstrate> = InMemoryQueue::new();
        let event_bus: Arc<dyn EventBus> = Arc::new(BroadcastEventBus::default());
        let audit_log = InMemoryAuditLog::new();

        let executor = Arc::new(Executor::new(queue.clone(), clock.clone()));
        let delivery_engine = Arc::new(DeliveryEngine::new(clock.clone(), event_bus.clone()));
        let compaction = Arc::new(CompactionEngine::new(
            manifest_store.clone(),
            partition_storage.clone(),
            manifest_cache.clone(),
            event_bus.clone(),
            config.clone(),
            clock.clone(),
        ));
        let retention = Arc::new(RetentionEngine::new(
            manifest_store.clone(),
            manifest_cache.clone(),
            event_bus.clone(),
            clock.clone(),
        ));
        let audit_pruner = Arc::new(AuditPruner::new(
            audit_log,
            clock.clone(),
            config.audit_log_ttl_hours,
            config.audit_prune_batch_size,
        ));

        Self {
            config,
            clock,
            manifest_store,
            partition_storage,
            manifest_cache,
            queue,
            event_bus,
            executor,
            delivery_engine,
            compaction,
            retention,
            audit_pruner,
            workflow_definitions: DashMap::new(),
        }
    }

    /// Validate and normalize `definition` (DAG cycle/dependency checks,
    /// bundle/fanout normalization) and register it under its slug.
    /// Fails with `Conflict` if the slug is already registered.
    pub fn create_workflow(&self, mut definition: WorkflowDefinition) -> FlowResult<WorkflowDefinition> {
        dag::validate_and_normalize(&mut definition)?;
        if self.workflow_definitions.contains_key(&definition.slug) {
            return Err(FlowError::conflict(format!(
                "workflow slug '{}' already exists",
                definition.slug
            )));
        }
        self.workflow_definitions
            .insert(definition.slug.clone(), definition.clone());
        Ok(definition)
    }

    /// Look up a registered workflow definition by slug.
    pub fn get_workflow(&self, slug: &str) -> FlowResult<WorkflowDefinition> {
        self.workflow_definitions
            .get(slug)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| FlowError::not_found(format!("workflow '{slug}' not found")))
    }

    /// Create a run of the workflow registered under `slug` (§4.6).
    pub async fn run_workflow(&self, slug: &str, request: NewRunRequest) -> FlowResult<CreateRunOutcome> {
        let workflow = self.get_workflow(slug)?;
        self.executor.create_run(&workflow, request).await
    }

    /// Replay `source_run_id` of the workflow registered under
    /// `workflow_slug`, gated on stale assets unless overridden.
    pub async fn replay_run(
        &self,
        workflow_slug: &str,
        source_run_id: WorkflowRunId,
        allow_stale_assets: bool,
        stale_asset_ids: Vec<String>,
    ) -> FlowResult<CreateRunOutcome> {
        let workflow = self.get_workflow(workflow_slug)?;
        self.executor
            .replay(&workflow, source_run_id, allow_stale_assets, stale_asset_ids)
            .await
    }

    /// Diff two runs' parameters, context, output, and produced assets.
    pub async fn diff_runs(&self, base_run_id: WorkflowRunId, compare_run_id: WorkflowRunId) -> FlowResult<Value> {
        self.executor.diff(base_run_id, compare_run_id).await
    }

    /// The merged run/delivery/pause-signal activity feed (C9) for the
    /// workflow registered under `workflow_slug`. Trigger deliveries and
    /// pause signals are a non-goal here pending a standalone trigger
    /// store; the feed covers runs only.
    pub async fn get_timeline(
        &self,
        workflow_slug: &str,
        query: TimelineQuery,
    ) -> FlowResult<Vec<TimelineEntry>> {
        let workflow = self.get_workflow(workflow_slug)?;
        let runs = self.executor.list_runs_for_workflow(workflow.id).await;
        let now = self.clock.now();
        Ok(crate::timeline::build(workflow.id, &runs, &[], &[], &query, now))
    }

    /// The asset graph (C8) across every registered workflow definition.
    #[must_use]
    pub fn get_graph(&self) -> AssetGraph {
        let workflows: Vec<WorkflowDefinition> = self
            .workflow_definitions
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        crate::assets::build_graph(&workflows)
    }
}

impl Default for Flowline {
    fn default() -> Self {
        Self::in_memory(Runtime::default(), clock::system_clock())
    }
}
