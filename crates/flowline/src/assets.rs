//! Asset Graph & Auto-Materialize (C8): graph derivation from workflow
//! declarations, staleness detection, and the auto-materialize claim
//! lifecycle.

use crate::error::{FlowError, FlowResult};
use crate::ids::{WorkflowDefinitionId, WorkflowRunId};
use crate::model::{AssetDirection, AssetSnapshot, WorkflowDefinition};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

/// A step that both consumes `from_asset` and produces `to_asset`,
/// derived per §4.8: "edges `(producerAsset -> stepOf(workflow)) ->
/// consumerAsset)`".
#[derive(Debug, Clone)]
pub struct AssetEdge {
    pub from_asset: String,
    pub via_workflow: WorkflowDefinitionId,
    pub via_step: String,
    pub to_asset: String,
}

#[derive(Debug, Clone, Default)]
pub struct AssetGraph {
    pub producers: HashMap<String, Vec<(WorkflowDefinitionId, String)>>,
    pub consumers: HashMap<String, Vec<(WorkflowDefinitionId, String)>>,
    pub edges: Vec<AssetEdge>,
}

impl AssetGraph {
    /// Assets that directly feed `asset_id`, i.e. the `from_asset` side of
    /// every edge whose `to_asset` matches.
    pub fn upstream_of<'a>(&'a self, asset_id: &str) -> impl Iterator<Item = &'a str> {
        self.edges
            .iter()
            .filter(move |e| e.to_asset == asset_id)
            .map(|e| e.from_asset.as_str())
    }
}

/// Derive the asset graph from every workflow's step declarations. A step
/// declaring both a `consumes` and a `produces` entry contributes one
/// edge per (consumed, produced) pair.
pub fn build_graph(workflows: &[WorkflowDefinition]) -> AssetGraph {
    let mut graph = AssetGraph::default();
    for workflow in workflows {
        for step in &workflow.steps {
            let produced: Vec<&str> = step
                .produces
                .iter()
                .filter(|a| a.direction == AssetDirection::Produces)
                .map(|a| a.asset_id.as_str())
                .collect();
            let consumed: Vec<&str> = step
                .produces
                .iter()
                .filter(|a| a.direction == AssetDirection::Consumes)
                .map(|a| a.asset_id.as_str())
                .collect();
            for p in &produced {
                graph
                    .producers
                    .entry(p.to_string())
                    .or_default()
                    .push((workflow.id, step.id.clone()));
            }
            for c in &consumed {
                graph
                    .consumers
                    .entry(c.to_string())
                    .or_default()
                    .push((workflow.id, step.id.clone()));
            }
            for c in &consumed {
                for p in &produced {
                    graph.edges.push(AssetEdge {
                        from_asset: c.to_string(),
                        via_workflow: workflow.id,
                        via_step: step.id.clone(),
                        to_asset: p.to_string(),
                    });
                }
            }
        }
    }
    graph
}

fn materialization_key(s: &AssetSnapshot) -> (DateTime<Utc>, DateTime<Utc>, DateTime<Utc>, WorkflowRunId) {
    (s.produced_at, s.updated_at, s.created_at, s.run_id)
}

/// The most recent snapshot of `(asset_id, partition_key)` among
/// `snapshots`, per §4.8's `(producedAt, updatedAt, createdAt, runId)`
/// ordering tuple.
pub fn latest_materialization<'a>(
    asset_id: &str,
    partition_key: Option<&str>,
    snapshots: &'a [AssetSnapshot],
) -> Option<&'a AssetSnapshot> {
    snapshots
        .iter()
        .filter(|s| s.asset_id == asset_id && s.partition_key.as_deref() == partition_key)
        .max_by_key(|s| materialization_key(s))
}

/// Whether `(asset_id, partition_key)` is stale: either explicitly marked
/// so, or any direct upstream asset has a newer materialization.
pub fn is_stale(
    graph: &AssetGraph,
    asset_id: &str,
    partition_key: Option<&str>,
    explicitly_stale: &HashSet<(String, Option<String>)>,
    snapshots: &[AssetSnapshot],
) -> bool {
    if explicitly_stale.contains(&(asset_id.to_string(), partition_key.map(str::to_string))) {
        return true;
    }
    let Some(downstream) = latest_materialization(asset_id, partition_key, snapshots) else {
        return false;
    };
    graph.upstream_of(asset_id).any(|upstream_id| {
        latest_materialization(upstream_id, partition_key, snapshots)
            .is_some_and(|upstream| materialization_key(upstream) > materialization_key(downstream))
    })
}

/// `(workflowDefinitionId, assetId, partitionKey?)`, the uniqueness key
/// for an active auto-materialize claim (§4.8).
pub type ClaimKey = (WorkflowDefinitionId, String, Option<String>);

#[derive(Debug)]
pub struct AutoMaterializeClaim {
    pub workflow_run_id: Option<WorkflowRunId>,
    pub reason: String,
    pub requested_at: DateTime<Utc>,
    pub claimed_at: Option<DateTime<Utc>>,
    pub claim_owner: String,
    pub context: Value,
    pub consecutive_failures: u32,
    pub next_eligible_at: Option<DateTime<Utc>>,
}

/// At most one active claim per [`ClaimKey`] at a time, with
/// failure-count cooldown backoff.
#[derive(Default)]
pub struct AutoMaterializeClaims {
    claims: DashMap<ClaimKey, RwLock<AutoMaterializeClaim>>,
}

impl AutoMaterializeClaims {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim `key` for `owner`, failing with `conflict` if an unresolved
    /// claim already exists and `now` is before its cooldown elapses.
    pub async fn claim(
        &self,
        key: ClaimKey,
        reason: String,
        owner: String,
        context: Value,
        now: DateTime<Utc>,
    ) -> FlowResult<()> {
        if let Some(existing) = self.claims.get(&key) {
            let guard = existing.read().await;
            let still_active = guard.workflow_run_id.is_some()
                || guard.next_eligible_at.is_some_and(|at| now < at);
            if still_active {
                return Err(FlowError::conflict(format!(
                    "auto-materialize claim already active for asset {}",
                    key.1
                )));
            }
        }
        self.claims.insert(
            key,
            RwLock::new(AutoMaterializeClaim {
                workflow_run_id: None,
                reason,
                requested_at: now,
                claimed_at: Some(now),
                claim_owner: owner,
                context,
                consecutive_failures: 0,
                next_eligible_at: None,
            }),
        );
        Ok(())
    }

    pub async fn attach_run(&self, key: &ClaimKey, run_id: WorkflowRunId) {
        if let Some(entry) = self.claims.get(key) {
            entry.write().await.workflow_run_id = Some(run_id);
        }
    }

    /// Release the claim on run success: it's free to be claimed again
    /// immediately.
    pub async fn release_on_success(&self, key: &ClaimKey) {
        self.claims.remove(key);
    }

    /// Release the claim on run failure: bump the failure counter and set
    /// `nextEligibleAt = now + cooldown(failures)` via `cooldown_ms`.
    pub async fn release_on_failure(&self, key: &ClaimKey, now: DateTime<Utc>, cooldown_base_ms: u64) {
        if let Some(entry) = self.claims.get(key) {
            let mut guard = entry.write().await;
            guard.workflow_run_id = None;
            guard.consecutive_failures += 1;
            let backoff_ms = cooldown_base_ms.saturating_mul(1u64 << guard.consecutive_failures.min(10));
            guard.next_eligible_at = Some(now + chrono::Duration::milliseconds(backoff_ms as i64));
        }
    }

    pub async fn get(&self, key: &ClaimKey) -> Option<AutoMaterializeClaim> {
        match self.claims.get(key) {
            Some(entry) => Some(entry.read().await.clone()),
            None => None,
        }
    }
}

impl Clone for AutoMaterializeClaim {
    fn clone(&self) -> Self {
        Self {
            workflow_run_id: self.workflow_run_id,
            reason: self.reason.clone(),
            requested_at: self.requested_at,
            claimed_at: self.claimed_at,
            claim_owner: self.claim_owner.clone(),
            context: self.context.clone(),
            consecutive_failures: self.consecutive_failures,
            next_eligible_at: self.next_eligible_at,
        }
    }
}
