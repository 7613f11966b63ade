//! Workflow definition and step entities (§3), including the DAG metadata
//! computed by the validator (C5).

use crate::ids::WorkflowDefinitionId;
use crate::model::asset::AssetDeclaration;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    None,
    Fixed,
    Exponential,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Jitter {
    None,
    Full,
    Equal,
}

/// `{maxAttempts∈[1,10], strategy, initialDelayMs, maxDelayMs, jitter}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    pub initial_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: Jitter,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 1,
            strategy: RetryStrategy::None,
            initial_delay_ms: 0,
            max_delay_ms: 0,
            jitter: Jitter::None,
        }
    }
}

impl RetryPolicy {
    pub fn validate(&self) -> Result<(), String> {
        if !(1..=10).contains(&self.max_attempts) {
            return Err(format!(
                "retryPolicy.maxAttempts must be in [1,10], got {}",
                self.max_attempts
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BundleStrategy {
    Latest,
    Pinned,
}

/// A job step binds to a bundle with `{strategy, slug, version|null,
/// exportName?}`. When `strategy` is omitted, normalization infers it by
/// parsing `entryPoint` (see [`crate::workflow::dag::normalize_bundle`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BundleRef {
    pub strategy: Option<BundleStrategy>,
    pub slug: String,
    pub version: Option<String>,
    pub export_name: Option<String>,
    /// Raw `module:export@version`-style entry point, when supplied
    /// instead of a fully-specified bundle ref.
    pub entry_point: Option<String>,
}

/// Fan-out step config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanOutSpec {
    /// Template expression evaluated to a JSON array (max `max_items`).
    pub collection: String,
    pub max_items: u32,
    pub max_concurrency: u32,
    /// Key under which aggregated child results are stored.
    pub store_results_as: String,
    /// Id assigned to the per-element template step. Materialized children
    /// are named `{template_id}-{index}`; this id must not collide with
    /// any other step id in the workflow (§4.5).
    pub template_id: String,
    /// The per-element step template. Boxed because it is itself a full
    /// step (job or service), recursively.
    pub template: Box<StepKind>,
}

/// Service-step target: an ordered list of base-URL candidates is tried in
/// order by the executor's service client (container, instance,
/// advertised, host+port, fallback).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceTarget {
    pub service_name: String,
    pub path: String,
    #[serde(default)]
    pub candidate_base_urls: Vec<String>,
}

/// The polymorphic step body, discriminated on `type`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StepKind {
    Job {
        bundle: BundleRef,
    },
    Service {
        target: ServiceTarget,
    },
    Fanout {
        fanout: FanOutSpec,
    },
}

/// A single DAG node. `id` is unique per workflow; `dependsOn` references
/// other step ids.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStep {
    pub id: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub retry_policy: RetryPolicy,
    pub kind: StepKind,
    /// Key under which this step's output is stored in run context, when
    /// set. Reused keys across steps are a DAG validation error.
    pub store_result_as: Option<String>,
    #[serde(default)]
    pub produces: Vec<AssetDeclaration>,
}

impl WorkflowStep {
    pub fn validate_shape(&self) -> Result<(), String> {
        if self.depends_on.len() > 25 {
            return Err(format!(
                "step '{}' has {} dependsOn entries, max is 25",
                self.id,
                self.depends_on.len()
            ));
        }
        self.retry_policy
            .validate()
            .map_err(|e| format!("step '{}': {e}", self.id))?;
        if let StepKind::Fanout { fanout } = &self.kind {
            if !(1..=10_000).contains(&fanout.max_items) {
                return Err(format!(
                    "step '{}' fanout.maxItems must be in [1,10000]",
                    self.id
                ));
            }
            if !(1..=1_000).contains(&fanout.max_concurrency) {
                return Err(format!(
                    "step '{}' fanout.maxConcurrency must be in [1,1000]",
                    self.id
                ));
            }
        }
        Ok(())
    }
}

/// Precomputed DAG metadata written back onto the definition by the
/// validator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DagMetadata {
    pub topological_order: Vec<String>,
    pub adjacency: HashMap<String, Vec<String>>,
    pub roots: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    pub id: WorkflowDefinitionId,
    pub slug: String,
    pub name: String,
    pub version: i64,
    pub description: Option<String>,
    pub steps: Vec<WorkflowStep>,
    #[serde(default)]
    pub parameters_schema: Value,
    #[serde(default)]
    pub default_parameters: Value,
    #[serde(default)]
    pub output_schema: Value,
    #[serde(default)]
    pub metadata: Value,
    #[serde(default)]
    pub dag: DagMetadata,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowDefinition {
    /// All asset declarations across every step, in step order.
    pub fn asset_declarations(&self) -> Vec<(&str, &AssetDeclaration)> {
        self.steps
            .iter()
            .flat_map(|s| s.produces.iter().map(move |a| (s.id.as_str(), a)))
            .collect()
    }

    pub fn has_partitioned_assets(&self) -> bool {
        self.asset_declarations()
            .iter()
            .any(|(_, a)| a.partitioning.is_some())
    }
}
