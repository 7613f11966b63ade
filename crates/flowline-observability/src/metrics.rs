//! Prometheus metrics registry for Flowline services.
//!
//! Exposes counters/histograms/gauges for the orchestration core: workflow
//! run outcomes, step execution, trigger delivery, manifest store latency,
//! and lifecycle (compaction/retention) chunk execution. Call
//! [`init_default_recorder`] once at process startup, then use the
//! [`MetricsRecorder`] methods on [`MetricsRegistry::global`] from call
//! sites, and serve [`MetricsRegistry::export`] behind an HTTP endpoint (see
//! [`crate::metrics_server`]).

use crate::error::{Error, Result};
use prometheus::{CounterVec, Encoder, HistogramVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

static GLOBAL_REGISTRY: OnceLock<Arc<MetricsRegistry>> = OnceLock::new();

/// Default histogram buckets for operation-duration metrics, in seconds.
/// Covers sub-millisecond manifest-store reads through multi-minute
/// lifecycle compaction chunks.
const DURATION_BUCKETS: &[f64] = &[
    0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0, 60.0, 300.0,
];

/// Holds every Prometheus metric Flowline records, plus the registry they
/// are collected through.
pub struct MetricsRegistry {
    registry: Registry,
    run_total: CounterVec,
    run_duration_seconds: HistogramVec,
    step_total: CounterVec,
    trigger_deliveries_total: CounterVec,
    manifest_store_duration_seconds: HistogramVec,
    lifecycle_chunks_total: CounterVec,
    queue_depth: IntGauge,
}

impl MetricsRegistry {
    fn new() -> Result<Self> {
        let registry = Registry::new();

        let run_total = CounterVec::new(
            Opts::new(
                "flowline_workflow_runs_total",
                "Workflow runs by terminal status",
            ),
            &["status"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let run_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "flowline_workflow_run_duration_seconds",
                "Wall-clock duration of a workflow run from dispatch to terminal state",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["workflow_slug"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let step_total = CounterVec::new(
            Opts::new(
                "flowline_workflow_run_steps_total",
                "Run steps by terminal status",
            ),
            &["status"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let trigger_deliveries_total = CounterVec::new(
            Opts::new(
                "flowline_trigger_deliveries_total",
                "Trigger deliveries by outcome (matched, throttled, skipped, launched, failed)",
            ),
            &["status"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let manifest_store_duration_seconds = HistogramVec::new(
            prometheus::HistogramOpts::new(
                "flowline_manifest_store_operation_duration_seconds",
                "ManifestStore operation latency",
            )
            .buckets(DURATION_BUCKETS.to_vec()),
            &["operation"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let lifecycle_chunks_total = CounterVec::new(
            Opts::new(
                "flowline_lifecycle_chunks_total",
                "Compaction/retention chunks processed, by outcome",
            ),
            &["kind", "outcome"],
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        let queue_depth = IntGauge::new(
            "flowline_queue_depth",
            "Number of pending items in the in-process executor queue",
        )
        .map_err(|e| Error::Metrics(e.to_string()))?;

        registry
            .register(Box::new(run_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(run_duration_seconds.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(step_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(trigger_deliveries_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(manifest_store_duration_seconds.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(lifecycle_chunks_total.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;
        registry
            .register(Box::new(queue_depth.clone()))
            .map_err(|e| Error::Metrics(e.to_string()))?;

        Ok(Self {
            registry,
            run_total,
            run_duration_seconds,
            step_total,
            trigger_deliveries_total,
            manifest_store_duration_seconds,
            lifecycle_chunks_total,
            queue_depth,
        })
    }

    /// The process-wide metrics registry, initialized on first access.
    #[must_use]
    pub fn global() -> Arc<Self> {
        GLOBAL_REGISTRY
            .get_or_init(|| Arc::new(Self::new().expect("metric registration is infallible for static names")))
            .clone()
    }

    /// Render all registered metrics in Prometheus text exposition format.
    pub fn export(&self) -> Result<String> {
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&metric_families, &mut buffer)
            .map_err(|e| Error::Metrics(e.to_string()))?;
        String::from_utf8(buffer).map_err(|e| Error::Metrics(e.to_string()))
    }
}

/// Recording methods for the metrics this crate tracks. Implemented for
/// [`MetricsRegistry`]; call sites take `Arc<MetricsRegistry>` so the same
/// recorder can be shared across executor tasks.
pub trait MetricsRecorder {
    /// Record a workflow run reaching a terminal status.
    fn record_run_completed(&self, workflow_slug: &str, status: &str, duration: Duration);
    /// Record a run step reaching a terminal status.
    fn record_step_completed(&self, status: &str);
    /// Record a trigger delivery reaching an outcome.
    fn record_trigger_delivery(&self, status: &str);
    /// Record the latency of a `ManifestStore` operation.
    fn record_manifest_store_operation(&self, operation: &str, duration: Duration);
    /// Record a lifecycle (compaction/retention) chunk outcome.
    fn record_lifecycle_chunk(&self, kind: &str, outcome: &str);
    /// Set the current depth of the in-process executor queue.
    fn set_queue_depth(&self, depth: i64);
}

impl MetricsRecorder for MetricsRegistry {
    fn record_run_completed(&self, workflow_slug: &str, status: &str, duration: Duration) {
        self.run_total.with_label_values(&[status]).inc();
        self.run_duration_seconds
            .with_label_values(&[workflow_slug])
            .observe(duration.as_secs_f64());
    }

    fn record_step_completed(&self, status: &str) {
        self.step_total.with_label_values(&[status]).inc();
    }

    fn record_trigger_delivery(&self, status: &str) {
        self.trigger_deliveries_total.with_label_values(&[status]).inc();
    }

    fn record_manifest_store_operation(&self, operation: &str, duration: Duration) {
        self.manifest_store_duration_seconds
            .with_label_values(&[operation])
            .observe(duration.as_secs_f64());
    }

    fn record_lifecycle_chunk(&self, kind: &str, outcome: &str) {
        self.lifecycle_chunks_total
            .with_label_values(&[kind, outcome])
            .inc();
    }

    fn set_queue_depth(&self, depth: i64) {
        self.queue_depth.set(depth);
    }
}

/// Force initialization of the global registry. Intended to run once at
/// process startup, before any recorder call sites fire.
pub fn init_default_recorder() -> Result<()> {
    let _ = MetricsRegistry::global();
    Ok(())
}

/// Convenience accessor, equivalent to [`MetricsRegistry::global`].
#[must_use]
pub fn metrics_registry() -> Arc<MetricsRegistry> {
    MetricsRegistry::global()
}

/// Render the global registry's metrics in Prometheus text format.
pub fn export_metrics() -> Result<String> {
    MetricsRegistry::global().export()
}

/// Kind of SLO threshold a [`SloDefinition`] checks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SloType {
    /// A latency percentile (e.g. p99 run duration) must stay under a bound.
    LatencyPercentile,
    /// A ratio of failures to total attempts must stay under a bound.
    ErrorRate,
}

/// A named service-level objective, checked against the metrics above by an
/// external alerting pipeline (not run by this crate).
#[derive(Debug, Clone)]
pub struct SloDefinition {
    pub name: String,
    pub slo_type: SloType,
    pub metric: String,
    pub threshold: f64,
}

/// The SLOs a Flowline deployment is expected to hold itself to: run
/// latency and trigger/step failure rates.
#[must_use]
pub fn default_slo_definitions() -> Vec<SloDefinition> {
    vec![
        SloDefinition {
            name: "workflow_run_p99_latency".to_string(),
            slo_type: SloType::LatencyPercentile,
            metric: "flowline_workflow_run_duration_seconds".to_string(),
            threshold: 300.0,
        },
        SloDefinition {
            name: "workflow_run_failure_rate".to_string(),
            slo_type: SloType::ErrorRate,
            metric: "flowline_workflow_runs_total".to_string(),
            threshold: 0.05,
        },
        SloDefinition {
            name: "trigger_delivery_failure_rate".to_string(),
            slo_type: SloType::ErrorRate,
            metric: "flowline_trigger_deliveries_total".to_string(),
            threshold: 0.02,
        },
    ]
}

/// Register the default metric set. A no-op beyond touching the global
/// registry, since metric families are registered eagerly in `new()`; kept
/// as an explicit call site for callers used to an opt-in registration step.
pub fn register_default_metrics() -> Result<()> {
    init_default_recorder()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn export_includes_registered_families() {
        let registry = MetricsRegistry::new().unwrap();
        registry.record_run_completed("clicks-hourly", "succeeded", Duration::from_secs(2));
        let text = registry.export().unwrap();
        assert!(text.contains("flowline_workflow_runs_total"));
        assert!(text.contains("flowline_workflow_run_duration_seconds"));
    }

    #[test]
    fn queue_depth_gauge_reflects_last_set_value() {
        let registry = MetricsRegistry::new().unwrap();
        registry.set_queue_depth(7);
        let text = registry.export().unwrap();
        assert!(text.contains("flowline_queue_depth 7"));
    }

    #[test]
    fn trigger_delivery_counter_increments_per_status() {
        let registry = MetricsRegistry::new().unwrap();
        registry.record_trigger_delivery("throttled");
        registry.record_trigger_delivery("throttled");
        registry.record_trigger_delivery("launched");
        let text = registry.export().unwrap();
        assert!(text.contains(r#"status="throttled""#));
        assert!(text.contains(r#"status="launched""#));
    }

    #[test]
    fn default_slo_definitions_cover_runs_and_triggers() {
        let slos = default_slo_definitions();
        assert!(slos.iter().any(|s| s.name == "workflow_run_p99_latency"));
        assert!(slos.iter().any(|s| s.slo_type == SloType::ErrorRate));
    }

    #[test]
    fn global_registry_is_a_singleton() {
        let a = MetricsRegistry::global();
        let b = MetricsRegistry::global();
        assert!(Arc::ptr_eq(&a, &b));
    }
}
