//! Flowline Observability
//!
//! Distributed tracing and metrics bootstrap for Flowline services.
//!
//! This crate wires up OpenTelemetry span export and Prometheus metrics for
//! the orchestration core, the manifest store, and the lifecycle engine. It
//! provides automatic instrumentation hooks for:
//! - Workflow run and step execution
//! - Trigger evaluation and throttling
//! - Manifest store operations
//! - Lifecycle (compaction/retention) chunk execution
//!
//! # Example
//!
//! ```rust,no_run
//! use flowline_observability::{TracingConfig, init_tracing};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Configure tracing
//!     let config = TracingConfig::new()
//!         .with_service_name("flowline-executor")
//!         .with_otlp_endpoint("http://localhost:4317")
//!         .with_sampling_rate(1.0);
//!
//!     // Initialize tracing
//!     init_tracing(config).await?;
//!
//!     // Your application code here
//!     // All tracing::span! and tracing::event! calls will be exported
//!
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod exporter;
pub mod metrics;
pub mod tracer;

#[cfg(feature = "metrics-server")]
pub mod metrics_server;

pub use config::{PropagatorType, SamplingStrategy, TracingConfig};
pub use error::{Error, Result};
pub use exporter::init_tracing;
pub use metrics::{MetricsRecorder, MetricsRegistry};
pub use tracer::Traceable;
