//! Error types for Flowline observability.

use thiserror::Error;

/// Error type for observability operations
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum Error {
    /// OpenTelemetry SDK initialization failed
    #[error("Failed to initialize OpenTelemetry: {0}")]
    InitializationError(String),

    /// Tracing configuration error
    #[error("Invalid tracing configuration: {0}")]
    ConfigurationError(String),

    /// Exporter connection error
    #[error("Failed to connect to exporter endpoint: {0}")]
    ExporterConnectionError(String),

    /// Span creation error
    #[error("Failed to create span: {0}")]
    SpanCreationError(String),

    /// Metrics error
    #[error("Metrics operation failed: {0}")]
    Metrics(String),

    /// Generic error
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Result type for observability operations
pub type Result<T> = std::result::Result<T, Error>;
