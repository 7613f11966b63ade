//! Canonical error type shared by every public operation.
//!
//! Every fallible operation in this crate returns [`FlowResult<T>`]. The
//! error kinds mirror the taxonomy in the specification's error-handling
//! section so that a caller (the CLI, or an external HTTP shim) can map a
//! [`FlowError`] onto a status code and response body without re-deriving
//! the mapping.

use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

/// The kind of failure, independent of the human-readable message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    ConcurrentUpdate,
    PartitionKeyInvalid,
    DagInvalid,
    TemplateInvalid,
    StaleAssets,
    Throttled,
    QueueUnavailable,
    StorageIo,
    DependencyUnhealthy,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Whether the error kind is recoverable by the caller re-reading state
    /// and retrying (as opposed to representing a programming error).
    pub fn is_recoverable(self) -> bool {
        matches!(
            self,
            ErrorKind::ConcurrentUpdate
                | ErrorKind::Throttled
                | ErrorKind::QueueUnavailable
                | ErrorKind::DependencyUnhealthy
                | ErrorKind::Timeout
        )
    }
}

/// The canonical `{kind, message, detail}` error payload.
#[derive(Debug, Clone, Error, Serialize)]
#[error("{message}")]
pub struct FlowError {
    pub kind: ErrorKind,
    pub message: String,
    #[serde(skip_serializing_if = "Value::is_null")]
    pub detail: Value,
}

impl FlowError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            detail: Value::Null,
        }
    }

    pub fn with_detail(mut self, detail: Value) -> Self {
        self.detail = detail;
        self
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Conflict, message)
    }

    pub fn concurrent_update(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::ConcurrentUpdate, message)
    }

    pub fn partition_key_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::PartitionKeyInvalid, message)
    }

    pub fn dag_invalid(reason: impl Into<String>, detail: Value) -> Self {
        Self::new(ErrorKind::DagInvalid, reason).with_detail(detail)
    }

    pub fn template_invalid(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::TemplateInvalid, message)
    }

    pub fn stale_assets(detail: Value) -> Self {
        Self::new(ErrorKind::StaleAssets, "stale assets detected").with_detail(detail)
    }

    pub fn throttled(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Throttled, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// The structured body shape used for surfaced validation failures:
    /// `{error:{formErrors,fieldErrors}}`.
    pub fn form_errors(form_errors: Vec<String>, field_errors: Value) -> Self {
        Self::new(ErrorKind::Validation, "validation failed").with_detail(serde_json::json!({
            "formErrors": form_errors,
            "fieldErrors": field_errors,
        }))
    }
}

/// The result alias used by every public operation in this crate.
pub type FlowResult<T> = Result<T, FlowError>;
