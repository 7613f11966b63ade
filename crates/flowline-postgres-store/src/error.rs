//! Error types for the PostgreSQL manifest store.

use thiserror::Error;

/// Errors that can occur while talking to the manifest store's backing
/// PostgreSQL database.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// PostgreSQL connection or query error.
    #[error("PostgreSQL error: {0}")]
    Postgres(#[from] tokio_postgres::Error),

    /// JSON (de)serialization error, e.g. decoding a JSONB column.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A table/column identifier failed validation before being
    /// interpolated into a SQL statement.
    #[error("invalid identifier: {0}")]
    InvalidIdentifier(String),

    /// Row referenced by id does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// A unique constraint was violated, or the write conflicts with
    /// existing state (e.g. a dataset slug already in use).
    #[error("conflict: {0}")]
    Conflict(String),

    /// An optimistic-concurrency `ifMatch` check failed.
    #[error("concurrent update: {0}")]
    ConcurrentUpdate(String),

    /// Generic error not covered by a more specific variant.
    #[error("{0}")]
    Generic(String),
}

/// Result type for manifest store operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Convert a store-local error into the crate-wide [`flowline::error::FlowError`].
impl From<Error> for flowline::error::FlowError {
    fn from(err: Error) -> Self {
        use flowline::error::FlowError;
        match err {
            Error::Postgres(e) => FlowError::internal(format!("postgres error: {e}")),
            Error::Json(e) => FlowError::internal(format!("json error: {e}")),
            Error::InvalidIdentifier(name) => {
                FlowError::validation(format!("invalid identifier: {name}"))
            }
            Error::NotFound(what) => FlowError::not_found(what),
            Error::Conflict(what) => FlowError::conflict(what),
            Error::ConcurrentUpdate(what) => FlowError::concurrent_update(what),
            Error::Generic(msg) => FlowError::internal(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_display() {
        let err = Error::NotFound("dataset abc".to_string());
        assert_eq!(err.to_string(), "not found: dataset abc");
    }

    #[test]
    fn generic_display() {
        let err = Error::Generic("boom".to_string());
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn invalid_identifier_display() {
        let err = Error::InvalidIdentifier("bad;name".to_string());
        assert!(err.to_string().contains("bad;name"));
    }

    #[test]
    fn conversion_not_found_preserves_message() {
        let err = Error::NotFound("manifest xyz".to_string());
        let flow_err: flowline::error::FlowError = err.into();
        assert_eq!(flow_err.kind, flowline::error::ErrorKind::NotFound);
        assert!(flow_err.message.contains("manifest xyz"));
    }

    #[test]
    fn conversion_invalid_identifier_is_validation() {
        let err = Error::InvalidIdentifier("1bad".to_string());
        let flow_err: flowline::error::FlowError = err.into();
        assert_eq!(flow_err.kind, flowline::error::ErrorKind::Validation);
    }

    #[test]
    fn conversion_generic_is_internal() {
        let err = Error::Generic("disk full".to_string());
        let flow_err: flowline::error::FlowError = err.into();
        assert_eq!(flow_err.kind, flowline::error::ErrorKind::Internal);
        assert!(flow_err.message.contains("disk full"));
    }

    #[test]
    fn conversion_conflict_preserves_message() {
        let err = Error::Conflict("dataset 'x' already exists".to_string());
        let flow_err: flowline::error::FlowError = err.into();
        assert_eq!(flow_err.kind, flowline::error::ErrorKind::Conflict);
        assert!(flow_err.message.contains("already exists"));
    }

    #[test]
    fn conversion_concurrent_update_preserves_message() {
        let err = Error::ConcurrentUpdate("stale ifMatch".to_string());
        let flow_err: flowline::error::FlowError = err.into();
        assert_eq!(flow_err.kind, flowline::error::ErrorKind::ConcurrentUpdate);
    }

    #[test]
    fn json_error_converts() {
        let json_err = serde_json::from_str::<serde_json::Value>("{bad}").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        let flow_err: flowline::error::FlowError = err.into();
        assert_eq!(flow_err.kind, flowline::error::ErrorKind::Internal);
    }
}
