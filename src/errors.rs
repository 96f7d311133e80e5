//! # Adapter Errors
//!
//! Error taxonomy shared by every adapter, the populate engine and the
//! service layer. Driver failures are wrapped with the operation name and
//! the identifier involved so callers can tell which call broke.

use std::time::Duration;

use thiserror::Error;

/// Result type for adapter and service operations
pub type DbResult<T> = Result<T, DbError>;

/// Adapter and service errors
#[derive(Debug, Clone, Error)]
pub enum DbError {
    // ==================
    // Backend Errors
    // ==================
    /// Pool exhausted, closed, or the adapter was never connected
    #[error("Connection unavailable: {0}")]
    ConnectionUnavailable(String),

    /// Native driver or query failure
    #[error(
        "Backend error during {operation}{}: {message}",
        .id.as_ref().map(|id| format!(" (id {})", id)).unwrap_or_default()
    )]
    BackendQuery {
        /// Adapter operation that failed
        operation: &'static str,
        /// Identifier the operation targeted, if any
        id: Option<String>,
        /// Driver message
        message: String,
    },

    // ==================
    // Request Errors
    // ==================
    /// Malformed identifier for lookup, update or remove
    #[error("Invalid id: {0}")]
    InvalidIdentifier(String),

    /// Missing or malformed request parameters
    #[error("Validation error: {0}")]
    Validation(String),

    /// Record addressed by id does not exist
    #[error("Record not found: {0}")]
    NotFound(String),

    // ==================
    // Populate
    // ==================
    /// A call key was absent from the batch response
    #[error("No populate result for call {0}")]
    PopulateResolutionGap(String),
}

impl DbError {
    /// Create a connection unavailable error
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::ConnectionUnavailable(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create an invalid identifier error
    pub fn invalid_id(id: impl Into<String>) -> Self {
        Self::InvalidIdentifier(id.into())
    }

    /// Create a not found error
    pub fn not_found(id: impl Into<String>) -> Self {
        Self::NotFound(id.into())
    }

    /// Wrap a driver failure with the operation that raised it
    pub fn backend(operation: &'static str, err: impl std::fmt::Display) -> Self {
        Self::BackendQuery {
            operation,
            id: None,
            message: err.to_string(),
        }
    }

    /// Wrap a driver failure with the operation and the id it targeted
    pub fn backend_for_id(
        operation: &'static str,
        id: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::BackendQuery {
            operation,
            id: Some(id.into()),
            message: err.to_string(),
        }
    }

    /// Error raised when a per-call timeout elapses
    pub fn timed_out(operation: &'static str, after: Duration) -> Self {
        Self::backend(
            operation,
            format!("timed out after {}ms", after.as_millis()),
        )
    }

    /// Map a sqlx error, routing pool exhaustion to `ConnectionUnavailable`
    pub fn from_sqlx(operation: &'static str, id: Option<&str>, err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::PoolTimedOut => {
                Self::unavailable(format!("{}: timed out waiting for a pooled connection", operation))
            }
            sqlx::Error::PoolClosed => {
                Self::unavailable(format!("{}: connection pool is closed", operation))
            }
            other => match id {
                Some(id) => Self::backend_for_id(operation, id, other),
                None => Self::backend(operation, other),
            },
        }
    }

    /// Stable error code
    pub fn code(&self) -> &'static str {
        match self {
            Self::ConnectionUnavailable(_) => "CONNECTION_UNAVAILABLE",
            Self::BackendQuery { .. } => "BACKEND_QUERY_ERROR",
            Self::InvalidIdentifier(_) => "INVALID_IDENTIFIER",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::PopulateResolutionGap(_) => "POPULATE_RESOLUTION_GAP",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_error_carries_context() {
        let err = DbError::backend_for_id("remove_by_id", "42", "disk I/O error");
        assert_eq!(
            err.to_string(),
            "Backend error during remove_by_id (id 42): disk I/O error"
        );
        assert_eq!(err.code(), "BACKEND_QUERY_ERROR");
    }

    #[test]
    fn test_backend_error_without_id() {
        let err = DbError::backend("count", "no such table: users");
        assert_eq!(err.to_string(), "Backend error during count: no such table: users");
    }

    #[test]
    fn test_pool_timeout_is_connection_unavailable() {
        let err = DbError::from_sqlx("find", None, sqlx::Error::PoolTimedOut);
        assert!(matches!(err, DbError::ConnectionUnavailable(_)));
        assert_eq!(err.code(), "CONNECTION_UNAVAILABLE");
    }

    #[test]
    fn test_timeout_message() {
        let err = DbError::timed_out("insert", Duration::from_millis(250));
        assert!(err.to_string().contains("timed out after 250ms"));
    }
}
