//! Backend error types.

use thiserror::Error;

use crate::backend::types::ConnectionId;

/// Result type for backend operations.
pub type BackendResult<T> = Result<T, BackendError>;

/// Errors reported by a persistence backend.
///
/// From the coordinator's point of view every one of these is fatal to the
/// physical transaction it happened on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// The backend could not be reached or refused a new transaction.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// The connection is unknown to the backend.
    #[error("unknown connection: {0}")]
    UnknownConnection(ConnectionId),

    /// The connection already finished its transaction.
    #[error("connection {id} is no longer active (status: {status})")]
    ConnectionClosed { id: ConnectionId, status: String },

    /// A write was rejected, e.g. a constraint violation.
    #[error("constraint violation: {0}")]
    Constraint(String),

    /// Commit failed on the backend side.
    #[error("commit failed: {0}")]
    CommitFailed(String),

    /// Rollback failed on the backend side.
    #[error("rollback failed: {0}")]
    RollbackFailed(String),
}

impl BackendError {
    /// Check if retrying the whole unit of work might succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            BackendError::Unavailable(_) | BackendError::CommitFailed(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_transient() {
        assert!(BackendError::Unavailable("down".into()).is_transient());
        assert!(!BackendError::Constraint("dup".into()).is_transient());
    }

    #[test]
    fn test_error_display() {
        let err = BackendError::CommitFailed("disk full".into());
        assert_eq!(err.to_string(), "commit failed: disk full");
    }
}
