//! Transaction error types.

use thiserror::Error;

use crate::backend::BackendError;
use crate::transaction::scope::ScopeId;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur while coordinating transaction scopes.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Backend failure. Always fatal to the physical transaction it hit.
    #[error("backend error: {0}")]
    Backend(#[from] BackendError),

    /// The committing scope's transaction was rolled back because a
    /// participant marked it rollback-only. The rollback already happened.
    #[error("transaction {tx_id} rolled back because it has been marked as rollback-only")]
    UnexpectedRollback {
        tx_id: String,
    },

    /// Scope used out of stack order, twice, or on the wrong coordinator.
    #[error("illegal scope state for {scope}: {reason}")]
    IllegalScopeState {
        scope: ScopeId,
        reason: String,
    },
}

impl TransactionError {
    /// Check if this is the informational rollback-only signal.
    pub fn is_unexpected_rollback(&self) -> bool {
        matches!(self, TransactionError::UnexpectedRollback { .. })
    }

    /// Check if this error comes from misuse of the scope API.
    pub fn is_misuse(&self) -> bool {
        matches!(self, TransactionError::IllegalScopeState { .. })
    }

    /// Check if running the unit of work again might succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            TransactionError::Backend(e) => e.is_transient(),
            _ => false,
        }
    }

    pub(crate) fn illegal(scope: ScopeId, reason: impl Into<String>) -> Self {
        Self::IllegalScopeState {
            scope,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let unexpected = TransactionError::UnexpectedRollback {
            tx_id: "tx001".to_string(),
        };
        assert!(unexpected.is_unexpected_rollback());
        assert!(!unexpected.is_misuse());
        assert!(!unexpected.is_retryable());

        let illegal = TransactionError::illegal(ScopeId::generate(), "not on top");
        assert!(illegal.is_misuse());

        let backend = TransactionError::from(BackendError::Unavailable("down".into()));
        assert!(backend.is_retryable());
    }
}
