//! Physical transactions.
//!
//! A `PhysicalTransaction` is always active: committing or rolling it back
//! consumes it and leaves a [`TransactionRecord`] behind, so a finished
//! transaction can never be finished again.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use ulid::Ulid;

use crate::backend::{Backend, BackendError, BackendResult};

/// State of a physical transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxState {
    Active,
    Committed,
    RolledBack,
}

impl fmt::Display for TxState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxState::Active => write!(f, "ACTIVE"),
            TxState::Committed => write!(f, "COMMITTED"),
            TxState::RolledBack => write!(f, "ROLLED_BACK"),
        }
    }
}

/// A backend transaction owned by exactly one scope.
pub struct PhysicalTransaction<C> {
    tx_id: String,
    connection: C,
    rollback_only: bool,
    started_at: DateTime<Utc>,
}

/// What is left of a physical transaction once it finished.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Transaction ID.
    pub tx_id: String,
    /// Terminal state.
    pub state: TxState,
    /// Whether the rollback-only bit was set when it finished.
    pub rollback_only: bool,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
    /// When the transaction finished.
    pub finished_at: DateTime<Utc>,
}

impl TransactionRecord {
    /// Wall time between start and finish, in milliseconds.
    pub fn elapsed_ms(&self) -> i64 {
        (self.finished_at - self.started_at).num_milliseconds()
    }
}

impl<C> PhysicalTransaction<C> {
    /// Start a new physical transaction on the backend.
    pub(crate) fn begin<B>(backend: &B) -> BackendResult<Self>
    where
        B: Backend<Connection = C>,
    {
        let connection = backend.start_transaction()?;
        Ok(Self {
            tx_id: Ulid::new().to_string().to_lowercase(),
            connection,
            rollback_only: false,
            started_at: Utc::now(),
        })
    }

    /// Get the transaction ID.
    pub fn id(&self) -> &str {
        &self.tx_id
    }

    /// A live physical transaction is always active.
    pub fn state(&self) -> TxState {
        TxState::Active
    }

    /// Whether a participant demanded rollback.
    pub fn is_rollback_only(&self) -> bool {
        self.rollback_only
    }

    /// When the transaction started.
    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// The backend connection this transaction runs on.
    pub fn connection(&self) -> &C {
        &self.connection
    }

    pub(crate) fn set_rollback_only(&mut self) {
        self.rollback_only = true;
    }

    /// Commit on the backend.
    ///
    /// On failure the transaction is handed back still active, so the caller
    /// can decide how to roll it back.
    pub(crate) fn commit<B>(self, backend: &B) -> Result<TransactionRecord, (Self, BackendError)>
    where
        B: Backend<Connection = C>,
    {
        match backend.commit(&self.connection) {
            Ok(()) => Ok(self.finish(TxState::Committed)),
            Err(e) => Err((self, e)),
        }
    }

    /// Roll back on the backend.
    ///
    /// The transaction is over either way; a backend failure is reported
    /// alongside the record.
    pub(crate) fn rollback<B>(self, backend: &B) -> (TransactionRecord, BackendResult<()>)
    where
        B: Backend<Connection = C>,
    {
        let result = backend.rollback(&self.connection);
        (self.finish(TxState::RolledBack), result)
    }

    fn finish(self, state: TxState) -> TransactionRecord {
        TransactionRecord {
            tx_id: self.tx_id,
            state,
            rollback_only: self.rollback_only,
            started_at: self.started_at,
            finished_at: Utc::now(),
        }
    }
}

impl<C: fmt::Debug> fmt::Debug for PhysicalTransaction<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PhysicalTransaction")
            .field("tx_id", &self.tx_id)
            .field("connection", &self.connection)
            .field("rollback_only", &self.rollback_only)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{ConnectionStatus, Fault, MemoryBackend};

    #[test]
    fn test_commit_finishes_committed() {
        let backend = MemoryBackend::new();
        let tx = PhysicalTransaction::begin(&backend).unwrap();
        let conn = *tx.connection();
        assert_eq!(tx.state(), TxState::Active);

        let record = tx.commit(&backend).unwrap();
        assert_eq!(record.state, TxState::Committed);
        assert!(record.elapsed_ms() >= 0);
        assert_eq!(backend.status(&conn), Some(ConnectionStatus::Committed));
    }

    #[test]
    fn test_failed_commit_returns_transaction() {
        let backend = MemoryBackend::new();
        let mut tx = PhysicalTransaction::begin(&backend).unwrap();
        tx.set_rollback_only();
        backend.inject(Fault::Commit);

        let (tx, err) = tx.commit(&backend).unwrap_err();
        assert!(matches!(err, BackendError::CommitFailed(_)));

        let (record, result) = tx.rollback(&backend);
        assert!(result.is_ok());
        assert_eq!(record.state, TxState::RolledBack);
        assert!(record.rollback_only);
    }

    #[test]
    fn test_rollback_failure_still_finishes() {
        let backend = MemoryBackend::new();
        let tx = PhysicalTransaction::begin(&backend).unwrap();
        backend.inject(Fault::Rollback);

        let (record, result) = tx.rollback(&backend);
        assert!(result.is_err());
        assert_eq!(record.state, TxState::RolledBack);
    }
}
