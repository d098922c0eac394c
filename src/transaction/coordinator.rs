//! Transaction coordinator - maps nested logical scopes onto physical transactions.
//!
//! One coordinator serves one call chain. It handles:
//! - Deciding per `begin` whether to join the current transaction or start one
//! - Suspending and resuming transactions around REQUIRES_NEW scopes
//! - Rollback-only propagation from participants to the owning scope
//! - Issuing the real commit/rollback against the backend

use std::collections::VecDeque;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::backend::Backend;
use crate::transaction::config::CoordinatorConfig;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::physical::{PhysicalTransaction, TransactionRecord};
use crate::transaction::propagation::Propagation;
use crate::transaction::scope::{LogicalScope, ScopeEntry, ScopeId, ScopeStack};

/// Counters for one coordinator.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorStats {
    /// Physical transactions started.
    pub started: u64,
    /// Physical transactions committed.
    pub committed: u64,
    /// Physical transactions rolled back, for any reason.
    pub rolled_back: u64,
    /// Commits that turned into a rollback because of the rollback-only bit.
    pub unexpected_rollbacks: u64,
    /// Scopes that joined an existing transaction.
    pub participations: u64,
    /// Transactions suspended by a REQUIRES_NEW scope.
    pub suspensions: u64,
}

/// Coordinates the transactional scopes of one call chain.
///
/// Not shared between threads: each chain (e.g. one request) creates its own
/// coordinator over a shared backend.
pub struct TransactionCoordinator<B: Backend> {
    backend: B,
    config: CoordinatorConfig,
    stack: ScopeStack<B::Connection>,
    /// The one physical transaction work currently runs in.
    current: Option<PhysicalTransaction<B::Connection>>,
    history: VecDeque<TransactionRecord>,
    stats: CoordinatorStats,
}

impl<B: Backend> TransactionCoordinator<B> {
    /// Create a coordinator with the default configuration.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, CoordinatorConfig::default())
    }

    /// Create a coordinator with a custom configuration.
    pub fn with_config(backend: B, config: CoordinatorConfig) -> Self {
        Self {
            backend,
            config,
            stack: ScopeStack::new(),
            current: None,
            history: VecDeque::new(),
            stats: CoordinatorStats::default(),
        }
    }

    /// Get a reference to the underlying backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Get the configuration.
    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    // ==================== Scope Operations ====================

    /// Begin a logical scope.
    ///
    /// `Required` joins the current physical transaction or starts one when
    /// there is none. `RequiresNew` suspends the current transaction (if any)
    /// and always starts a fresh one.
    pub fn begin(&mut self, propagation: Propagation) -> TransactionResult<LogicalScope> {
        let id = ScopeId::generate();

        if self.stack.len() >= self.config.max_depth {
            return Err(TransactionError::illegal(
                id,
                format!("maximum scope depth {} exceeded", self.config.max_depth),
            ));
        }

        let joined = match &self.current {
            Some(tx) if !propagation.always_new() => Some(tx.id().to_string()),
            _ => None,
        };

        let (is_new, tx_id, suspended) = match joined {
            Some(tx_id) => {
                self.stats.participations += 1;
                debug!(scope = %id, tx_id = %tx_id, "participating in existing transaction");
                (false, tx_id, None)
            }
            None => {
                let suspended = self.current.take();
                if let Some(ref parked) = suspended {
                    self.stats.suspensions += 1;
                    debug!(scope = %id, tx_id = %parked.id(), "suspending current transaction");
                }

                let tx = match PhysicalTransaction::begin(&self.backend) {
                    Ok(tx) => tx,
                    Err(e) => {
                        // Put the parked transaction back, it must not be lost.
                        self.current = suspended;
                        warn!(scope = %id, error = %e, "failed to start physical transaction");
                        return Err(e.into());
                    }
                };

                self.stats.started += 1;
                let tx_id = tx.id().to_string();
                info!(scope = %id, tx_id = %tx_id, %propagation, "started physical transaction");
                self.current = Some(tx);
                (true, tx_id, suspended)
            }
        };

        self.stack.push(ScopeEntry {
            id,
            propagation,
            is_new,
            rollback_only: false,
            suspended,
        });

        let depth = self.stack.len();
        debug!(scope = %id, %propagation, is_new, depth, "scope begun");
        Ok(LogicalScope::new(id, propagation, is_new, depth, tx_id))
    }

    /// Commit a scope.
    ///
    /// For a participating scope this does nothing physically. For the scope
    /// that owns the transaction it commits, unless the transaction was
    /// marked rollback-only: then it rolls back and returns
    /// [`TransactionError::UnexpectedRollback`].
    pub fn commit(&mut self, scope: &LogicalScope) -> TransactionResult<()> {
        let entry = self.pop_innermost(scope)?;
        self.finish_commit(entry)
    }

    /// Roll back a scope.
    ///
    /// A participating scope only marks the shared transaction rollback-only;
    /// the owning scope rolls back for real.
    pub fn rollback(&mut self, scope: &LogicalScope) -> TransactionResult<()> {
        let entry = self.pop_innermost(scope)?;
        self.finish_rollback(entry)
    }

    /// Ask for the scope to be rolled back instead of committed, without
    /// raising an error.
    pub fn set_rollback_only(&mut self, scope: &LogicalScope) -> TransactionResult<()> {
        let entry = self
            .stack
            .get_mut(scope.id())
            .ok_or_else(|| TransactionError::illegal(scope.id(), "scope is not active"))?;
        entry.rollback_only = true;
        debug!(scope = %scope.id(), "scope marked rollback-only");
        Ok(())
    }

    /// Whether the scope will roll back, either because it asked to or
    /// because its transaction is marked rollback-only.
    pub fn is_rollback_only(&self, scope: &LogicalScope) -> bool {
        let local = self
            .stack
            .get(scope.id())
            .is_some_and(|entry| entry.rollback_only);
        local || self.transaction_rollback_only(scope.transaction_id())
    }

    /// Run `f` inside a scope, committing on `Ok` and rolling back on `Err`
    /// or panic.
    ///
    /// Scopes that `f` began but never finished are rolled back first. If the
    /// rollback after an error fails, the rollback error is returned and the
    /// original error is logged.
    pub fn with_transaction<F, T, E>(&mut self, propagation: Propagation, f: F) -> Result<T, E>
    where
        F: FnOnce(&mut Self) -> Result<T, E>,
        E: From<TransactionError> + fmt::Display,
    {
        let scope = self.begin(propagation)?;

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| f(self)));
        self.unwind_above(&scope);

        match outcome {
            Ok(Ok(value)) => {
                self.commit(&scope)?;
                Ok(value)
            }
            Ok(Err(err)) => {
                if let Err(rollback_err) = self.rollback(&scope) {
                    error!(
                        scope = %scope.id(),
                        error = %err,
                        "application error overridden by rollback error"
                    );
                    return Err(rollback_err.into());
                }
                Err(err)
            }
            Err(payload) => {
                if let Err(rollback_err) = self.rollback(&scope) {
                    warn!(scope = %scope.id(), error = %rollback_err, "rollback after panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    // ==================== Inspection ====================

    /// Whether an actual physical transaction is current.
    pub fn is_transaction_active(&self) -> bool {
        self.current.is_some()
    }

    /// Number of open scopes.
    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    /// The physical transaction work currently runs in.
    pub fn current_transaction(&self) -> Option<&PhysicalTransaction<B::Connection>> {
        self.current.as_ref()
    }

    /// Backend connection of the current transaction.
    pub fn connection(&self) -> Option<&B::Connection> {
        self.current.as_ref().map(PhysicalTransaction::connection)
    }

    /// Number of transactions parked by REQUIRES_NEW scopes.
    pub fn suspended_count(&self) -> usize {
        self.stack.suspended().count()
    }

    /// Whether the scope is still open on this coordinator.
    pub fn is_scope_active(&self, scope: &LogicalScope) -> bool {
        self.stack.contains(scope.id())
    }

    /// Recently finished transactions, oldest first.
    pub fn history(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.history.iter()
    }

    /// Most recently finished transaction.
    pub fn last_completed(&self) -> Option<&TransactionRecord> {
        self.history.back()
    }

    /// Find a finished transaction by ID.
    pub fn completed(&self, tx_id: &str) -> Option<&TransactionRecord> {
        self.history.iter().find(|r| r.tx_id == tx_id)
    }

    /// Snapshot of the counters.
    pub fn stats(&self) -> CoordinatorStats {
        self.stats
    }

    // ==================== Internals ====================

    /// Pop `scope` if it is the innermost open scope.
    fn pop_innermost(&mut self, scope: &LogicalScope) -> TransactionResult<ScopeEntry<B::Connection>> {
        match self.stack.top() {
            Some(top) if top.id == scope.id() => {}
            _ if self.stack.contains(scope.id()) => {
                return Err(TransactionError::illegal(
                    scope.id(),
                    "scope is not the innermost open scope",
                ));
            }
            _ => {
                return Err(TransactionError::illegal(
                    scope.id(),
                    "scope is already completed or belongs to another chain",
                ));
            }
        }

        self.stack
            .pop()
            .ok_or_else(|| TransactionError::illegal(scope.id(), "scope stack is empty"))
    }

    fn finish_commit(&mut self, entry: ScopeEntry<B::Connection>) -> TransactionResult<()> {
        if !entry.is_new {
            if entry.rollback_only {
                debug!(scope = %entry.id, "participating scope requested rollback on commit");
                self.mark_participant_rollback(entry.id);
            } else {
                debug!(scope = %entry.id, "participating scope commit, nothing to do");
            }
            return Ok(());
        }

        let tx = self.take_owned(entry.id)?;
        let result = if entry.rollback_only {
            debug!(scope = %entry.id, tx_id = %tx.id(), "scope requested rollback, rolling back on commit");
            self.rollback_physical(tx)
        } else if tx.is_rollback_only() {
            let tx_id = tx.id().to_string();
            warn!(scope = %entry.id, tx_id = %tx_id, "transaction marked rollback-only, rolling back on commit");
            self.stats.unexpected_rollbacks += 1;
            self.rollback_physical(tx)
                .and(Err(TransactionError::UnexpectedRollback { tx_id }))
        } else {
            self.commit_physical(tx)
        };

        self.resume(entry.suspended);
        result
    }

    fn finish_rollback(&mut self, entry: ScopeEntry<B::Connection>) -> TransactionResult<()> {
        if !entry.is_new {
            self.mark_participant_rollback(entry.id);
            return Ok(());
        }

        let tx = self.take_owned(entry.id)?;
        let result = self.rollback_physical(tx);
        self.resume(entry.suspended);
        result
    }

    /// Take the current transaction out for the scope that owns it.
    fn take_owned(&mut self, scope: ScopeId) -> TransactionResult<PhysicalTransaction<B::Connection>> {
        self.current
            .take()
            .ok_or_else(|| TransactionError::illegal(scope, "owning scope has no current transaction"))
    }

    fn mark_participant_rollback(&mut self, scope: ScopeId) {
        if !self.config.global_rollback_on_participation_failure {
            debug!(scope = %scope, "participating scope rolled back, leaving outcome to the owner");
            return;
        }
        if let Some(tx) = self.current.as_mut() {
            warn!(
                scope = %scope,
                tx_id = %tx.id(),
                "participating transaction failed - marking existing transaction as rollback-only"
            );
            tx.set_rollback_only();
        }
    }

    fn commit_physical(&mut self, tx: PhysicalTransaction<B::Connection>) -> TransactionResult<()> {
        match tx.commit(&self.backend) {
            Ok(record) => {
                info!(tx_id = %record.tx_id, elapsed_ms = record.elapsed_ms(), "committed physical transaction");
                self.stats.committed += 1;
                self.record(record);
                Ok(())
            }
            Err((tx, commit_err)) => {
                warn!(tx_id = %tx.id(), error = %commit_err, "commit failed, rolling back");
                if let Err(rollback_err) = self.rollback_physical(tx) {
                    warn!(error = %rollback_err, "rollback after commit failure also failed");
                }
                Err(commit_err.into())
            }
        }
    }

    fn rollback_physical(&mut self, tx: PhysicalTransaction<B::Connection>) -> TransactionResult<()> {
        let (record, result) = tx.rollback(&self.backend);
        info!(tx_id = %record.tx_id, elapsed_ms = record.elapsed_ms(), "rolled back physical transaction");
        self.stats.rolled_back += 1;
        self.record(record);
        result.map_err(TransactionError::from)
    }

    fn resume(&mut self, suspended: Option<PhysicalTransaction<B::Connection>>) {
        if let Some(tx) = suspended {
            debug!(tx_id = %tx.id(), "resuming suspended transaction");
            self.current = Some(tx);
        }
    }

    fn record(&mut self, record: TransactionRecord) {
        if self.config.history_limit == 0 {
            return;
        }
        while self.history.len() >= self.config.history_limit {
            self.history.pop_front();
        }
        self.history.push_back(record);
    }

    fn transaction_rollback_only(&self, tx_id: &str) -> bool {
        self.current
            .iter()
            .chain(self.stack.suspended())
            .find(|tx| tx.id() == tx_id)
            .is_some_and(PhysicalTransaction::is_rollback_only)
    }

    /// Roll back scopes left open above `scope`.
    fn unwind_above(&mut self, scope: &LogicalScope) {
        if !self.is_scope_active(scope) {
            return;
        }
        while let Some(top) = self.stack.top() {
            if top.id == scope.id() {
                break;
            }
            let abandoned = top.id;
            warn!(
                scope = %abandoned,
                propagation = %top.propagation,
                owner = %scope.id(),
                "rolling back abandoned inner scope"
            );
            if let Some(entry) = self.stack.pop() {
                if let Err(e) = self.finish_rollback(entry) {
                    warn!(scope = %abandoned, error = %e, "rollback of abandoned scope failed");
                }
            }
        }
    }
}

impl<B: Backend> fmt::Debug for TransactionCoordinator<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransactionCoordinator")
            .field("depth", &self.depth())
            .field("current", &self.current.as_ref().map(PhysicalTransaction::id))
            .field("stats", &self.stats)
            .finish()
    }
}
