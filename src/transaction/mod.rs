//! Transaction propagation for nested scopes.
//!
//! Each call chain gets a [`TransactionCoordinator`]. Every unit of work asks
//! it for a [`LogicalScope`] with a [`Propagation`] policy; the coordinator
//! decides whether that scope starts a physical transaction or joins the
//! current one.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionCoordinator                     │
//! │   (scope stack, current + suspended physical transactions)  │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │LogicalScope │       │ Propagation │       │  Physical   │
//!  │  (handle)   │       │   policy    │       │ Transaction │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use txscope::backend::MemoryBackend;
//! use txscope::transaction::{Propagation, TransactionCoordinator};
//!
//! let mut coord = TransactionCoordinator::new(MemoryBackend::new());
//!
//! let outer = coord.begin(Propagation::Required).unwrap();
//! let inner = coord.begin(Propagation::Required).unwrap();
//! assert!(!inner.is_new());
//!
//! // The participant fails: the shared transaction becomes rollback-only.
//! coord.rollback(&inner).unwrap();
//!
//! // The owner asked to commit, but the transaction was rolled back.
//! let err = coord.commit(&outer).unwrap_err();
//! assert!(err.is_unexpected_rollback());
//! ```

mod config;
mod coordinator;
mod error;
mod physical;
mod propagation;
mod scope;

pub use config::{ConfigError, CoordinatorConfig};
pub use coordinator::{CoordinatorStats, TransactionCoordinator};
pub use error::{TransactionError, TransactionResult};
pub use physical::{PhysicalTransaction, TransactionRecord, TxState};
pub use propagation::Propagation;
pub use scope::{LogicalScope, ScopeId};
