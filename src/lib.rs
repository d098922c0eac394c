//! txscope - nested transaction scopes with propagation policies
//!
//! This crate coordinates logical transaction scopes on top of a persistence
//! backend. Nested `REQUIRED` scopes share one physical transaction, a
//! `REQUIRES_NEW` scope suspends it and runs its own, and a failing
//! participant marks the shared transaction rollback-only so the owner's
//! commit reports the rollback instead of silently losing it.
//!
//! # Example
//!
//! ```
//! use txscope::backend::MemoryBackend;
//! use txscope::transaction::{Propagation, TransactionCoordinator, TransactionResult};
//!
//! let mut coord = TransactionCoordinator::new(MemoryBackend::new());
//! coord
//!     .with_transaction(Propagation::Required, |c| -> TransactionResult<()> {
//!         assert!(c.is_transaction_active());
//!         Ok(())
//!     })
//!     .unwrap();
//! ```

pub mod backend;
pub mod demo;
pub mod transaction;
