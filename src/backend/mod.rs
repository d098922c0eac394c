//! Persistence backend seam for the coordinator.
//!
//! The coordinator never talks to a database directly. Everything it needs
//! from the outside world is the three calls on [`Backend`]: start a physical
//! transaction, commit it, roll it back.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                  TransactionCoordinator                     │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!                              ▼
//!                    ┌───────────────────┐
//!                    │  Backend (trait)  │
//!                    └───────────────────┘
//!                              │
//!              ┌───────────────┴───────────────┐
//!              ▼                               ▼
//!       ┌─────────────┐                 ┌─────────────┐
//!       │MemoryBackend│                 │ your driver │
//!       └─────────────┘                 └─────────────┘
//! ```

mod error;
mod memory;
mod types;

pub use error::{BackendError, BackendResult};
pub use memory::{Fault, MemoryBackend};
pub use types::{ConnectionId, ConnectionStatus};

use std::fmt;

/// A persistence backend that hands out physical transactions.
///
/// Implementations are expected to be cheap to share (the coordinator holds
/// its own copy), and every call is synchronous.
pub trait Backend {
    /// Handle for one physical transaction on a backend connection.
    type Connection: fmt::Debug;

    /// Start a new physical transaction.
    fn start_transaction(&self) -> BackendResult<Self::Connection>;

    /// Commit the physical transaction behind `conn`.
    fn commit(&self, conn: &Self::Connection) -> BackendResult<()>;

    /// Roll back the physical transaction behind `conn`.
    fn rollback(&self, conn: &Self::Connection) -> BackendResult<()>;
}
