//! Member-join demo application.
//!
//! A small service over [`MemoryBackend`](crate::backend::MemoryBackend)
//! that saves a member and an audit log entry, with every layer optionally
//! transactional. The named scenarios in [`scenario`] show how the choice of
//! propagation decides what survives a failure in the log layer.

mod repository;
mod scenario;
mod service;

pub use repository::{LogEntry, LogRepository, Member, MemberRepository, LOG_FAILURE_MARKER};
pub use scenario::{find_scenario, run_all, Check, Scenario, ScenarioReport, SCENARIOS};
pub use service::{MemberService, ServiceError, ServiceResult, TxWiring};

use crate::backend::MemoryBackend;
use crate::transaction::TransactionCoordinator;

/// Coordinator type used throughout the demo.
pub type Chain = TransactionCoordinator<MemoryBackend>;
