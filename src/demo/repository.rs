//! Member and log repositories.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;

use crate::demo::service::{ServiceError, ServiceResult};
use crate::demo::Chain;
use crate::transaction::Propagation;

/// Log messages containing this marker fail to save.
pub const LOG_FAILURE_MARKER: &str = "log-failure";

const MEMBER_TABLE: &str = "member";
const LOG_TABLE: &str = "log";

/// A registered member.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Member {
    pub username: String,
}

impl Member {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
        }
    }
}

/// An audit log entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub message: String,
}

impl LogEntry {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Stage a row on the chain's current transaction.
fn persist<T: Serialize>(chain: &mut Chain, table: &str, row: &T) -> ServiceResult<()> {
    let conn = *chain.connection().ok_or(ServiceError::NoTransaction)?;
    let value = serde_json::to_value(row)?;
    chain.backend().insert(&conn, table, value)?;
    Ok(())
}

/// Run `body` in its own scope when `propagation` is set, otherwise inline.
fn transactional<F>(chain: &mut Chain, propagation: Option<Propagation>, body: F) -> ServiceResult<()>
where
    F: FnOnce(&mut Chain) -> ServiceResult<()>,
{
    match propagation {
        Some(p) => chain.with_transaction(p, body),
        None => body(chain),
    }
}

/// Member persistence.
#[derive(Debug, Clone, Default)]
pub struct MemberRepository {
    propagation: Option<Propagation>,
}

impl MemberRepository {
    /// `propagation` of `None` means save joins whatever the caller runs in.
    pub fn new(propagation: Option<Propagation>) -> Self {
        Self { propagation }
    }

    pub fn save(&self, chain: &mut Chain, member: &Member) -> ServiceResult<()> {
        transactional(chain, self.propagation, |c| {
            info!(username = %member.username, "saving member");
            persist(c, MEMBER_TABLE, member)
        })
    }

    /// Look up a committed member.
    pub fn find(&self, chain: &Chain, username: &str) -> Option<Member> {
        chain
            .backend()
            .find(MEMBER_TABLE, |row: &Value| row["username"] == username)
            .and_then(|row| serde_json::from_value(row).ok())
    }
}

/// Audit log persistence.
#[derive(Debug, Clone, Default)]
pub struct LogRepository {
    propagation: Option<Propagation>,
}

impl LogRepository {
    pub fn new(propagation: Option<Propagation>) -> Self {
        Self { propagation }
    }

    /// Save a log entry. Entries carrying [`LOG_FAILURE_MARKER`] are written
    /// and then rejected, so only a rollback keeps them out.
    pub fn save(&self, chain: &mut Chain, entry: &LogEntry) -> ServiceResult<()> {
        transactional(chain, self.propagation, |c| {
            info!(message = %entry.message, "saving log entry");
            persist(c, LOG_TABLE, entry)?;
            if entry.message.contains(LOG_FAILURE_MARKER) {
                return Err(ServiceError::LogFailure(entry.message.clone()));
            }
            Ok(())
        })
    }

    /// Look up a committed log entry.
    pub fn find(&self, chain: &Chain, message: &str) -> Option<LogEntry> {
        chain
            .backend()
            .find(LOG_TABLE, |row: &Value| row["message"] == message)
            .and_then(|row| serde_json::from_value(row).ok())
    }
}
