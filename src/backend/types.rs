//! Identifier and status types shared by backends.

use std::fmt;

use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Identifies one physical connection handed out by a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Ulid);

impl ConnectionId {
    /// Generate a fresh connection id.
    pub fn generate() -> Self {
        Self(Ulid::new())
    }

    /// short form of the id, for log lines
    pub fn short(&self) -> String {
        let s = self.0.to_string().to_lowercase();
        s[s.len() - 8..].to_string()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0.to_string().to_lowercase())
    }
}

/// Lifecycle of a backend connection's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Active,
    Committed,
    RolledBack,
}

impl ConnectionStatus {
    /// Whether the connection finished its transaction.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ConnectionStatus::Active)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Active => write!(f, "active"),
            ConnectionStatus::Committed => write!(f, "committed"),
            ConnectionStatus::RolledBack => write!(f, "rolled back"),
        }
    }
}
