//! In-memory reference backend.
//!
//! Every connection stages its writes privately. Commit publishes the staged
//! rows to the shared tables, rollback throws them away. Readers outside a
//! connection only ever see committed rows.

use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde_json::Value;
use tracing::trace;

use crate::backend::error::{BackendError, BackendResult};
use crate::backend::types::{ConnectionId, ConnectionStatus};
use crate::backend::Backend;

/// A one-shot failure to inject into the next matching backend call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    Start,
    Commit,
    Rollback,
}

/// Thread-safe in-memory backend.
///
/// Clone this to share across call chains - it uses Arc internally.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryBackendInner>,
}

#[derive(Default)]
struct MemoryBackendInner {
    /// Committed rows by table name.
    tables: RwLock<BTreeMap<String, Vec<Value>>>,
    /// Connections in creation order.
    connections: Mutex<Vec<ConnectionRecord>>,
    /// Pending injected faults.
    faults: Mutex<Vec<Fault>>,
}

struct ConnectionRecord {
    id: ConnectionId,
    status: ConnectionStatus,
    staged: Vec<(String, Value)>,
}

impl MemoryBackend {
    /// Create an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next call of the given kind fail.
    pub fn inject(&self, fault: Fault) {
        self.inner.faults.lock().push(fault);
    }

    fn take_fault(&self, fault: Fault) -> bool {
        let mut faults = self.inner.faults.lock();
        match faults.iter().position(|f| *f == fault) {
            Some(pos) => {
                faults.remove(pos);
                true
            }
            None => false,
        }
    }

    /// Stage a row write on an active connection.
    pub fn insert(&self, conn: &ConnectionId, table: &str, row: Value) -> BackendResult<()> {
        let mut connections = self.inner.connections.lock();
        let record = active_record(&mut connections, conn)?;
        record.staged.push((table.to_string(), row));
        Ok(())
    }

    /// Find a committed row.
    pub fn find<P>(&self, table: &str, predicate: P) -> Option<Value>
    where
        P: Fn(&Value) -> bool,
    {
        self.inner
            .tables
            .read()
            .get(table)
            .and_then(|rows| rows.iter().find(|row| predicate(*row)).cloned())
    }

    /// Find a row as seen from inside a connection: its own staged writes
    /// first, then committed data.
    pub fn find_in<P>(
        &self,
        conn: &ConnectionId,
        table: &str,
        predicate: P,
    ) -> BackendResult<Option<Value>>
    where
        P: Fn(&Value) -> bool,
    {
        let mut connections = self.inner.connections.lock();
        let record = active_record(&mut connections, conn)?;
        let staged = record
            .staged
            .iter()
            .filter(|(t, _)| t == table)
            .map(|(_, row)| row)
            .find(|row| predicate(*row))
            .cloned();
        if staged.is_some() {
            return Ok(staged);
        }
        Ok(self.find(table, predicate))
    }

    /// Number of committed rows in a table.
    pub fn row_count(&self, table: &str) -> usize {
        self.inner.tables.read().get(table).map_or(0, Vec::len)
    }

    /// Status of a connection, if the backend ever handed it out.
    pub fn status(&self, conn: &ConnectionId) -> Option<ConnectionStatus> {
        self.inner
            .connections
            .lock()
            .iter()
            .find(|r| r.id == *conn)
            .map(|r| r.status)
    }

    /// All connections with their status, oldest first.
    pub fn connections(&self) -> Vec<(ConnectionId, ConnectionStatus)> {
        self.inner
            .connections
            .lock()
            .iter()
            .map(|r| (r.id, r.status))
            .collect()
    }

    /// Number of connections with an open transaction.
    pub fn active_connections(&self) -> usize {
        self.inner
            .connections
            .lock()
            .iter()
            .filter(|r| r.status == ConnectionStatus::Active)
            .count()
    }
}

fn active_record<'a>(
    connections: &'a mut [ConnectionRecord],
    conn: &ConnectionId,
) -> BackendResult<&'a mut ConnectionRecord> {
    let record = connections
        .iter_mut()
        .find(|r| r.id == *conn)
        .ok_or(BackendError::UnknownConnection(*conn))?;
    if record.status.is_terminal() {
        return Err(BackendError::ConnectionClosed {
            id: *conn,
            status: record.status.to_string(),
        });
    }
    Ok(record)
}

impl Backend for MemoryBackend {
    type Connection = ConnectionId;

    fn start_transaction(&self) -> BackendResult<ConnectionId> {
        if self.take_fault(Fault::Start) {
            return Err(BackendError::Unavailable("injected start failure".into()));
        }
        let id = ConnectionId::generate();
        self.inner.connections.lock().push(ConnectionRecord {
            id,
            status: ConnectionStatus::Active,
            staged: Vec::new(),
        });
        trace!(conn = %id.short(), "connection opened");
        Ok(id)
    }

    fn commit(&self, conn: &ConnectionId) -> BackendResult<()> {
        let mut connections = self.inner.connections.lock();
        let record = active_record(&mut connections, conn)?;

        // A failed commit leaves the connection open so the caller can roll back.
        if self.take_fault(Fault::Commit) {
            return Err(BackendError::CommitFailed("injected commit failure".into()));
        }

        let staged = std::mem::take(&mut record.staged);
        record.status = ConnectionStatus::Committed;
        trace!(conn = %conn.short(), rows = staged.len(), "connection committed");

        let mut tables = self.inner.tables.write();
        for (table, row) in staged {
            tables.entry(table).or_default().push(row);
        }
        Ok(())
    }

    fn rollback(&self, conn: &ConnectionId) -> BackendResult<()> {
        let mut connections = self.inner.connections.lock();
        let record = active_record(&mut connections, conn)?;

        // The connection is closed whether or not the rollback reports success.
        trace!(conn = %conn.short(), rows = record.staged.len(), "connection rolled back");
        record.staged.clear();
        record.status = ConnectionStatus::RolledBack;

        if self.take_fault(Fault::Rollback) {
            return Err(BackendError::RollbackFailed("injected rollback failure".into()));
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryBackend")
            .field("tables", &self.inner.tables.read().len())
            .field("active_connections", &self.active_connections())
            .finish()
    }
}
