//! Logical scopes and the per-chain scope stack.

use std::fmt;

use ulid::Ulid;

use crate::transaction::physical::PhysicalTransaction;
use crate::transaction::propagation::Propagation;

/// Unique identifier of a logical scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScopeId(Ulid);

impl ScopeId {
    pub(crate) fn generate() -> Self {
        Self(Ulid::new())
    }
}

impl fmt::Display for ScopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "scope-{}", self.0.to_string().to_lowercase())
    }
}

/// Handle for one `begin` call.
///
/// Hand it back to exactly one of `commit` or `rollback` on the coordinator
/// that created it.
#[derive(Debug, PartialEq, Eq)]
pub struct LogicalScope {
    id: ScopeId,
    propagation: Propagation,
    is_new: bool,
    depth: usize,
    tx_id: String,
}

impl LogicalScope {
    pub(crate) fn new(
        id: ScopeId,
        propagation: Propagation,
        is_new: bool,
        depth: usize,
        tx_id: String,
    ) -> Self {
        Self {
            id,
            propagation,
            is_new,
            depth,
            tx_id,
        }
    }

    /// Get the scope ID.
    pub fn id(&self) -> ScopeId {
        self.id
    }

    /// The propagation policy this scope was begun with.
    pub fn propagation(&self) -> Propagation {
        self.propagation
    }

    /// Whether this scope started (and therefore owns) its physical transaction.
    pub fn is_new(&self) -> bool {
        self.is_new
    }

    /// Position in the stack, 1 for the outermost scope.
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// ID of the physical transaction this scope runs in.
    pub fn transaction_id(&self) -> &str {
        &self.tx_id
    }
}

/// Coordinator-side bookkeeping for an open scope.
pub(crate) struct ScopeEntry<C> {
    pub(crate) id: ScopeId,
    pub(crate) propagation: Propagation,
    pub(crate) is_new: bool,
    /// Local rollback request made through `set_rollback_only`.
    pub(crate) rollback_only: bool,
    /// Transaction parked by a REQUIRES_NEW begin, resumed when this scope ends.
    pub(crate) suspended: Option<PhysicalTransaction<C>>,
}

/// Open scopes of one call chain, innermost last.
pub(crate) struct ScopeStack<C> {
    entries: Vec<ScopeEntry<C>>,
}

impl<C> ScopeStack<C> {
    pub(crate) fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(crate) fn push(&mut self, entry: ScopeEntry<C>) {
        self.entries.push(entry);
    }

    pub(crate) fn top(&self) -> Option<&ScopeEntry<C>> {
        self.entries.last()
    }

    pub(crate) fn pop(&mut self) -> Option<ScopeEntry<C>> {
        self.entries.pop()
    }

    pub(crate) fn contains(&self, id: ScopeId) -> bool {
        self.entries.iter().any(|e| e.id == id)
    }

    pub(crate) fn get_mut(&mut self, id: ScopeId) -> Option<&mut ScopeEntry<C>> {
        self.entries.iter_mut().find(|e| e.id == id)
    }

    pub(crate) fn get(&self, id: ScopeId) -> Option<&ScopeEntry<C>> {
        self.entries.iter().find(|e| e.id == id)
    }

    /// Suspended transactions, outermost first.
    pub(crate) fn suspended(&self) -> impl Iterator<Item = &PhysicalTransaction<C>> {
        self.entries.iter().filter_map(|e| e.suspended.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(is_new: bool) -> ScopeEntry<()> {
        ScopeEntry {
            id: ScopeId::generate(),
            propagation: Propagation::Required,
            is_new,
            rollback_only: false,
            suspended: None,
        }
    }

    #[test]
    fn test_stack_order() {
        let mut stack = ScopeStack::new();
        let outer = entry(true);
        let inner = entry(false);
        let (outer_id, inner_id) = (outer.id, inner.id);

        stack.push(outer);
        stack.push(inner);
        assert_eq!(stack.len(), 2);
        assert_eq!(stack.top().map(|e| e.id), Some(inner_id));
        assert!(stack.contains(outer_id));

        assert_eq!(stack.pop().map(|e| e.id), Some(inner_id));
        assert_eq!(stack.pop().map(|e| e.id), Some(outer_id));
        assert_eq!(stack.len(), 0);
    }

    #[test]
    fn test_scope_id_display() {
        let id = ScopeId::generate();
        assert!(id.to_string().starts_with("scope-"));
    }
}
