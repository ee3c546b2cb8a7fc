//! Per-execution-unit transaction context.
//!
//! A `TransactionContext` holds at most one active physical transaction and
//! the stack of transactions suspended beneath it. It is passed explicitly
//! (`&mut TransactionContext`) to every manager call, so two threads can only
//! share a context by handing it over; no locking is needed for the slot.
//!
//! Logical scopes opened in the context complete in LIFO order; the context
//! tracks the open scopes to enforce that.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::warn;
use ulid::Ulid;

use crate::resource::Connection;
use crate::transaction::manager::ManagerInner;
use crate::transaction::status::{Binding, RollbackOnlyFlag, ScopeId, TransactionStatus};

/// A savepoint held inside a physical transaction.
#[derive(Debug)]
pub(crate) struct Savepoint {
    pub(crate) name: String,
    /// Rollback-only mark at creation, restored when rolling back to it.
    pub(crate) rollback_only_before: bool,
}

/// The resource-level transaction bound to one connection.
#[derive(Debug)]
pub(crate) struct PhysicalTransaction {
    pub(crate) id: String,
    pub(crate) connection: Connection,
    pub(crate) read_only: bool,
    /// Number of logical scopes currently using this transaction.
    pub(crate) depth: usize,
    pub(crate) rollback_only: RollbackOnlyFlag,
    pub(crate) savepoints: Vec<Savepoint>,
    savepoint_counter: u32,
    pub(crate) started_at: DateTime<Utc>,
}

impl PhysicalTransaction {
    pub(crate) fn new(connection: Connection, read_only: bool) -> Self {
        Self {
            id: Ulid::new().to_string().to_lowercase(),
            connection,
            read_only,
            depth: 1,
            rollback_only: RollbackOnlyFlag::default(),
            savepoints: Vec::new(),
            savepoint_counter: 0,
            started_at: Utc::now(),
        }
    }

    pub(crate) fn binding(&self) -> Binding {
        Binding {
            tx_id: self.id.clone(),
            connection: self.connection.id(),
            rollback_only: self.rollback_only.clone(),
        }
    }

    pub(crate) fn next_savepoint_name(&mut self) -> String {
        self.savepoint_counter += 1;
        format!("SAVEPOINT_{}", self.savepoint_counter)
    }
}

/// Transaction state of one execution unit (thread, task, request).
pub struct TransactionContext {
    id: u64,
    manager: Arc<ManagerInner>,
    active: Option<PhysicalTransaction>,
    suspended: Vec<PhysicalTransaction>,
    /// Bookkeeping copies of the open scopes, innermost last.
    open_scopes: Vec<TransactionStatus>,
    next_scope: ScopeId,
}

impl TransactionContext {
    pub(crate) fn new(id: u64, manager: Arc<ManagerInner>) -> Self {
        Self {
            id,
            manager,
            active: None,
            suspended: Vec::new(),
            open_scopes: Vec::new(),
            next_scope: 0,
        }
    }

    /// Context identifier, unique per manager.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Whether a physical transaction is active in this context.
    pub fn has_active_transaction(&self) -> bool {
        self.active.is_some()
    }

    /// Number of logical scopes using the active physical transaction.
    pub fn depth(&self) -> usize {
        self.active.as_ref().map(|tx| tx.depth).unwrap_or(0)
    }

    /// Number of physical transactions suspended beneath the active one.
    pub fn suspended_count(&self) -> usize {
        self.suspended.len()
    }

    /// Number of logical scopes opened and not yet completed, including
    /// non-transactional ones and those of suspended transactions.
    pub fn open_scope_count(&self) -> usize {
        self.open_scopes.len()
    }

    /// Whether the active physical transaction is marked rollback-only.
    pub fn is_rollback_only(&self) -> bool {
        self.active
            .as_ref()
            .map(|tx| tx.rollback_only.get())
            .unwrap_or(false)
    }

    /// Id of the active physical transaction.
    pub fn current_transaction_id(&self) -> Option<&str> {
        self.active.as_ref().map(|tx| tx.id.as_str())
    }

    /// Whether the active physical transaction is read-only.
    pub fn is_read_only(&self) -> bool {
        self.active.as_ref().map(|tx| tx.read_only).unwrap_or(false)
    }

    // ==================== Crate-internal slot management ====================

    pub(crate) fn manager(&self) -> &Arc<ManagerInner> {
        &self.manager
    }

    pub(crate) fn active_mut(&mut self) -> Option<&mut PhysicalTransaction> {
        self.active.as_mut()
    }

    /// Install a freshly started transaction. The slot must be empty.
    pub(crate) fn activate(&mut self, tx: PhysicalTransaction) {
        debug_assert!(self.active.is_none(), "context slot already occupied");
        self.active = Some(tx);
    }

    pub(crate) fn take_active(&mut self) -> Option<PhysicalTransaction> {
        self.active.take()
    }

    /// Move the active transaction onto the suspended stack.
    ///
    /// Returns the id of the suspended transaction, if there was one.
    pub(crate) fn suspend(&mut self) -> Option<String> {
        let tx = self.active.take()?;
        let id = tx.id.clone();
        self.suspended.push(tx);
        Some(id)
    }

    /// Restore the most recently suspended transaction into the slot.
    pub(crate) fn resume(&mut self) -> Option<&PhysicalTransaction> {
        debug_assert!(self.active.is_none(), "resuming over an active transaction");
        self.active = self.suspended.pop();
        self.active.as_ref()
    }

    /// Allocate the id of the next scope. Ids increase monotonically.
    pub(crate) fn next_scope_id(&mut self) -> ScopeId {
        self.next_scope += 1;
        self.next_scope
    }

    pub(crate) fn push_scope(&mut self, status: &TransactionStatus) {
        self.open_scopes.push(status.detached());
    }

    pub(crate) fn pop_scope(&mut self, scope: ScopeId) {
        if self.innermost_scope() == Some(scope) {
            self.open_scopes.pop();
        }
    }

    pub(crate) fn innermost_scope(&self) -> Option<ScopeId> {
        self.open_scopes.last().map(|s| s.scope)
    }

    /// Bookkeeping copy of the innermost open scope.
    pub(crate) fn innermost_status(&self) -> Option<TransactionStatus> {
        self.open_scopes.last().map(TransactionStatus::detached)
    }
}

impl Drop for TransactionContext {
    fn drop(&mut self) {
        if self.active.is_none() && self.suspended.is_empty() {
            return;
        }

        warn!(
            context = self.id,
            open_scopes = self.open_scopes.len(),
            suspended = self.suspended.len(),
            "transaction context dropped with open transactions, rolling back"
        );

        let mut leftovers: Vec<PhysicalTransaction> = self.active.take().into_iter().collect();
        leftovers.extend(self.suspended.drain(..).rev());
        for tx in leftovers {
            self.manager.discard(tx);
        }
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("id", &self.id)
            .field("active", &self.current_transaction_id())
            .field("depth", &self.depth())
            .field("suspended", &self.suspended.len())
            .field("open_scopes", &self.open_scopes.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resource::{ConnectionId, ConnectionPool};
    use crate::transaction::manager::TransactionManager;
    use crate::transaction::propagation::Propagation;

    fn tx(raw: u64) -> PhysicalTransaction {
        PhysicalTransaction::new(Connection::new(ConnectionId::new(raw)), false)
    }

    #[test]
    fn test_suspend_and_resume_is_lifo() {
        let manager = TransactionManager::new(ConnectionPool::new(3));
        let mut ctx = manager.new_context();

        ctx.activate(tx(1));
        let first = ctx.current_transaction_id().unwrap().to_string();
        assert_eq!(ctx.suspend(), Some(first.clone()));
        assert!(!ctx.has_active_transaction());

        ctx.activate(tx(2));
        let second = ctx.current_transaction_id().unwrap().to_string();
        ctx.suspend();
        assert_eq!(ctx.suspended_count(), 2);

        assert_eq!(ctx.resume().map(|t| t.id.clone()), Some(second));
        ctx.take_active();
        assert_eq!(ctx.resume().map(|t| t.id.clone()), Some(first));
        ctx.take_active();
        assert!(ctx.resume().is_none());
    }

    #[test]
    fn test_suspend_without_active() {
        let manager = TransactionManager::new(ConnectionPool::new(1));
        let mut ctx = manager.new_context();
        assert_eq!(ctx.suspend(), None);
        assert_eq!(ctx.suspended_count(), 0);
    }

    #[test]
    fn test_scope_stack() {
        let manager = TransactionManager::new(ConnectionPool::new(1));
        let mut ctx = manager.new_context();

        let outer = manager.begin(&mut ctx, Propagation::Supports).unwrap();
        let inner = manager.begin(&mut ctx, Propagation::Supports).unwrap();
        assert!(inner.scope_id() > outer.scope_id());
        assert_eq!(ctx.innermost_scope(), Some(inner.scope_id()));
        assert_eq!(
            ctx.innermost_status().map(|s| s.definition().propagation),
            Some(Propagation::Supports)
        );

        // Popping a scope that is not innermost is ignored.
        ctx.pop_scope(outer.scope_id());
        assert_eq!(ctx.open_scope_count(), 2);

        ctx.pop_scope(inner.scope_id());
        ctx.pop_scope(outer.scope_id());
        assert_eq!(ctx.innermost_scope(), None);
    }

    #[test]
    fn test_savepoint_names_are_sequential() {
        let mut t = tx(1);
        assert_eq!(t.next_savepoint_name(), "SAVEPOINT_1");
        assert_eq!(t.next_savepoint_name(), "SAVEPOINT_2");
    }

    #[test]
    fn test_transaction_ids_unique() {
        assert_ne!(tx(1).id, tx(2).id);
    }
}
