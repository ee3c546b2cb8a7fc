//! Transaction status: the handle for one logical scope.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::resource::ConnectionId;
use crate::transaction::definition::TransactionDefinition;

/// Identifier of a logical scope within its context.
pub type ScopeId = u64;

/// Rollback-only mark shared by a physical transaction and every status
/// bound to it.
#[derive(Debug, Clone, Default)]
pub(crate) struct RollbackOnlyFlag(Arc<AtomicBool>);

impl RollbackOnlyFlag {
    pub(crate) fn get(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn set(&self, value: bool) {
        self.0.store(value, Ordering::Release);
    }
}

/// The physical transaction a status is bound to.
#[derive(Debug, Clone)]
pub(crate) struct Binding {
    pub(crate) tx_id: String,
    pub(crate) connection: ConnectionId,
    pub(crate) rollback_only: RollbackOnlyFlag,
}

/// One logical transaction scope, as returned by `TransactionManager::begin`.
///
/// Must be completed by exactly one call to `commit` or `rollback`; any
/// further terminal call fails with `IllegalTransactionState`.
#[derive(Debug)]
pub struct TransactionStatus {
    pub(crate) scope: ScopeId,
    pub(crate) context_id: u64,
    pub(crate) definition: TransactionDefinition,
    pub(crate) binding: Option<Binding>,
    pub(crate) new_transaction: bool,
    pub(crate) savepoint: Option<String>,
    pub(crate) resumes_suspended: bool,
    pub(crate) local_rollback_only: bool,
    pub(crate) completed: bool,
    pub(crate) started_at: DateTime<Utc>,
}

impl TransactionStatus {
    /// Whether this scope physically began the underlying transaction.
    pub fn is_new_transaction(&self) -> bool {
        self.new_transaction
    }

    /// Whether this scope runs inside a physical transaction at all.
    pub fn has_transaction(&self) -> bool {
        self.binding.is_some()
    }

    /// Whether this scope was opened on a savepoint.
    pub fn has_savepoint(&self) -> bool {
        self.savepoint.is_some()
    }

    /// Name of the savepoint backing this scope.
    pub fn savepoint_name(&self) -> Option<&str> {
        self.savepoint.as_deref()
    }

    /// Whether a commit of this scope will be turned into a rollback.
    ///
    /// True if the scope itself was marked, or if the shared physical
    /// transaction was marked by any participant.
    pub fn is_rollback_only(&self) -> bool {
        self.local_rollback_only || self.is_global_rollback_only()
    }

    /// Whether the shared physical transaction is marked rollback-only.
    pub fn is_global_rollback_only(&self) -> bool {
        self.binding
            .as_ref()
            .map(|b| b.rollback_only.get())
            .unwrap_or(false)
    }

    /// Mark this scope so that its commit performs a rollback instead.
    ///
    /// For a participating scope the rollback propagates to the shared
    /// transaction as a rollback-only mark.
    pub fn set_rollback_only(&mut self) {
        self.local_rollback_only = true;
    }

    /// Whether `commit` or `rollback` has already been called.
    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Id of the physical transaction this scope is bound to.
    pub fn transaction_id(&self) -> Option<&str> {
        self.binding.as_ref().map(|b| b.tx_id.as_str())
    }

    /// Connection of the physical transaction this scope is bound to.
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.binding.as_ref().map(|b| b.connection)
    }

    /// The definition this scope was opened with.
    pub fn definition(&self) -> &TransactionDefinition {
        &self.definition
    }

    pub fn scope_id(&self) -> ScopeId {
        self.scope
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    /// An uncompleted copy of this scope's bookkeeping.
    ///
    /// The context keeps one per open scope, so that a scope whose handle
    /// was dropped or lost to a panic can still be rolled back.
    pub(crate) fn detached(&self) -> TransactionStatus {
        TransactionStatus {
            scope: self.scope,
            context_id: self.context_id,
            definition: self.definition.clone(),
            binding: self.binding.clone(),
            new_transaction: self.new_transaction,
            savepoint: self.savepoint.clone(),
            resumes_suspended: self.resumes_suspended,
            local_rollback_only: false,
            completed: false,
            started_at: self.started_at,
        }
    }
}
