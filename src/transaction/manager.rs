//! Transaction manager - resolves propagation and executes completion.
//!
//! The TransactionManager is the main entry point for transactions.
//! It handles:
//! - Propagation resolution when a scope is opened
//! - Suspension and resumption around independent transactions
//! - Savepoints for nested scopes
//! - Rollback-only marking by participating scopes
//! - Tracking in-flight physical transactions

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::config::ManagerConfig;
use crate::resource::{ConnectionId, ResourceConnection};
use crate::transaction::context::{PhysicalTransaction, Savepoint, TransactionContext};
use crate::transaction::definition::TransactionDefinition;
use crate::transaction::error::{TransactionError, TransactionResult};
use crate::transaction::propagation::Propagation;
use crate::transaction::status::{Binding, ScopeId, TransactionStatus};

/// Registry entry for an in-flight physical transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionInfo {
    /// Unique transaction ID.
    pub id: String,
    /// Connection the transaction runs on.
    pub connection: ConnectionId,
    /// Context that owns the transaction.
    pub context_id: u64,
    /// Name of the scope that started it.
    pub name: Option<String>,
    pub read_only: bool,
    /// Whether it is currently suspended beneath another transaction.
    pub suspended: bool,
    /// When the transaction started.
    pub started_at: DateTime<Utc>,
}

pub(crate) struct ManagerInner {
    /// The physical resource.
    resource: Arc<dyn ResourceConnection>,
    config: ManagerConfig,
    /// In-flight physical transactions tracked by ID.
    active: RwLock<HashMap<String, TransactionInfo>>,
    next_context: AtomicU64,
}

impl ManagerInner {
    fn register(&self, context_id: u64, tx: &PhysicalTransaction, definition: &TransactionDefinition) {
        let info = TransactionInfo {
            id: tx.id.clone(),
            connection: tx.connection.id(),
            context_id,
            name: definition.name.clone(),
            read_only: tx.read_only,
            suspended: false,
            started_at: tx.started_at,
        };
        self.active.write().insert(tx.id.clone(), info);
    }

    fn set_suspended(&self, tx_id: &str, suspended: bool) {
        if let Some(info) = self.active.write().get_mut(tx_id) {
            info.suspended = suspended;
        }
    }

    /// Release the connection of a finished transaction.
    fn end(&self, tx: PhysicalTransaction) {
        self.active.write().remove(&tx.id);
        self.resource.release(tx.connection);
    }

    /// Roll back and release a transaction abandoned by its context.
    pub(crate) fn discard(&self, mut tx: PhysicalTransaction) {
        if tx.connection.in_transaction() {
            warn!(tx = %tx.id, connection = %tx.connection.id(), "rolling back abandoned transaction");
            if let Err(e) = self.resource.physical_rollback(&mut tx.connection) {
                error!(tx = %tx.id, error = %e, "rollback of abandoned transaction failed");
            }
        }
        self.end(tx);
    }
}

/// Transaction manager - coordinates all transaction operations.
///
/// Thread-safe: can be shared across threads via Clone (uses Arc internally).
/// Each execution unit works through its own `TransactionContext`.
#[derive(Clone)]
pub struct TransactionManager {
    inner: Arc<ManagerInner>,
}

impl TransactionManager {
    /// Create a manager with the default configuration.
    pub fn new<R: ResourceConnection + 'static>(resource: R) -> Self {
        Self::with_config(resource, ManagerConfig::default())
    }

    /// Create a manager with a custom configuration.
    pub fn with_config<R: ResourceConnection + 'static>(resource: R, config: ManagerConfig) -> Self {
        Self::from_shared(Arc::new(resource), config)
    }

    /// Create a manager over an already shared resource.
    pub fn from_shared(resource: Arc<dyn ResourceConnection>, config: ManagerConfig) -> Self {
        Self {
            inner: Arc::new(ManagerInner {
                resource,
                config,
                active: RwLock::new(HashMap::new()),
                next_context: AtomicU64::new(1),
            }),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.inner.config
    }

    /// Create an empty context for one execution unit.
    pub fn new_context(&self) -> TransactionContext {
        let id = self.inner.next_context.fetch_add(1, Ordering::Relaxed);
        TransactionContext::new(id, self.inner.clone())
    }

    // ==================== Scope lifecycle ====================

    /// Open a logical transaction scope.
    ///
    /// Accepts a full `TransactionDefinition` or just a `Propagation`.
    pub fn begin(
        &self,
        ctx: &mut TransactionContext,
        definition: impl Into<TransactionDefinition>,
    ) -> TransactionResult<TransactionStatus> {
        let definition = definition.into();
        self.check_context(ctx)?;

        if ctx.has_active_transaction() {
            return self.handle_existing_transaction(ctx, definition);
        }

        match definition.propagation {
            Propagation::Mandatory => Err(TransactionError::illegal(
                "no existing transaction found for transaction marked with propagation 'MANDATORY'",
            )),
            p if p.starts_transaction() => {
                debug!(name = definition.display_name(), propagation = %p, "creating new transaction");
                self.start_transaction(ctx, definition, false)
            }
            _ => Ok(self.empty_scope(ctx, definition, false)),
        }
    }

    /// Commit a logical scope.
    ///
    /// Only the scope that began the physical transaction commits it. If the
    /// shared transaction was marked rollback-only by a participant, it is
    /// rolled back instead and `UnexpectedRollback` is returned.
    pub fn commit(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
    ) -> TransactionResult<()> {
        self.check_completable(ctx, status)?;

        if status.local_rollback_only {
            debug!(scope = status.scope, "transactional code has requested rollback");
            return self.process_rollback(ctx, status, false);
        }

        if status.is_global_rollback_only() {
            debug!(
                scope = status.scope,
                "global transaction is marked as rollback-only but transactional code requested commit"
            );
            return self.process_rollback(ctx, status, true);
        }

        self.process_commit(ctx, status)
    }

    /// Roll back a logical scope.
    ///
    /// A participating scope cannot roll back the shared transaction on its
    /// own; it marks it rollback-only instead.
    pub fn rollback(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
    ) -> TransactionResult<()> {
        self.check_completable(ctx, status)?;
        self.process_rollback(ctx, status, false)
    }

    /// Roll back every scope opened in `ctx` after `scope`, innermost first.
    ///
    /// Used when a unit of work panicked or returned without completing the
    /// scopes it opened. Joined scopes mark their transaction rollback-only,
    /// savepoints are rolled back, new transactions are rolled back and
    /// released, and suspended transactions are resumed. Returns the number
    /// of scopes closed; on a physical failure the remaining scopes are
    /// still closed and the first error is returned.
    pub(crate) fn unwind_to(
        &self,
        ctx: &mut TransactionContext,
        scope: ScopeId,
    ) -> TransactionResult<usize> {
        self.check_context(ctx)?;
        let mut closed = 0;
        let mut first_error = None;

        while let Some(mut leftover) = ctx.innermost_status() {
            if leftover.scope <= scope {
                break;
            }
            warn!(
                scope = leftover.scope,
                propagation = %leftover.definition.propagation,
                tx = leftover.transaction_id().unwrap_or("-"),
                "rolling back scope left open by unit of work"
            );
            leftover.local_rollback_only = true;
            if let Err(e) = self.process_rollback(ctx, &mut leftover, false) {
                error!(scope = leftover.scope, error = %e, "rollback of abandoned scope failed");
                first_error.get_or_insert(e);
            }
            // process_rollback pops the scope even when the physical call fails.
            closed += 1;
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(closed),
        }
    }

    // ==================== Registry ====================

    /// Get the number of in-flight physical transactions, across contexts.
    pub fn active_count(&self) -> usize {
        self.inner.active.read().len()
    }

    /// List all in-flight transaction IDs.
    pub fn active_transactions(&self) -> Vec<String> {
        self.inner.active.read().keys().cloned().collect()
    }

    /// Check if a physical transaction is in flight.
    pub fn is_active(&self, tx_id: &str) -> bool {
        self.inner.active.read().contains_key(tx_id)
    }

    /// Get registry information for an in-flight transaction.
    pub fn transaction_info(&self, tx_id: &str) -> Option<TransactionInfo> {
        self.inner.active.read().get(tx_id).cloned()
    }

    // ==================== Propagation ====================

    fn handle_existing_transaction(
        &self,
        ctx: &mut TransactionContext,
        definition: TransactionDefinition,
    ) -> TransactionResult<TransactionStatus> {
        match definition.propagation {
            Propagation::Never => Err(TransactionError::illegal(
                "existing transaction found for transaction marked with propagation 'NEVER'",
            )),
            Propagation::NotSupported => {
                debug!(name = definition.display_name(), "suspending current transaction");
                self.suspend(ctx);
                Ok(self.empty_scope(ctx, definition, true))
            }
            Propagation::RequiresNew => {
                debug!(
                    name = definition.display_name(),
                    "suspending current transaction, creating new transaction"
                );
                self.suspend(ctx);
                match self.start_transaction(ctx, definition, true) {
                    Ok(status) => Ok(status),
                    Err(e) => {
                        self.resume(ctx);
                        Err(e)
                    }
                }
            }
            Propagation::Nested => self.open_savepoint(ctx, definition),
            Propagation::Required | Propagation::Supports | Propagation::Mandatory => {
                self.join(ctx, definition)
            }
        }
    }

    fn start_transaction(
        &self,
        ctx: &mut TransactionContext,
        definition: TransactionDefinition,
        resumes_suspended: bool,
    ) -> TransactionResult<TransactionStatus> {
        let resource = &self.inner.resource;

        let mut connection = resource
            .acquire()
            .map_err(TransactionError::ResourceAcquisition)?;
        if let Err(e) = resource.physical_begin(&mut connection, definition.read_only) {
            resource.release(connection);
            return Err(TransactionError::ResourceAcquisition(e));
        }

        let tx = PhysicalTransaction::new(connection, definition.read_only);
        info!(
            tx = %tx.id,
            connection = %tx.connection.id(),
            name = definition.display_name(),
            read_only = tx.read_only,
            "began transaction"
        );
        self.inner.register(ctx.id(), &tx, &definition);

        let binding = tx.binding();
        ctx.activate(tx);
        Ok(self.new_status(ctx, definition, Some(binding), true, None, resumes_suspended))
    }

    fn join(
        &self,
        ctx: &mut TransactionContext,
        definition: TransactionDefinition,
    ) -> TransactionResult<TransactionStatus> {
        let validate = self.inner.config.validate_existing_transaction;
        let tx = ctx
            .active_mut()
            .ok_or_else(|| TransactionError::illegal("no active transaction to participate in"))?;

        if validate && !definition.read_only && tx.read_only {
            return Err(TransactionError::illegal(format!(
                "participating transaction '{}' is not marked as read-only but existing transaction {} is",
                definition.display_name(),
                tx.id
            )));
        }

        tx.depth += 1;
        debug!(tx = %tx.id, depth = tx.depth, name = definition.display_name(), "participating in existing transaction");

        let binding = tx.binding();
        Ok(self.new_status(ctx, definition, Some(binding), false, None, false))
    }

    fn open_savepoint(
        &self,
        ctx: &mut TransactionContext,
        definition: TransactionDefinition,
    ) -> TransactionResult<TransactionStatus> {
        if !self.inner.config.nested_transaction_allowed {
            return Err(TransactionError::NestedTransactionNotSupported(
                "nested transactions are disabled by configuration".to_string(),
            ));
        }
        let resource = &self.inner.resource;
        if !resource.supports_savepoints() {
            return Err(TransactionError::NestedTransactionNotSupported(
                "the resource does not support savepoints".to_string(),
            ));
        }

        let tx = ctx
            .active_mut()
            .ok_or_else(|| TransactionError::illegal("no active transaction to nest in"))?;
        let name = tx.next_savepoint_name();
        resource.create_savepoint(&mut tx.connection, &name)?;
        tx.savepoints.push(Savepoint {
            name: name.clone(),
            rollback_only_before: tx.rollback_only.get(),
        });
        tx.depth += 1;
        debug!(tx = %tx.id, savepoint = %name, depth = tx.depth, "created nested transaction savepoint");

        let binding = tx.binding();
        Ok(self.new_status(ctx, definition, Some(binding), false, Some(name), false))
    }

    fn empty_scope(
        &self,
        ctx: &mut TransactionContext,
        definition: TransactionDefinition,
        resumes_suspended: bool,
    ) -> TransactionStatus {
        debug!(
            name = definition.display_name(),
            propagation = %definition.propagation,
            "running scope without transaction"
        );
        self.new_status(ctx, definition, None, false, None, resumes_suspended)
    }

    fn new_status(
        &self,
        ctx: &mut TransactionContext,
        definition: TransactionDefinition,
        binding: Option<Binding>,
        new_transaction: bool,
        savepoint: Option<String>,
        resumes_suspended: bool,
    ) -> TransactionStatus {
        let status = TransactionStatus {
            scope: ctx.next_scope_id(),
            context_id: ctx.id(),
            definition,
            binding,
            new_transaction,
            savepoint,
            resumes_suspended,
            local_rollback_only: false,
            completed: false,
            started_at: Utc::now(),
        };
        ctx.push_scope(&status);
        status
    }

    fn suspend(&self, ctx: &mut TransactionContext) {
        if let Some(tx_id) = ctx.suspend() {
            debug!(tx = %tx_id, "suspended transaction");
            self.inner.set_suspended(&tx_id, true);
        }
    }

    fn resume(&self, ctx: &mut TransactionContext) {
        if let Some(tx) = ctx.resume() {
            let tx_id = tx.id.clone();
            debug!(tx = %tx_id, "resuming suspended transaction");
            self.inner.set_suspended(&tx_id, false);
        }
    }

    // ==================== Completion ====================

    fn check_context(&self, ctx: &TransactionContext) -> TransactionResult<()> {
        if Arc::ptr_eq(ctx.manager(), &self.inner) {
            Ok(())
        } else {
            Err(TransactionError::illegal(
                "transaction context belongs to a different transaction manager",
            ))
        }
    }

    fn check_completable(
        &self,
        ctx: &TransactionContext,
        status: &TransactionStatus,
    ) -> TransactionResult<()> {
        self.check_context(ctx)?;

        if status.completed {
            return Err(TransactionError::illegal(
                "transaction is already completed - do not call commit or rollback more than once per transaction",
            ));
        }
        if status.context_id != ctx.id() {
            return Err(TransactionError::illegal(format!(
                "scope {} belongs to context {}, not context {}",
                status.scope,
                status.context_id,
                ctx.id()
            )));
        }
        if ctx.innermost_scope() != Some(status.scope) {
            return Err(TransactionError::illegal(format!(
                "scope {} is not the innermost open scope, complete inner scopes first",
                status.scope
            )));
        }
        Ok(())
    }

    fn process_commit(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
    ) -> TransactionResult<()> {
        let resource = &self.inner.resource;
        let mut outcome = Ok(());

        if let Some(name) = status.savepoint.as_deref() {
            if let Some(tx) = ctx.active_mut() {
                debug!(tx = %tx.id, savepoint = %name, "releasing transaction savepoint");
                outcome = resource
                    .release_savepoint(&mut tx.connection, name)
                    .map_err(TransactionError::from);
            }
        } else if status.new_transaction {
            if let Some(tx) = ctx.active_mut() {
                info!(tx = %tx.id, connection = %tx.connection.id(), "committing transaction");
                if let Err(e) = resource.physical_commit(&mut tx.connection) {
                    error!(tx = %tx.id, error = %e, "physical commit failed");
                    if self.inner.config.rollback_on_commit_failure {
                        if let Err(rb) = resource.physical_rollback(&mut tx.connection) {
                            error!(tx = %tx.id, error = %rb, "rollback after commit failure failed");
                        }
                    }
                    outcome = Err(e.into());
                }
            }
        } else if status.has_transaction() {
            debug!(
                scope = status.scope,
                "participating scope committed, outer scope decides on physical commit"
            );
        }

        self.cleanup_after_completion(ctx, status);
        outcome
    }

    fn process_rollback(
        &self,
        ctx: &mut TransactionContext,
        status: &mut TransactionStatus,
        unexpected: bool,
    ) -> TransactionResult<()> {
        let resource = &self.inner.resource;
        let config = &self.inner.config;
        let mut outcome = Ok(());

        if let Some(name) = status.savepoint.as_deref() {
            if let Some(tx) = ctx.active_mut() {
                debug!(tx = %tx.id, savepoint = %name, "rolling back transaction to savepoint");
                outcome = resource
                    .rollback_to_savepoint(&mut tx.connection, name)
                    .and_then(|_| resource.release_savepoint(&mut tx.connection, name))
                    .map_err(TransactionError::from);
                if outcome.is_ok() {
                    if let Some(savepoint) = tx.savepoints.last() {
                        tx.rollback_only.set(savepoint.rollback_only_before);
                    }
                }
            }
        } else if status.new_transaction {
            if let Some(tx) = ctx.active_mut() {
                info!(tx = %tx.id, connection = %tx.connection.id(), "rolling back transaction");
                outcome = resource
                    .physical_rollback(&mut tx.connection)
                    .map_err(TransactionError::from);
            }
        } else if status.has_transaction() {
            if let Some(tx) = ctx.active_mut() {
                if status.local_rollback_only || config.global_rollback_on_participation_failure {
                    debug!(
                        tx = %tx.id,
                        "participating transaction failed, marking existing transaction as rollback-only"
                    );
                    tx.rollback_only.set(true);
                } else {
                    debug!(
                        tx = %tx.id,
                        "participating transaction failed, letting transaction originator decide on rollback"
                    );
                }
            }
        } else {
            debug!(scope = status.scope, "scope has no transaction, nothing to roll back");
        }

        let tx_id = status.transaction_id().unwrap_or_default().to_string();
        self.cleanup_after_completion(ctx, status);
        outcome?;

        if unexpected
            && (status.new_transaction
                || status.has_savepoint()
                || config.fail_early_on_global_rollback_only)
        {
            warn!(tx = %tx_id, "commit requested but transaction was rolled back");
            return Err(TransactionError::UnexpectedRollback { tx_id });
        }
        Ok(())
    }

    fn cleanup_after_completion(&self, ctx: &mut TransactionContext, status: &mut TransactionStatus) {
        status.completed = true;
        ctx.pop_scope(status.scope);

        if status.new_transaction {
            if let Some(tx) = ctx.take_active() {
                self.inner.end(tx);
            }
        } else if status.has_transaction() {
            if let Some(tx) = ctx.active_mut() {
                tx.depth = tx.depth.saturating_sub(1);
                if status.has_savepoint() {
                    tx.savepoints.pop();
                }
            }
        }

        if status.resumes_suspended {
            self.resume(ctx);
        }
    }
}

impl std::fmt::Debug for TransactionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionManager")
            .field("active_count", &self.active_count())
            .field("config", &self.inner.config)
            .finish()
    }
}
