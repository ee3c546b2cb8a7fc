//! Declarative transaction boundaries.
//!
//! `TransactionTemplate` runs a unit of work inside a scope and completes the
//! scope from the work's outcome:
//! - `Ok` commits;
//! - `Err` rolls back or commits depending on the failure's classification
//!   and the attribute's `RollbackPolicy`;
//! - a panic rolls back and keeps unwinding.
//!
//! ```
//! use txscope::resource::ConnectionPool;
//! use txscope::transaction::{
//!     Failure, FailureKind, Propagation, TransactionAttribute, TransactionManager,
//!     TransactionTemplate,
//! };
//!
//! #[derive(Debug)]
//! struct OutOfStock;
//!
//! impl Failure for OutOfStock {
//!     fn kind(&self) -> FailureKind {
//!         FailureKind::Checked
//!     }
//! }
//!
//! let pool = ConnectionPool::new(2);
//! let manager = TransactionManager::new(pool.clone());
//! let mut ctx = manager.new_context();
//!
//! let attribute = TransactionAttribute::new(Propagation::Required).rollback_for::<OutOfStock>();
//! let template = TransactionTemplate::new(manager.clone(), attribute);
//!
//! let result: Result<(), _> = template.execute(&mut ctx, |_ctx, _status| Err(OutOfStock));
//! assert!(result.is_err());
//! assert_eq!(pool.rollback_count(), 1);
//! ```

use std::collections::BTreeSet;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, error, warn};

use crate::transaction::context::TransactionContext;
use crate::transaction::definition::TransactionDefinition;
use crate::transaction::error::TransactionError;
use crate::transaction::manager::TransactionManager;
use crate::transaction::propagation::Propagation;
use crate::transaction::status::TransactionStatus;

/// How a failure is classified by default.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Unexpected failure: rolls back unless a rule says otherwise.
    Unchecked,
    /// Anticipated business outcome: commits unless a rule says otherwise.
    Checked,
}

/// A failure returned by a unit of work run through `TransactionTemplate`.
pub trait Failure: fmt::Debug {
    /// Default classification of this failure.
    fn kind(&self) -> FailureKind;

    /// Short name matched against rules added with `rollback_for_class` /
    /// `no_rollback_for_class`.
    ///
    /// Defaults to the unqualified type name, so same-named types from
    /// different modules share these rules. Rules added with
    /// `rollback_for::<F>()` match on `type_path` instead.
    fn class_name(&self) -> &str {
        short_type_name::<Self>()
    }

    /// Fully qualified type name, matched against rules added by type.
    fn type_path(&self) -> &str {
        std::any::type_name::<Self>()
    }
}

impl Failure for TransactionError {
    fn kind(&self) -> FailureKind {
        FailureKind::Unchecked
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Rules that override the default commit/rollback decision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RollbackPolicy {
    /// Failure classes that always roll back.
    pub rollback_for: BTreeSet<String>,
    /// Failure classes that always commit.
    pub no_rollback_for: BTreeSet<String>,
}

impl RollbackPolicy {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decide whether `failure` rolls the scope back.
    ///
    /// `rollback_for` wins over `no_rollback_for`, both win over the
    /// failure's kind.
    pub fn rollback_on<F: Failure + ?Sized>(&self, failure: &F) -> bool {
        let matches = |rules: &BTreeSet<String>| {
            rules.contains(failure.type_path()) || rules.contains(failure.class_name())
        };
        if matches(&self.rollback_for) {
            return true;
        }
        if matches(&self.no_rollback_for) {
            return false;
        }
        failure.kind() == FailureKind::Unchecked
    }
}

/// A definition plus the rollback policy for declarative boundaries.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransactionAttribute {
    pub definition: TransactionDefinition,
    pub policy: RollbackPolicy,
}

impl TransactionAttribute {
    pub fn new(definition: impl Into<TransactionDefinition>) -> Self {
        Self {
            definition: definition.into(),
            policy: RollbackPolicy::default(),
        }
    }

    /// Always roll back on failures of type `F`.
    pub fn rollback_for<F: Failure>(mut self) -> Self {
        self.policy.rollback_for.insert(std::any::type_name::<F>().to_string());
        self
    }

    /// Always roll back on failures with the given `class_name`.
    pub fn rollback_for_class(mut self, class: impl Into<String>) -> Self {
        self.policy.rollback_for.insert(class.into());
        self
    }

    /// Always commit on failures of type `F`.
    pub fn no_rollback_for<F: Failure>(mut self) -> Self {
        self.policy.no_rollback_for.insert(std::any::type_name::<F>().to_string());
        self
    }

    /// Always commit on failures with the given `class_name`.
    pub fn no_rollback_for_class(mut self, class: impl Into<String>) -> Self {
        self.policy.no_rollback_for.insert(class.into());
        self
    }
}

/// Error returned from `TransactionTemplate::execute`.
#[derive(Debug, Error)]
pub enum TemplateError<E: fmt::Debug> {
    /// The unit of work failed; the scope was completed per the policy.
    #[error("unit of work failed: {0:?}")]
    Failed(E),

    /// Opening or completing the scope failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
}

impl<E: fmt::Debug> TemplateError<E> {
    /// The work's own failure, if that is what this error carries.
    pub fn failure(&self) -> Option<&E> {
        match self {
            TemplateError::Failed(e) => Some(e),
            TemplateError::Transaction(_) => None,
        }
    }
}

/// Runs units of work inside transaction scopes.
#[derive(Debug, Clone)]
pub struct TransactionTemplate {
    manager: TransactionManager,
    attribute: TransactionAttribute,
}

impl TransactionTemplate {
    pub fn new(manager: TransactionManager, attribute: TransactionAttribute) -> Self {
        Self { manager, attribute }
    }

    /// Run `work` inside a new scope and complete the scope from its outcome.
    ///
    /// The work receives the context, to open inner scopes, and the scope's
    /// status, to mark it rollback-only. It must not complete the status.
    /// Inner scopes it leaves open, on return or on panic, are rolled back
    /// before this scope completes; a joined one makes the commit fail with
    /// `UnexpectedRollback`.
    pub fn execute<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        work: F,
    ) -> Result<T, TemplateError<E>>
    where
        E: Failure,
        F: FnOnce(&mut TransactionContext, &mut TransactionStatus) -> Result<T, E>,
    {
        let manager = &self.manager;
        let mut status = manager.begin(ctx, self.attribute.definition.clone())?;
        let scope = status.scope_id();

        let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(&mut *ctx, &mut status)));

        // Inner scopes the work left open would otherwise keep this scope
        // from completing.
        match manager.unwind_to(ctx, scope) {
            Ok(0) => {}
            Ok(closed) => warn!(closed, "unit of work left inner scopes open, rolled them back"),
            Err(e) => error!(error = %e, "rolling back inner scopes left open failed"),
        }

        match outcome {
            Ok(Ok(value)) => {
                manager.commit(ctx, &mut status)?;
                Ok(value)
            }
            Ok(Err(failure)) => {
                if self.attribute.policy.rollback_on(&failure) {
                    debug!(class = failure.class_name(), "rolling back after failure");
                    if let Err(e) = manager.rollback(ctx, &mut status) {
                        error!(?failure, "failure overridden by rollback error");
                        return Err(e.into());
                    }
                } else {
                    debug!(class = failure.class_name(), "committing despite failure");
                    if let Err(e) = manager.commit(ctx, &mut status) {
                        error!(?failure, "failure overridden by commit error");
                        return Err(e.into());
                    }
                }
                Err(TemplateError::Failed(failure))
            }
            Err(payload) => {
                debug!("rolling back after panic in unit of work");
                if let Err(e) = manager.rollback(ctx, &mut status) {
                    error!(error = %e, "rollback after panic failed");
                }
                panic::resume_unwind(payload)
            }
        }
    }
}

impl TransactionManager {
    /// Run `work` in a `REQUIRED` scope with the default rollback policy.
    pub fn with_transaction<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        work: F,
    ) -> Result<T, TemplateError<E>>
    where
        E: Failure,
        F: FnOnce(&mut TransactionContext, &mut TransactionStatus) -> Result<T, E>,
    {
        self.with_transaction_attribute(ctx, TransactionAttribute::new(Propagation::Required), work)
    }

    /// Run `work` with a specific attribute.
    pub fn with_transaction_attribute<T, E, F>(
        &self,
        ctx: &mut TransactionContext,
        attribute: TransactionAttribute,
        work: F,
    ) -> Result<T, TemplateError<E>>
    where
        E: Failure,
        F: FnOnce(&mut TransactionContext, &mut TransactionStatus) -> Result<T, E>,
    {
        TransactionTemplate::new(self.clone(), attribute).execute(ctx, work)
    }
}
