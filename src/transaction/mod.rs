//! Transaction management for txscope.
//!
//! This module implements propagation-aware transaction scopes on top of a
//! `ResourceConnection`. Each logical scope either starts a physical
//! transaction, joins the active one, suspends it in favour of an
//! independent one, or opens a savepoint in it.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionManager                        │
//! │  (Resolves propagation, commits/rolls back, tracks tx)      │
//! └─────────────────────────────────────────────────────────────┘
//!                              │
//!        ┌─────────────────────┼─────────────────────┐
//!        │                     │                     │
//!        ▼                     ▼                     ▼
//!  ┌─────────────┐       ┌─────────────┐       ┌─────────────┐
//!  │ Transaction │       │ Transaction │       │  Resource   │
//!  │   Context   │       │   Status    │       │ Connection  │
//!  └─────────────┘       └─────────────┘       └─────────────┘
//! ```
//!
//! # Usage
//!
//! ```
//! use txscope::resource::ConnectionPool;
//! use txscope::transaction::{Propagation, TransactionManager};
//!
//! let pool = ConnectionPool::new(4);
//! let manager = TransactionManager::new(pool.clone());
//! let mut ctx = manager.new_context();
//!
//! let mut outer = manager.begin(&mut ctx, Propagation::Required).unwrap();
//! let mut inner = manager.begin(&mut ctx, Propagation::Required).unwrap();
//! assert!(!inner.is_new_transaction());
//!
//! // The inner scope fails: the shared transaction becomes rollback-only.
//! manager.rollback(&mut ctx, &mut inner).unwrap();
//!
//! let err = manager.commit(&mut ctx, &mut outer).unwrap_err();
//! assert!(err.is_unexpected_rollback());
//! assert_eq!(pool.rollback_count(), 1);
//! ```

mod context;
mod definition;
mod error;
mod manager;
mod propagation;
mod status;
mod template;

pub use context::TransactionContext;
pub use definition::TransactionDefinition;
pub use error::{TransactionError, TransactionResult};
pub use manager::{TransactionInfo, TransactionManager};
pub use propagation::Propagation;
pub use status::{ScopeId, TransactionStatus};
pub use template::{
    Failure, FailureKind, RollbackPolicy, TemplateError, TransactionAttribute, TransactionTemplate,
};
