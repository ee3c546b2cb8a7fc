//! txscope - propagation-aware transaction scopes
//!
//! This crate layers logical transaction scopes over a physical resource
//! connection. A scope declares how it relates to a transaction that may
//! already be running (`REQUIRED`, `REQUIRES_NEW`, `NESTED`, ...) and the
//! manager decides whether to start, join, suspend or savepoint.
//!
//! # Example
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
//! let mut inner = manager.begin(&mut ctx, Propagation::RequiresNew).unwrap();
//! manager.rollback(&mut ctx, &mut inner).unwrap();
//! manager.commit(&mut ctx, &mut outer).unwrap();
//!
//! assert_eq!(pool.commit_count(), 1);
//! assert_eq!(pool.rollback_count(), 1);
//! ```

pub mod config;
pub mod resource;
pub mod shell;
pub mod transaction;
