//! Interactive shell for driving a transaction context by hand.
//!
//! A `Session` owns one `TransactionContext` over the bundled in-memory pool
//! and executes text statements (`BEGIN`, `COMMIT`, ...); `Repl` wraps it in
//! a read-eval-print loop.

mod repl;
mod session;

use thiserror::Error;

use crate::transaction::TransactionError;

pub use repl::{Repl, ReplConfig};
pub use session::{Session, Statement};

/// Result type for shell operations.
pub type ShellResult<T> = Result<T, ShellError>;

/// Shell errors.
#[derive(Debug, Error)]
pub enum ShellError {
    #[error("transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("no open transaction scope")]
    NoOpenScope,

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
