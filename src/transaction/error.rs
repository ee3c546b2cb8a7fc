//! Transaction error types.

use thiserror::Error;

use crate::resource::ResourceError;

/// Result type for transaction operations.
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors that can occur during transaction operations.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// No connection could be acquired (or begun) for a new physical
    /// transaction.
    #[error("could not acquire a connection for a new transaction: {0}")]
    ResourceAcquisition(#[source] ResourceError),

    /// A terminal operation was invoked on a completed status, scopes were
    /// completed out of order, or a propagation rule was violated.
    #[error("illegal transaction state: {0}")]
    IllegalTransactionState(String),

    /// Commit was requested but the transaction was rolled back because it
    /// had been marked rollback-only.
    #[error("transaction {tx_id} rolled back because it has been marked as rollback-only")]
    UnexpectedRollback { tx_id: String },

    /// A savepoint scope was requested but cannot be provided.
    #[error("nested transaction not supported: {0}")]
    NestedTransactionNotSupported(String),

    /// A physical commit, rollback or savepoint operation failed.
    #[error("physical transaction failure: {0}")]
    TransactionSystem(#[from] ResourceError),
}

impl TransactionError {
    /// Check if the caller may retry the operation.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TransactionError::ResourceAcquisition(e) if e.is_unavailable())
    }

    /// Check if this error reports a commit turned into a rollback.
    pub fn is_unexpected_rollback(&self) -> bool {
        matches!(self, TransactionError::UnexpectedRollback { .. })
    }

    /// Check if this error reports API misuse.
    pub fn is_illegal_state(&self) -> bool {
        matches!(self, TransactionError::IllegalTransactionState(_))
    }

    pub(crate) fn illegal(message: impl Into<String>) -> Self {
        TransactionError::IllegalTransactionState(message.into())
    }
}
