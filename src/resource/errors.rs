//! Resource layer error types
//!
//! Errors raised by a `ResourceConnection` implementation. The transaction
//! manager never inspects these beyond classifying them; it wraps them into
//! `TransactionError` variants.

use thiserror::Error;

use crate::resource::connection::ConnectionId;

/// the main error type for physical resource operations
#[derive(Debug, Error)]
pub enum ResourceError {
    /// every connection is currently held by a physical transaction
    #[error("connection pool exhausted: all {max} connections are in use")]
    PoolExhausted { max: usize },

    /// the connection was not handed out by this resource (or already released)
    #[error("connection {0} is not held from this resource")]
    UnknownConnection(ConnectionId),

    /// the underlying begin/commit/rollback failed
    #[error("physical {operation} failed on connection {connection}: {reason}")]
    Physical {
        operation: &'static str,
        connection: ConnectionId,
        reason: String,
    },

    /// the connection has no open physical transaction
    #[error("connection {0} has no transaction in progress")]
    NoTransaction(ConnectionId),

    /// savepoints are not available on this resource
    #[error("savepoints are not supported by this resource")]
    SavepointNotSupported,

    /// the named savepoint does not exist on the connection
    #[error("savepoint {name} not found on connection {connection}")]
    SavepointNotFound {
        connection: ConnectionId,
        name: String,
    },
}

impl ResourceError {
    /// check if the failure is due to temporary unavailability
    pub fn is_unavailable(&self) -> bool {
        matches!(self, ResourceError::PoolExhausted { .. })
    }

    pub(crate) fn physical(
        operation: &'static str,
        connection: ConnectionId,
        reason: impl Into<String>,
    ) -> Self {
        ResourceError::Physical {
            operation,
            connection,
            reason: reason.into(),
        }
    }
}

/// result type alias for resource operations
pub type ResourceResult<T> = Result<T, ResourceError>;
