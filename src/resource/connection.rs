//! The resource capability consumed by the transaction manager.
//!
//! A `ResourceConnection` hands out `Connection` handles and executes the
//! physical transaction operations against them. The manager never performs
//! data operations through it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::resource::errors::{ResourceError, ResourceResult};

/// Identifier of a physical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// A connection handle acquired from a `ResourceConnection`.
///
/// Not `Clone`: a handle is owned by exactly one physical transaction from
/// acquisition until it is given back through `release`.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    in_transaction: bool,
    read_only: bool,
}

impl Connection {
    /// Create a handle for a freshly acquired connection.
    pub fn new(id: ConnectionId) -> Self {
        Self {
            id,
            in_transaction: false,
            read_only: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Whether a physical transaction is open on this connection.
    pub fn in_transaction(&self) -> bool {
        self.in_transaction
    }

    pub fn is_read_only(&self) -> bool {
        self.read_only
    }

    /// Record that a physical transaction was started.
    pub fn mark_begun(&mut self, read_only: bool) {
        self.in_transaction = true;
        self.read_only = read_only;
    }

    /// Record that the physical transaction ended.
    pub fn mark_ended(&mut self) {
        self.in_transaction = false;
        self.read_only = false;
    }
}

/// The physical resource capability.
///
/// Implementations must be shareable across threads; the connections they
/// hand out are not, and are only ever touched by the execution unit that
/// holds the owning transaction.
pub trait ResourceConnection: Send + Sync {
    /// Acquire a connection for a new physical transaction.
    fn acquire(&self) -> ResourceResult<Connection>;

    /// Start a physical transaction on the connection.
    fn physical_begin(&self, conn: &mut Connection, read_only: bool) -> ResourceResult<()>;

    /// Commit the physical transaction.
    fn physical_commit(&self, conn: &mut Connection) -> ResourceResult<()>;

    /// Roll back the physical transaction.
    fn physical_rollback(&self, conn: &mut Connection) -> ResourceResult<()>;

    /// Give the connection back.
    fn release(&self, conn: Connection);

    /// Whether `create_savepoint` and friends are implemented.
    fn supports_savepoints(&self) -> bool {
        false
    }

    fn create_savepoint(&self, _conn: &mut Connection, _name: &str) -> ResourceResult<()> {
        Err(ResourceError::SavepointNotSupported)
    }

    fn rollback_to_savepoint(&self, _conn: &mut Connection, _name: &str) -> ResourceResult<()> {
        Err(ResourceError::SavepointNotSupported)
    }

    fn release_savepoint(&self, _conn: &mut Connection, _name: &str) -> ResourceResult<()> {
        Err(ResourceError::SavepointNotSupported)
    }
}
