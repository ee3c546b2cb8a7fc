//! In-memory connection pool.
//!
//! A bounded pool of logical connections implementing `ResourceConnection`.
//! It executes no data operations; it records every physical step in a
//! journal so the effect of the transaction manager can be observed.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, trace};

use super::connection::{Connection, ConnectionId, ResourceConnection};
use super::errors::{ResourceError, ResourceResult};

/// Default pool size.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// A physical step performed on a pooled connection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ResourceEvent {
    Acquired { connection: ConnectionId },
    Began { connection: ConnectionId, read_only: bool },
    Committed { connection: ConnectionId },
    RolledBack { connection: ConnectionId },
    SavepointCreated { connection: ConnectionId, name: String },
    RolledBackToSavepoint { connection: ConnectionId, name: String },
    SavepointReleased { connection: ConnectionId, name: String },
    Released { connection: ConnectionId },
}

impl ResourceEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            ResourceEvent::Acquired { connection }
            | ResourceEvent::Began { connection, .. }
            | ResourceEvent::Committed { connection }
            | ResourceEvent::RolledBack { connection }
            | ResourceEvent::SavepointCreated { connection, .. }
            | ResourceEvent::RolledBackToSavepoint { connection, .. }
            | ResourceEvent::SavepointReleased { connection, .. }
            | ResourceEvent::Released { connection } => *connection,
        }
    }
}

/// Pool counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct PoolStats {
    /// Connections created so far.
    pub created: usize,
    /// Connections idle in the pool.
    pub available: usize,
    /// Connections held by transactions.
    pub in_use: usize,
    /// Physical commits executed.
    pub commits: usize,
    /// Physical rollbacks executed.
    pub rollbacks: usize,
}

#[derive(Debug, Default)]
struct Faults {
    fail_next_begin: bool,
    fail_next_commit: bool,
    fail_next_rollback: bool,
}

struct PoolInner {
    max_connections: usize,
    savepoints_enabled: bool,
    available: Mutex<VecDeque<ConnectionId>>,
    created: Mutex<usize>,
    in_use: Mutex<HashSet<ConnectionId>>,
    savepoints: Mutex<HashMap<ConnectionId, Vec<String>>>,
    events: Mutex<Vec<ResourceEvent>>,
    faults: Mutex<Faults>,
}

/// Bounded in-memory connection pool.
///
/// Cheap to clone; clones share the same connections and journal.
#[derive(Clone)]
pub struct ConnectionPool {
    inner: Arc<PoolInner>,
}

impl ConnectionPool {
    /// Create a pool that hands out at most `max_connections` at a time.
    pub fn new(max_connections: usize) -> Self {
        Self::build(max_connections, true)
    }

    /// Create a pool whose connections reject savepoint operations.
    pub fn without_savepoints(max_connections: usize) -> Self {
        Self::build(max_connections, false)
    }

    fn build(max_connections: usize, savepoints_enabled: bool) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                max_connections,
                savepoints_enabled,
                available: Mutex::new(VecDeque::new()),
                created: Mutex::new(0),
                in_use: Mutex::new(HashSet::new()),
                savepoints: Mutex::new(HashMap::new()),
                events: Mutex::new(Vec::new()),
                faults: Mutex::new(Faults::default()),
            }),
        }
    }

    pub fn max_connections(&self) -> usize {
        self.inner.max_connections
    }

    /// Number of connections created so far.
    pub fn created(&self) -> usize {
        *self.inner.created.lock()
    }

    /// Number of idle connections.
    pub fn available(&self) -> usize {
        self.inner.available.lock().len()
    }

    /// Number of connections held by transactions.
    pub fn in_use(&self) -> usize {
        self.inner.in_use.lock().len()
    }

    /// Snapshot of the event journal.
    pub fn events(&self) -> Vec<ResourceEvent> {
        self.inner.events.lock().clone()
    }

    /// Journal entries after the first `seen` ones.
    ///
    /// A cursor for readers that poll the journal without draining it.
    pub fn events_since(&self, seen: usize) -> Vec<ResourceEvent> {
        self.inner
            .events
            .lock()
            .get(seen..)
            .map(<[ResourceEvent]>::to_vec)
            .unwrap_or_default()
    }

    /// Drain the event journal.
    pub fn take_events(&self) -> Vec<ResourceEvent> {
        std::mem::take(&mut *self.inner.events.lock())
    }

    pub fn commit_count(&self) -> usize {
        self.count(|e| matches!(e, ResourceEvent::Committed { .. }))
    }

    pub fn rollback_count(&self) -> usize {
        self.count(|e| matches!(e, ResourceEvent::RolledBack { .. }))
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            created: self.created(),
            available: self.available(),
            in_use: self.in_use(),
            commits: self.commit_count(),
            rollbacks: self.rollback_count(),
        }
    }

    /// Make the next `physical_begin` fail.
    pub fn fail_next_begin(&self) {
        self.inner.faults.lock().fail_next_begin = true;
    }

    /// Make the next `physical_commit` fail.
    pub fn fail_next_commit(&self) {
        self.inner.faults.lock().fail_next_commit = true;
    }

    /// Make the next `physical_rollback` fail.
    pub fn fail_next_rollback(&self) {
        self.inner.faults.lock().fail_next_rollback = true;
    }

    fn count(&self, pred: impl Fn(&ResourceEvent) -> bool) -> usize {
        self.inner.events.lock().iter().filter(|e| pred(e)).count()
    }

    fn record(&self, event: ResourceEvent) {
        trace!(?event, "resource event");
        self.inner.events.lock().push(event);
    }

    fn check_held(&self, conn: &Connection) -> ResourceResult<()> {
        if self.inner.in_use.lock().contains(&conn.id()) {
            Ok(())
        } else {
            Err(ResourceError::UnknownConnection(conn.id()))
        }
    }

    fn check_in_transaction(&self, conn: &Connection) -> ResourceResult<()> {
        self.check_held(conn)?;
        if conn.in_transaction() {
            Ok(())
        } else {
            Err(ResourceError::NoTransaction(conn.id()))
        }
    }

    fn check_savepoints(&self) -> ResourceResult<()> {
        if self.inner.savepoints_enabled {
            Ok(())
        } else {
            Err(ResourceError::SavepointNotSupported)
        }
    }
}

impl Default for ConnectionPool {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_CONNECTIONS)
    }
}

impl ResourceConnection for ConnectionPool {
    fn acquire(&self) -> ResourceResult<Connection> {
        // Try to reuse an idle connection.
        let reused = self.inner.available.lock().pop_front();
        let id = match reused {
            Some(id) => id,
            None => {
                // Create a new connection if under limit.
                let mut created = self.inner.created.lock();
                if *created >= self.inner.max_connections {
                    return Err(ResourceError::PoolExhausted {
                        max: self.inner.max_connections,
                    });
                }
                *created += 1;
                ConnectionId::new(*created as u64)
            }
        };

        self.inner.in_use.lock().insert(id);
        debug!(connection = %id, "acquired connection");
        self.record(ResourceEvent::Acquired { connection: id });
        Ok(Connection::new(id))
    }

    fn physical_begin(&self, conn: &mut Connection, read_only: bool) -> ResourceResult<()> {
        self.check_held(conn)?;
        if std::mem::take(&mut self.inner.faults.lock().fail_next_begin) {
            return Err(ResourceError::physical("begin", conn.id(), "injected failure"));
        }
        if conn.in_transaction() {
            return Err(ResourceError::physical(
                "begin",
                conn.id(),
                "a transaction is already in progress",
            ));
        }
        conn.mark_begun(read_only);
        self.record(ResourceEvent::Began {
            connection: conn.id(),
            read_only,
        });
        Ok(())
    }

    fn physical_commit(&self, conn: &mut Connection) -> ResourceResult<()> {
        self.check_in_transaction(conn)?;
        if std::mem::take(&mut self.inner.faults.lock().fail_next_commit) {
            return Err(ResourceError::physical("commit", conn.id(), "injected failure"));
        }
        conn.mark_ended();
        self.inner.savepoints.lock().remove(&conn.id());
        self.record(ResourceEvent::Committed {
            connection: conn.id(),
        });
        Ok(())
    }

    fn physical_rollback(&self, conn: &mut Connection) -> ResourceResult<()> {
        self.check_in_transaction(conn)?;
        if std::mem::take(&mut self.inner.faults.lock().fail_next_rollback) {
            return Err(ResourceError::physical("rollback", conn.id(), "injected failure"));
        }
        conn.mark_ended();
        self.inner.savepoints.lock().remove(&conn.id());
        self.record(ResourceEvent::RolledBack {
            connection: conn.id(),
        });
        Ok(())
    }

    fn release(&self, conn: Connection) {
        let id = conn.id();
        if !self.inner.in_use.lock().remove(&id) {
            return;
        }
        self.inner.savepoints.lock().remove(&id);
        // Return connection to pool.
        self.inner.available.lock().push_back(id);
        debug!(connection = %id, "released connection");
        self.record(ResourceEvent::Released { connection: id });
    }

    fn supports_savepoints(&self) -> bool {
        self.inner.savepoints_enabled
    }

    fn create_savepoint(&self, conn: &mut Connection, name: &str) -> ResourceResult<()> {
        self.check_savepoints()?;
        self.check_in_transaction(conn)?;
        self.inner
            .savepoints
            .lock()
            .entry(conn.id())
            .or_default()
            .push(name.to_string());
        self.record(ResourceEvent::SavepointCreated {
            connection: conn.id(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn rollback_to_savepoint(&self, conn: &mut Connection, name: &str) -> ResourceResult<()> {
        self.check_savepoints()?;
        self.check_in_transaction(conn)?;
        {
            let mut savepoints = self.inner.savepoints.lock();
            let stack = savepoints.entry(conn.id()).or_default();
            let pos = stack.iter().rposition(|s| s == name).ok_or_else(|| {
                ResourceError::SavepointNotFound {
                    connection: conn.id(),
                    name: name.to_string(),
                }
            })?;
            // Savepoints created after this one are discarded; this one stays.
            stack.truncate(pos + 1);
        }
        self.record(ResourceEvent::RolledBackToSavepoint {
            connection: conn.id(),
            name: name.to_string(),
        });
        Ok(())
    }

    fn release_savepoint(&self, conn: &mut Connection, name: &str) -> ResourceResult<()> {
        self.check_savepoints()?;
        self.check_in_transaction(conn)?;
        {
            let mut savepoints = self.inner.savepoints.lock();
            let stack = savepoints.entry(conn.id()).or_default();
            let pos = stack.iter().rposition(|s| s == name).ok_or_else(|| {
                ResourceError::SavepointNotFound {
                    connection: conn.id(),
                    name: name.to_string(),
                }
            })?;
            stack.truncate(pos);
        }
        self.record(ResourceEvent::SavepointReleased {
            connection: conn.id(),
            name: name.to_string(),
        });
        Ok(())
    }
}

impl std::fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("max_connections", &self.inner.max_connections)
            .field("created", &self.created())
            .field("in_use", &self.in_use())
            .finish()
    }
}
