//! Resource layer for txscope
//!
//! The transaction manager drives physical transactions through the
//! `ResourceConnection` trait and never touches a concrete backend directly.
//! `ConnectionPool` is the bundled in-memory implementation.
//!
//! # Usage
//!
//! ```
//! use txscope::resource::{ConnectionPool, ResourceConnection};
//!
//! let pool = ConnectionPool::new(4);
//! let mut conn = pool.acquire().unwrap();
//! pool.physical_begin(&mut conn, false).unwrap();
//! pool.physical_commit(&mut conn).unwrap();
//! pool.release(conn);
//!
//! assert_eq!(pool.commit_count(), 1);
//! ```

mod connection;
mod errors;
mod pool;

pub use connection::{Connection, ConnectionId, ResourceConnection};
pub use errors::{ResourceError, ResourceResult};
pub use pool::{ConnectionPool, PoolStats, ResourceEvent, DEFAULT_MAX_CONNECTIONS};
