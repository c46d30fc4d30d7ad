//! Thread-safe access to a single `SQLite` database file.
//!
//! - [`ConnectionPool`] lends read-only connections from a free set and funnels every write
//!   through one [`SerialAccessQueue`], switching the write connection into the configured
//!   journal mode (WAL by default) the first time it is used.
//! - [`ConnectionHandle`] caches prepared statements per SQL text and tracks explicit
//!   transactions so nested `begin` calls never reach the engine twice.
//! - [`AsyncConnectionPool`] exposes the same operations to tokio tasks.
//!
//! ```rust,no_run
//! use sqlite_access::prelude::*;
//!
//! # fn main() -> Result<(), SqliteAccessError> {
//! let pool = ConnectionPool::builder("app.db").build()?;
//! pool.with_write_transaction_default(|conn, _rollback| {
//!     conn.execute_batch("CREATE TABLE IF NOT EXISTS notes (body TEXT)")?;
//!     conn.execute("INSERT INTO notes (body) VALUES (?1)", &[Value::from("hi")])
//! })?;
//! let notes = pool.with_read(|conn| conn.query_rows("SELECT body FROM notes", &[]))?;
//! # let _ = notes;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod connection;
mod engine;
pub mod error;
pub mod nonblocking;
pub mod pool;
pub mod prelude;
pub mod queue;
pub mod sync;
pub mod types;

pub use config::{JournalMode, PoolOptions, PoolOptionsBuilder};
pub use connection::{
    ConnectionHandle, ConnectionId, DEFAULT_STATEMENT_CACHE_CAPACITY, RollbackRequest,
    TransactionMode,
};
pub use engine::{AccessMode, OpenFlags, ThreadingMode};
pub use error::{Result, SqliteAccessError, TransactionPhase};
pub use nonblocking::AsyncConnectionPool;
pub use pool::ConnectionPool;
pub use queue::SerialAccessQueue;
pub use types::{Row, Value};
