//! Convenient imports for common functionality.

pub use crate::config::{JournalMode, PoolOptions, PoolOptionsBuilder};
pub use crate::connection::{ConnectionHandle, RollbackRequest, TransactionMode};
pub use crate::engine::OpenFlags;
pub use crate::error::SqliteAccessError;
pub use crate::nonblocking::AsyncConnectionPool;
pub use crate::pool::ConnectionPool;
pub use crate::queue::SerialAccessQueue;
pub use crate::types::{Row, Value};
