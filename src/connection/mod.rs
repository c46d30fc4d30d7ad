mod cache;
mod core;
mod execute;
mod tx;

pub use cache::DEFAULT_STATEMENT_CACHE_CAPACITY;
pub use core::{ConnectionHandle, ConnectionId};
pub use tx::{RollbackRequest, TransactionMode};
