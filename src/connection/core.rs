use std::fmt;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::engine::{OpenFlags, RawConnection};
use crate::error::{Result, SqliteAccessError};
use crate::sync::{DriverGate, DriverPass};

use super::cache::StatementCache;
use super::tx::TransactionController;

static NEXT_CONNECTION_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of a [`ConnectionHandle`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(u64);

impl ConnectionId {
    fn next() -> Self {
        Self(NEXT_CONNECTION_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// One open native connection plus its statement cache and transaction bookkeeping.
///
/// A handle can be shared between threads whatever its
/// [`ThreadingMode`](crate::ThreadingMode): every call goes through an internal gate that
/// admits one thread at a time for the whole statement, so the error message and change
/// count a call reports are its own.
pub struct ConnectionHandle {
    pub(crate) id: ConnectionId,
    path: String,
    flags: OpenFlags,
    /// Pool that lent this handle out, if any.
    pub(crate) lender: Option<u64>,
    gate: DriverGate,
    pub(crate) cache: StatementCache,
    pub(crate) tx: TransactionController,
    // Declared last: cached statements are finalized before the connection closes.
    pub(crate) raw: RawConnection,
}

impl ConnectionHandle {
    /// Open a connection with the statement cache enabled.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Open`] with the engine's code and message. A partially
    /// opened native handle is closed before the error is returned.
    pub fn open(path: impl AsRef<Path>, flags: OpenFlags) -> Result<Self> {
        let path = path.as_ref().to_string_lossy().into_owned();
        let raw = RawConnection::open(&path, flags.to_raw()).map_err(|failure| {
            SqliteAccessError::Open {
                path: path.clone(),
                code: failure.code,
                message: failure.message,
            }
        })?;
        let id = ConnectionId::next();
        tracing::debug!(connection = %id, path = %path, ?flags, "connection opened");
        Ok(Self {
            id,
            path,
            flags,
            lender: None,
            gate: DriverGate::default(),
            cache: StatementCache::new(true),
            tx: TransactionController::default(),
            raw,
        })
    }

    /// Turn statement caching on or off; turning it off finalizes everything cached.
    #[must_use]
    pub fn with_statement_cache(mut self, enabled: bool) -> Self {
        self.cache.set_enabled(enabled);
        self
    }

    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    #[must_use]
    pub fn path(&self) -> &str {
        &self.path
    }

    #[must_use]
    pub fn flags(&self) -> OpenFlags {
        self.flags
    }

    #[must_use]
    pub fn caches_statements(&self) -> bool {
        self.cache.is_enabled()
    }

    /// Number of prepared statements currently parked in the cache.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Misuse`] if called while this thread holds the cache lock.
    pub fn cached_statement_count(&self) -> Result<usize> {
        self.cache.len()
    }

    /// Whether a prepared statement for exactly `sql` is parked in the cache.
    ///
    /// # Errors
    /// Same as [`cached_statement_count`](Self::cached_statement_count).
    pub fn is_statement_cached(&self, sql: &str) -> Result<bool> {
        self.cache.contains(sql)
    }

    /// Most statements the cache keeps; [`DEFAULT_STATEMENT_CACHE_CAPACITY`] unless changed.
    ///
    /// # Errors
    /// Same as [`cached_statement_count`](Self::cached_statement_count).
    ///
    /// [`DEFAULT_STATEMENT_CACHE_CAPACITY`]: crate::connection::DEFAULT_STATEMENT_CACHE_CAPACITY
    pub fn statement_cache_capacity(&self) -> Result<usize> {
        self.cache.capacity()
    }

    /// Bound the cache to `capacity` statements. Beyond it, the statement returned least
    /// recently is finalized. Key the cache with fixed SQL texts and bind the varying parts.
    ///
    /// # Errors
    /// Same as [`cached_statement_count`](Self::cached_statement_count).
    pub fn set_statement_cache_capacity(&self, capacity: usize) -> Result<()> {
        let _pass = self.drive();
        self.cache.set_capacity(capacity)
    }

    /// Rowid of the most recent successful insert on this connection.
    pub fn last_insert_rowid(&self) -> i64 {
        let _pass = self.drive();
        self.raw.last_insert_rowid()
    }

    /// Rows changed by the most recent INSERT, UPDATE or DELETE.
    pub fn changes(&self) -> u64 {
        let _pass = self.drive();
        self.raw.changes()
    }

    /// Most recent engine error code on this connection.
    pub fn last_error_code(&self) -> i32 {
        let _pass = self.drive();
        self.raw.last_error_code()
    }

    /// Admit the calling thread to drive the native handle.
    pub(crate) fn drive(&self) -> DriverPass<'_> {
        self.gate.enter()
    }
}

impl fmt::Debug for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionHandle")
            .field("id", &self.id)
            .field("path", &self.path)
            .field("flags", &self.flags)
            .field("caches_statements", &self.cache.is_enabled())
            .finish_non_exhaustive()
    }
}

impl Drop for ConnectionHandle {
    fn drop(&mut self) {
        if let Err(err) = self.cache.clear() {
            tracing::warn!(connection = %self.id, error = %err, "failed to clear statement cache");
        }
        tracing::debug!(connection = %self.id, path = %self.path, "connection closed");
    }
}
