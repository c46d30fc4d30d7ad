//! Read connections are lent from a free set and used directly by the borrowing thread.
//! All writes go through a single [`SerialAccessQueue`] created on first use.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::config::{JournalMode, PoolOptions, PoolOptionsBuilder};
use crate::connection::{ConnectionHandle, RollbackRequest, TransactionMode};
use crate::engine::OpenFlags;
use crate::error::{Result, SqliteAccessError};
use crate::queue::SerialAccessQueue;
use crate::sync::Mutex;

static NEXT_POOL_ID: AtomicU64 = AtomicU64::new(1);

/// Many read-only connections, one serialized writer.
///
/// Share it between threads with an [`Arc`]; write work items are `'static` because they run
/// on the writer's worker thread.
pub struct ConnectionPool {
    id: u64,
    options: PoolOptions,
    free: Mutex<Vec<ConnectionHandle>>,
    writer: Mutex<Option<Arc<SerialAccessQueue>>>,
}

impl ConnectionPool {
    /// Create a pool. Connections are opened on demand.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::ConfigError`] if `options` are invalid.
    pub fn new(options: PoolOptions) -> Result<Self> {
        options.validate()?;
        Ok(Self {
            id: NEXT_POOL_ID.fetch_add(1, Ordering::Relaxed),
            options,
            free: Mutex::new(Vec::new()),
            writer: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn builder(path: impl Into<String>) -> PoolOptionsBuilder {
        PoolOptionsBuilder::new(path)
    }

    #[must_use]
    pub fn options(&self) -> &PoolOptions {
        &self.options
    }

    /// Lend a read-only connection, reusing an idle one when available.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Open`] when a new connection has to be opened and cannot be.
    pub fn acquire_read_connection(&self) -> Result<ConnectionHandle> {
        if let Some(handle) = self.free.protect(Vec::pop)? {
            tracing::trace!(connection = %handle.id(), "reusing idle read connection");
            return Ok(handle);
        }
        let mut handle = ConnectionHandle::open(&self.options.path, OpenFlags::read_only())?
            .with_statement_cache(self.options.cache_statements);
        handle.set_statement_cache_capacity(self.options.statement_cache_capacity)?;
        handle.lender = Some(self.id);
        Ok(handle)
    }

    /// Return a connection obtained from [`acquire_read_connection`](Self::acquire_read_connection).
    ///
    /// A transaction left open on it is rolled back first; if that fails the connection is
    /// closed instead of pooled. Connections beyond `max_idle_read_connections` are closed.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Misuse`] for a handle this pool did not lend.
    pub fn release_read_connection(&self, handle: ConnectionHandle) -> Result<()> {
        if handle.lender != Some(self.id) || !handle.flags().is_read_only() {
            return Err(SqliteAccessError::Misuse(format!(
                "connection {} was not lent by this pool",
                handle.id()
            )));
        }

        if !handle.is_autocommit() || handle.in_explicit_transaction()? {
            if let Err(err) = handle.rollback_explicit() {
                tracing::warn!(connection = %handle.id(), error = %err, "evicting read connection that could not roll back");
                return Ok(());
            }
        }

        let surplus = self.free.protect(|free| {
            if free.len() < self.options.max_idle_read_connections {
                free.push(handle);
                None
            } else {
                Some(handle)
            }
        })?;
        if let Some(handle) = surplus {
            tracing::debug!(connection = %handle.id(), "closing surplus read connection");
        }
        Ok(())
    }

    /// Borrow a read connection for the duration of `work`; it is released even when `work`
    /// fails.
    ///
    /// # Errors
    /// Open errors from acquisition, then whatever `work` returns.
    pub fn with_read<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle) -> Result<R>,
    {
        let handle = self.acquire_read_connection()?;
        let outcome = work(&handle);
        let released = self.release_read_connection(handle);
        let value = outcome?;
        released?;
        Ok(value)
    }

    /// Run `work` on the write connection without opening a transaction.
    ///
    /// # Errors
    /// [`SqliteAccessError::Setup`] if the write connection's one-time setup fails, then
    /// anything [`SerialAccessQueue::run`] returns.
    pub fn with_write<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.writer()?.run(work)
    }

    /// Run `work` on the write connection inside an explicit transaction of `mode`.
    ///
    /// # Errors
    /// [`SqliteAccessError::Setup`] if the write connection's one-time setup fails, then
    /// anything [`SerialAccessQueue::run_in_transaction`] returns.
    pub fn with_write_transaction<R, F>(&self, mode: TransactionMode, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle, &mut RollbackRequest) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.writer()?.run_in_transaction(mode, work)
    }

    /// [`with_write_transaction`](Self::with_write_transaction) in the configured
    /// `write_transaction_mode`.
    ///
    /// # Errors
    /// Same as [`with_write_transaction`](Self::with_write_transaction).
    pub fn with_write_transaction_default<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle, &mut RollbackRequest) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.with_write_transaction(self.options.write_transaction_mode, work)
    }

    /// Idle read connections currently held by the pool.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Misuse`] if called while this thread holds the free-set lock.
    pub fn idle_read_connections(&self) -> Result<usize> {
        self.free.protect(|free| free.len())
    }

    /// `true` once the write queue exists and its setup succeeded.
    ///
    /// # Errors
    /// Same as [`idle_read_connections`](Self::idle_read_connections).
    pub fn write_queue_ready(&self) -> Result<bool> {
        self.writer.protect(|writer| writer.is_some())
    }

    fn writer(&self) -> Result<Arc<SerialAccessQueue>> {
        let mut slot = self.writer.lock()?;
        if let Some(queue) = slot.as_ref() {
            return Ok(Arc::clone(queue));
        }

        let queue = Arc::new(SerialAccessQueue::open(
            &self.options.path,
            OpenFlags::read_write(),
            format!("writer-{}", self.id),
            self.options.cache_statements,
        )?);
        let capacity = self.options.statement_cache_capacity;
        let journal_mode = self.options.journal_mode;
        // On failure the queue is dropped here and the next write tries again.
        queue.run(move |conn| {
            conn.set_statement_cache_capacity(capacity)?;
            match journal_mode {
                Some(mode) => apply_journal_mode(conn, mode),
                None => Ok(()),
            }
        })?;
        *slot = Some(Arc::clone(&queue));
        Ok(queue)
    }
}

fn apply_journal_mode(conn: &ConnectionHandle, mode: JournalMode) -> Result<()> {
    let reported = conn.set_journal_mode(mode)?;
    if reported != mode.as_str() {
        tracing::warn!(connection = %conn.id(), requested = %mode, reported = %reported, "journal mode did not take effect");
        return Err(SqliteAccessError::Setup(format!(
            "requested journal mode `{mode}` but the engine reports `{reported}`"
        )));
    }
    tracing::debug!(connection = %conn.id(), mode = %mode, "write connection configured");
    Ok(())
}

impl fmt::Debug for ConnectionPool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConnectionPool")
            .field("id", &self.id)
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}
