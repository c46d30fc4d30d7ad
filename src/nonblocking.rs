//! Tokio façade over [`ConnectionPool`].
//!
//! Every pool call blocks, so each one is moved onto tokio's blocking thread pool and the
//! calling task just awaits the join handle.

use std::sync::Arc;

use crate::config::PoolOptions;
use crate::connection::{ConnectionHandle, RollbackRequest, TransactionMode};
use crate::error::{Result, SqliteAccessError};
use crate::pool::ConnectionPool;

/// Cheaply cloneable async handle to a shared [`ConnectionPool`].
#[derive(Debug, Clone)]
pub struct AsyncConnectionPool {
    pool: Arc<ConnectionPool>,
}

impl AsyncConnectionPool {
    /// # Errors
    /// Returns [`SqliteAccessError::ConfigError`] if `options` are invalid.
    pub fn new(options: PoolOptions) -> Result<Self> {
        Ok(Self::from_pool(Arc::new(ConnectionPool::new(options)?)))
    }

    #[must_use]
    pub fn from_pool(pool: Arc<ConnectionPool>) -> Self {
        Self { pool }
    }

    /// The blocking pool underneath, for callers already on a blocking thread.
    #[must_use]
    pub fn blocking(&self) -> &Arc<ConnectionPool> {
        &self.pool
    }

    /// # Errors
    /// Same as [`ConnectionPool::with_read`], plus a `ConnectionError` if the blocking task
    /// could not be joined.
    pub async fn with_read<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_blocking(move |pool| pool.with_read(work)).await
    }

    /// # Errors
    /// Same as [`ConnectionPool::with_write`], plus a `ConnectionError` if the blocking task
    /// could not be joined.
    pub async fn with_write<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_blocking(move |pool| pool.with_write(work)).await
    }

    /// # Errors
    /// Same as [`ConnectionPool::with_write_transaction`], plus a `ConnectionError` if the
    /// blocking task could not be joined.
    pub async fn with_write_transaction<R, F>(&self, mode: TransactionMode, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle, &mut RollbackRequest) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_blocking(move |pool| pool.with_write_transaction(mode, work))
            .await
    }

    /// # Errors
    /// Same as [`ConnectionPool::with_write_transaction_default`], plus a `ConnectionError` if
    /// the blocking task could not be joined.
    pub async fn with_write_transaction_default<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle, &mut RollbackRequest) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        self.run_blocking(move |pool| pool.with_write_transaction_default(work))
            .await
    }

    async fn run_blocking<R, F>(&self, func: F) -> Result<R>
    where
        F: FnOnce(&ConnectionPool) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let pool = Arc::clone(&self.pool);
        tokio::task::spawn_blocking(move || func(&pool))
            .await
            .map_err(|e| {
                SqliteAccessError::ConnectionError(format!("sqlite spawn_blocking join error: {e}"))
            })?
    }
}
