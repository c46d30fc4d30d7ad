use std::fmt;

use serde::{Deserialize, Serialize};

use crate::connection::{DEFAULT_STATEMENT_CACHE_CAPACITY, TransactionMode};
use crate::error::{Result, SqliteAccessError};
use crate::pool::ConnectionPool;

/// Journal modes the write connection can be switched into on first use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalMode {
    Delete,
    Truncate,
    Persist,
    Memory,
    /// Write-ahead log: readers keep reading while the writer appends.
    #[default]
    Wal,
    Off,
}

impl JournalMode {
    /// The spelling the engine uses in `PRAGMA journal_mode` results.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            JournalMode::Delete => "delete",
            JournalMode::Truncate => "truncate",
            JournalMode::Persist => "persist",
            JournalMode::Memory => "memory",
            JournalMode::Wal => "wal",
            JournalMode::Off => "off",
        }
    }
}

impl fmt::Display for JournalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn default_journal_mode() -> Option<JournalMode> {
    Some(JournalMode::Wal)
}

fn default_cache_statements() -> bool {
    true
}

fn default_statement_cache_capacity() -> usize {
    DEFAULT_STATEMENT_CACHE_CAPACITY
}

fn default_max_idle_read_connections() -> usize {
    6
}

/// Options for configuring a [`ConnectionPool`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOptions {
    pub path: String,
    /// Mode the write connection is switched into (and verified) when it is first opened.
    /// `None` leaves the file's current mode alone.
    #[serde(default = "default_journal_mode")]
    pub journal_mode: Option<JournalMode>,
    #[serde(default = "default_cache_statements")]
    pub cache_statements: bool,
    /// Prepared statements each pooled connection keeps.
    #[serde(default = "default_statement_cache_capacity")]
    pub statement_cache_capacity: usize,
    /// Released readers beyond this many are closed instead of kept.
    #[serde(default = "default_max_idle_read_connections")]
    pub max_idle_read_connections: usize,
    /// Mode used by [`ConnectionPool::with_write_transaction_default`].
    #[serde(default)]
    pub write_transaction_mode: TransactionMode,
}

impl PoolOptions {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            journal_mode: default_journal_mode(),
            cache_statements: default_cache_statements(),
            statement_cache_capacity: default_statement_cache_capacity(),
            max_idle_read_connections: default_max_idle_read_connections(),
            write_transaction_mode: TransactionMode::default(),
        }
    }

    /// # Errors
    /// Returns [`SqliteAccessError::ConfigError`] for an empty path.
    pub fn validate(&self) -> Result<()> {
        if self.path.trim().is_empty() {
            return Err(SqliteAccessError::ConfigError(
                "database path must not be empty".into(),
            ));
        }
        Ok(())
    }
}

/// Fluent builder for [`PoolOptions`].
#[derive(Debug, Clone)]
pub struct PoolOptionsBuilder {
    opts: PoolOptions,
}

impl PoolOptionsBuilder {
    #[must_use]
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            opts: PoolOptions::new(path),
        }
    }

    #[must_use]
    pub fn journal_mode(mut self, mode: JournalMode) -> Self {
        self.opts.journal_mode = Some(mode);
        self
    }

    /// Do not touch the journal mode when the write connection opens.
    #[must_use]
    pub fn keep_journal_mode(mut self) -> Self {
        self.opts.journal_mode = None;
        self
    }

    #[must_use]
    pub fn cache_statements(mut self, enabled: bool) -> Self {
        self.opts.cache_statements = enabled;
        self
    }

    #[must_use]
    pub fn statement_cache_capacity(mut self, capacity: usize) -> Self {
        self.opts.statement_cache_capacity = capacity;
        self
    }

    #[must_use]
    pub fn max_idle_read_connections(mut self, max: usize) -> Self {
        self.opts.max_idle_read_connections = max;
        self
    }

    #[must_use]
    pub fn write_transaction_mode(mut self, mode: TransactionMode) -> Self {
        self.opts.write_transaction_mode = mode;
        self
    }

    /// # Errors
    /// Returns [`SqliteAccessError::ConfigError`] if the options are invalid.
    pub fn finish(self) -> Result<PoolOptions> {
        self.opts.validate()?;
        Ok(self.opts)
    }

    /// Build the pool. No connection is opened yet.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::ConfigError`] if the options are invalid.
    pub fn build(self) -> Result<ConnectionPool> {
        ConnectionPool::new(self.finish()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_builder() {
        let opts = PoolOptionsBuilder::new("app.db").finish().unwrap();
        assert_eq!(opts, PoolOptions::new("app.db"));
        assert_eq!(opts.journal_mode, Some(JournalMode::Wal));
        assert!(opts.cache_statements);
        assert_eq!(opts.statement_cache_capacity, 16);
        assert_eq!(opts.max_idle_read_connections, 6);
        assert_eq!(opts.write_transaction_mode, TransactionMode::Immediate);
    }

    #[test]
    fn empty_path_is_rejected() {
        let err = PoolOptionsBuilder::new("  ").finish().unwrap_err();
        assert!(matches!(err, SqliteAccessError::ConfigError(_)));
    }

    #[test]
    fn missing_fields_deserialize_to_defaults() {
        let opts: PoolOptions = serde_json::from_str(r#"{"path":"x.db"}"#).unwrap();
        assert_eq!(opts, PoolOptions::new("x.db"));

        let opts: PoolOptions = serde_json::from_str(
            r#"{"path":"x.db","journal_mode":null,"write_transaction_mode":"exclusive"}"#,
        )
        .unwrap();
        assert_eq!(opts.journal_mode, None);
        assert_eq!(opts.write_transaction_mode, TransactionMode::Exclusive);
    }

    #[test]
    fn journal_mode_spelling() {
        assert_eq!(JournalMode::Wal.to_string(), "wal");
        assert_eq!(JournalMode::Truncate.as_str(), "truncate");
    }
}
