use std::fmt;

use thiserror::Error;

use rusqlite::ffi;

/// Which transaction-control statement the engine rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionPhase {
    Begin,
    Commit,
    Rollback,
}

impl fmt::Display for TransactionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionPhase::Begin => f.write_str("begin"),
            TransactionPhase::Commit => f.write_str("commit"),
            TransactionPhase::Rollback => f.write_str("rollback"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SqliteAccessError {
    #[error("Failed to open database at {path}: {message} (code {code})")]
    Open {
        path: String,
        code: i32,
        message: String,
    },

    #[error("Database setup error: {0}")]
    Setup(String),

    #[error("Failed to prepare statement `{sql}`: {message} (code {code})")]
    Prepare {
        sql: String,
        code: i32,
        message: String,
    },

    #[error("Failed to bind parameter {index}: {message} (code {code})")]
    Bind {
        index: usize,
        code: i32,
        message: String,
    },

    #[error("SQL execution error: {message} (code {code})")]
    Step { code: i32, message: String },

    #[error("Failed to {phase} transaction: {message} (code {code})")]
    Transaction {
        phase: TransactionPhase,
        code: i32,
        message: String,
    },

    #[error("Misuse: {0}")]
    Misuse(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Connection error: {0}")]
    ConnectionError(String),

    #[error("Work item panicked on serial queue `{0}`")]
    WorkItemPanicked(String),
}

impl SqliteAccessError {
    /// Native result code carried by the error, if any.
    #[must_use]
    pub fn code(&self) -> Option<i32> {
        match self {
            SqliteAccessError::Open { code, .. }
            | SqliteAccessError::Prepare { code, .. }
            | SqliteAccessError::Bind { code, .. }
            | SqliteAccessError::Step { code, .. }
            | SqliteAccessError::Transaction { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// `true` when the engine reported lock contention (`SQLITE_BUSY` or `SQLITE_LOCKED`,
    /// including their extended codes).
    ///
    /// The access layer never retries; callers use this to decide on their own backoff.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.code()
            .map(|code| code & 0xff)
            .is_some_and(|primary| primary == ffi::SQLITE_BUSY || primary == ffi::SQLITE_LOCKED)
    }

    pub(crate) fn into_transaction(self, phase: TransactionPhase) -> Self {
        match self {
            SqliteAccessError::Prepare { code, message, .. }
            | SqliteAccessError::Bind { code, message, .. }
            | SqliteAccessError::Step { code, message } => SqliteAccessError::Transaction {
                phase,
                code,
                message,
            },
            other => other,
        }
    }
}

pub type Result<T> = std::result::Result<T, SqliteAccessError>;
