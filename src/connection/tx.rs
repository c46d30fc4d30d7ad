use serde::{Deserialize, Serialize};

use crate::error::{Result, TransactionPhase};
use crate::sync::Mutex;

use super::ConnectionHandle;

/// Lock acquisition mode for an explicit transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionMode {
    /// Locks are taken by the first statement that needs them.
    Deferred,
    /// The write lock is taken at `BEGIN`; other writers see busy immediately.
    #[default]
    Immediate,
    Exclusive,
}

impl TransactionMode {
    pub(crate) fn begin_sql(self) -> &'static str {
        match self {
            TransactionMode::Deferred => "BEGIN DEFERRED TRANSACTION",
            TransactionMode::Immediate => "BEGIN IMMEDIATE TRANSACTION",
            TransactionMode::Exclusive => "BEGIN EXCLUSIVE TRANSACTION",
        }
    }
}

const COMMIT_SQL: &str = "COMMIT TRANSACTION";
const ROLLBACK_SQL: &str = "ROLLBACK TRANSACTION";

/// Handed to a transactional work item; calling [`request`](Self::request) turns the
/// closing commit into a rollback.
#[derive(Debug, Default)]
pub struct RollbackRequest {
    requested: bool,
}

impl RollbackRequest {
    pub fn request(&mut self) {
        self.requested = true;
    }

    #[must_use]
    pub fn is_requested(&self) -> bool {
        self.requested
    }
}

#[derive(Debug, Default)]
struct TransactionState {
    explicitly_open: bool,
    begins_issued: u64,
}

/// Explicit-transaction bookkeeping for one connection.
///
/// Only tracks what the caller opened. Implicit engine transactions are observed through
/// `is_autocommit`, never recorded here.
#[derive(Debug, Default)]
pub(crate) struct TransactionController {
    state: Mutex<TransactionState>,
}

impl TransactionController {
    pub(crate) fn is_open(&self) -> Result<bool> {
        self.state.protect(|state| state.explicitly_open)
    }

    #[cfg(test)]
    fn begins_issued(&self) -> u64 {
        self.state.protect(|state| state.begins_issued).unwrap_or(0)
    }
}

impl ConnectionHandle {
    /// Open an explicit transaction.
    ///
    /// A second call while one is already open is a no-op, so nested application-level
    /// helpers can each "begin" without tripping the engine's nested-transaction error.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Transaction`](crate::SqliteAccessError::Transaction) with
    /// phase `Begin` when the engine rejects the `BEGIN` (typically busy).
    pub fn begin_explicit(&self, mode: TransactionMode) -> Result<()> {
        let _pass = self.drive();
        let mut state = self.tx.state.lock()?;
        if state.explicitly_open {
            tracing::debug!(connection = %self.id, "explicit transaction already open; begin ignored");
            return Ok(());
        }
        self.execute(mode.begin_sql(), &[])
            .map_err(|err| err.into_transaction(TransactionPhase::Begin))?;
        state.explicitly_open = true;
        state.begins_issued += 1;
        tracing::debug!(connection = %self.id, ?mode, "explicit transaction opened");
        Ok(())
    }

    /// Commit the engine's open transaction, if there is one.
    ///
    /// The explicit flag is cleared whatever the outcome. After a failed commit the engine
    /// may still hold the transaction; the caller decides between retrying the commit and
    /// rolling back.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Transaction`](crate::SqliteAccessError::Transaction) with
    /// phase `Commit`.
    pub fn commit_explicit(&self) -> Result<()> {
        self.finish_explicit(COMMIT_SQL, TransactionPhase::Commit)
    }

    /// Roll back the engine's open transaction, if there is one.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Transaction`](crate::SqliteAccessError::Transaction) with
    /// phase `Rollback`.
    pub fn rollback_explicit(&self) -> Result<()> {
        self.finish_explicit(ROLLBACK_SQL, TransactionPhase::Rollback)
    }

    fn finish_explicit(&self, sql: &str, phase: TransactionPhase) -> Result<()> {
        let _pass = self.drive();
        let mut state = self.tx.state.lock()?;
        let outcome = if self.raw.is_autocommit() {
            Ok(())
        } else {
            self.execute(sql, &[])
                .map(drop)
                .map_err(|err| err.into_transaction(phase))
        };
        state.explicitly_open = false;
        match &outcome {
            Ok(()) => tracing::debug!(connection = %self.id, %phase, "explicit transaction closed"),
            Err(err) => tracing::debug!(connection = %self.id, %phase, error = %err, "closing explicit transaction failed"),
        }
        outcome
    }

    /// `true` while a transaction opened by [`begin_explicit`](Self::begin_explicit) has not
    /// been committed or rolled back.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Misuse`](crate::SqliteAccessError::Misuse) when called
    /// while this thread is inside a transaction-control call on the same connection.
    pub fn in_explicit_transaction(&self) -> Result<bool> {
        self.tx.is_open()
    }

    /// `false` whenever the engine has any transaction open, explicit or implicit.
    pub fn is_autocommit(&self) -> bool {
        let _pass = self.drive();
        self.raw.is_autocommit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::OpenFlags;
    use crate::error::SqliteAccessError;
    use crate::types::Value;

    fn memory_writer() -> ConnectionHandle {
        let conn = ConnectionHandle::open(":memory:", OpenFlags::read_write()).unwrap();
        conn.execute_batch("CREATE TABLE t (id INTEGER PRIMARY KEY, v TEXT);")
            .unwrap();
        conn
    }

    #[test]
    fn nested_begin_reaches_engine_once() {
        let conn = memory_writer();
        conn.begin_explicit(TransactionMode::Immediate).unwrap();
        conn.begin_explicit(TransactionMode::Deferred).unwrap();
        assert_eq!(conn.tx.begins_issued(), 1);
        assert!(conn.in_explicit_transaction().unwrap());
        assert!(!conn.is_autocommit());
        conn.commit_explicit().unwrap();
        assert!(!conn.in_explicit_transaction().unwrap());
        assert!(conn.is_autocommit());
    }

    #[test]
    fn rollback_discards_rows() {
        let conn = memory_writer();
        conn.begin_explicit(TransactionMode::Deferred).unwrap();
        conn.execute("INSERT INTO t (v) VALUES (?1)", &[Value::from("gone")])
            .unwrap();
        conn.rollback_explicit().unwrap();
        let rows = conn.query_rows("SELECT v FROM t", &[]).unwrap();
        assert!(rows.is_empty());
    }

    #[test]
    fn commit_without_open_transaction_is_noop() {
        let conn = memory_writer();
        conn.commit_explicit().unwrap();
        conn.rollback_explicit().unwrap();
        assert!(conn.is_autocommit());
    }

    #[test]
    fn engine_rejection_maps_to_begin_phase() {
        let conn = memory_writer();
        // An engine-level transaction the controller does not know about.
        conn.execute_batch("BEGIN").unwrap();
        let err = conn.begin_explicit(TransactionMode::Immediate).unwrap_err();
        assert!(matches!(
            err,
            SqliteAccessError::Transaction {
                phase: TransactionPhase::Begin,
                ..
            }
        ));
        assert!(!conn.in_explicit_transaction().unwrap());
        // Commit still closes it because the engine reports a transaction.
        conn.commit_explicit().unwrap();
        assert!(conn.is_autocommit());
    }

    #[test]
    fn rollback_request_flag() {
        let mut request = RollbackRequest::default();
        assert!(!request.is_requested());
        request.request();
        assert!(request.is_requested());
    }

    #[test]
    fn begin_sql_renders_mode() {
        assert_eq!(
            TransactionMode::Exclusive.begin_sql(),
            "BEGIN EXCLUSIVE TRANSACTION"
        );
        assert_eq!(TransactionMode::default(), TransactionMode::Immediate);
    }
}
