use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::Arc;

use crate::config::JournalMode;
use crate::engine::{RawStatement, StepCode, ffi};
use crate::error::{Result, SqliteAccessError};
use crate::types::{Row, Value, index_columns};

use super::ConnectionHandle;
use super::cache::CachedStatement;

type RowSink<'a> = dyn FnMut(usize, Row) -> ControlFlow<()> + 'a;

type ColumnLayout = (Arc<Vec<String>>, Arc<HashMap<String, usize>>);

impl ConnectionHandle {
    /// Execute one statement to completion, discarding any rows it produces.
    ///
    /// `sql` must hold a single statement; trailing `;`, whitespace and comments are allowed.
    /// Use [`execute_batch`](Self::execute_batch) for several.
    ///
    /// Parameters bind positionally, the first to `?1`. Returns the engine's changed-row count,
    /// which is only meaningful for INSERT, UPDATE and DELETE.
    ///
    /// # Errors
    /// Returns `Prepare`, `Bind` or `Step` errors carrying the engine's code and message.
    /// A second statement in `sql` is a `Prepare` error with code `SQLITE_MISUSE`.
    pub fn execute(&self, sql: &str, params: &[Value]) -> Result<u64> {
        let _pass = self.drive();
        self.run_statement(sql, params, None)?;
        Ok(self.raw.changes())
    }

    /// Execute one statement and hand each produced row to `on_row` along with its 0-based
    /// index. Returning [`ControlFlow::Break`] stops stepping early.
    ///
    /// `on_row` may issue further statements on this same connection.
    ///
    /// Returns how many rows were delivered.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub fn execute_query<F>(&self, sql: &str, params: &[Value], mut on_row: F) -> Result<usize>
    where
        F: FnMut(usize, Row) -> ControlFlow<()>,
    {
        let _pass = self.drive();
        let sink: &mut RowSink<'_> = &mut on_row;
        self.run_statement(sql, params, Some(sink))
    }

    /// Collect every row the statement produces.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub fn query_rows(&self, sql: &str, params: &[Value]) -> Result<Vec<Row>> {
        let mut rows = Vec::new();
        self.execute_query(sql, params, |_, row| {
            rows.push(row);
            ControlFlow::Continue(())
        })?;
        Ok(rows)
    }

    /// First row, or `None` when the statement produces none.
    ///
    /// # Errors
    /// Same as [`execute`](Self::execute).
    pub fn query_row_optional(&self, sql: &str, params: &[Value]) -> Result<Option<Row>> {
        let mut first = None;
        self.execute_query(sql, params, |_, row| {
            first = Some(row);
            ControlFlow::Break(())
        })?;
        Ok(first)
    }

    /// Run `;`-separated SQL text without parameters or rows. Bypasses the statement cache.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::Step`] for the first statement the engine rejects.
    pub fn execute_batch(&self, sql: &str) -> Result<()> {
        let _pass = self.drive();
        self.raw.exec(sql).map_err(|failure| SqliteAccessError::Step {
            code: failure.code,
            message: failure.message,
        })
    }

    /// The journal mode the engine currently reports, lowercased (`"wal"`, `"delete"`, …).
    ///
    /// # Errors
    /// Statement errors from the PRAGMA.
    pub fn journal_mode(&self) -> Result<String> {
        self.pragma_journal_mode("PRAGMA journal_mode")
    }

    /// Ask the engine to switch journal mode and return the mode it reports afterwards.
    ///
    /// The engine does not fail when it cannot switch (for example an in-memory database
    /// stays in `memory`), so callers must compare the result with what they asked for.
    ///
    /// # Errors
    /// Statement errors from the PRAGMA.
    pub fn set_journal_mode(&self, mode: JournalMode) -> Result<String> {
        self.pragma_journal_mode(&format!("PRAGMA journal_mode = {}", mode.as_str()))
    }

    fn pragma_journal_mode(&self, sql: &str) -> Result<String> {
        let row = self.query_row_optional(sql, &[])?;
        row.as_ref()
            .and_then(|row| row.get_by_index(0))
            .and_then(Value::as_text)
            .map(str::to_ascii_lowercase)
            .ok_or_else(|| SqliteAccessError::Setup(format!("`{sql}` reported no journal mode")))
    }

    fn run_statement(
        &self,
        sql: &str,
        params: &[Value],
        on_row: Option<&mut RowSink<'_>>,
    ) -> Result<usize> {
        let mut stmt = match self.cache.take(sql)? {
            Some(stmt) => stmt,
            None => CachedStatement::new(self.prepare(sql)?),
        };
        let outcome = self.step_statement(&mut stmt, params, on_row);
        self.cache.give_back(sql, stmt)?;
        outcome
    }

    fn prepare(&self, sql: &str) -> Result<RawStatement> {
        self.raw
            .prepare(sql)
            .map_err(|failure| SqliteAccessError::Prepare {
                sql: sql.to_owned(),
                code: failure.code,
                message: failure.message,
            })
    }

    fn step_statement(
        &self,
        stmt: &mut CachedStatement,
        params: &[Value],
        mut on_row: Option<&mut RowSink<'_>>,
    ) -> Result<usize> {
        for (offset, value) in params.iter().enumerate() {
            let index = offset + 1;
            let rc = stmt.raw.bind(index, value);
            if rc != ffi::SQLITE_OK {
                return Err(SqliteAccessError::Bind {
                    index,
                    code: rc,
                    message: self.raw.last_error_message(),
                });
            }
        }

        let mut layout: Option<ColumnLayout> = None;
        let mut delivered = 0;
        loop {
            match StepCode::from_raw(stmt.raw.step()) {
                StepCode::Done => return Ok(delivered),
                StepCode::Row => {
                    let Some(sink) = on_row.as_deref_mut() else {
                        continue;
                    };
                    let (names, index) = layout.get_or_insert_with(|| column_layout(&stmt.raw));
                    let values = (0..names.len())
                        .map(|col| stmt.raw.column_value(col))
                        .collect();
                    let row = Row::with_index(Arc::clone(names), Arc::clone(index), values);
                    let flow = sink(delivered, row);
                    delivered += 1;
                    if flow.is_break() {
                        return Ok(delivered);
                    }
                }
                StepCode::Failed(code) => {
                    stmt.dirty = true;
                    return Err(SqliteAccessError::Step {
                        code,
                        message: self.raw.last_error_message(),
                    });
                }
            }
        }
    }
}

fn column_layout(stmt: &RawStatement) -> ColumnLayout {
    let names: Vec<String> = (0..stmt.column_count())
        .map(|col| stmt.column_name(col))
        .collect();
    let index = index_columns(&names);
    (Arc::new(names), Arc::new(index))
}
