#![allow(dead_code)]

use sqlite_access::prelude::*;
use tempfile::TempDir;

/// A database path inside a fresh temp directory; keep the `TempDir` alive for the test.
pub fn temp_db(prefix: &str) -> (TempDir, String) {
    let dir = tempfile::tempdir().expect("tempdir");
    let path = dir.path().join(format!("{prefix}.db"));
    (dir, path.to_string_lossy().into_owned())
}

pub fn count_rows(conn: &ConnectionHandle, table: &str) -> Result<i64, SqliteAccessError> {
    let row = conn.query_row_optional(&format!("SELECT count(*) AS n FROM {table}"), &[])?;
    Ok(row
        .and_then(|row| row.get("n").and_then(Value::as_int))
        .unwrap_or_default())
}

/// A pool whose file already holds `CREATE TABLE {table} (id INTEGER PRIMARY KEY, val TEXT)`.
pub fn seeded_pool(
    prefix: &str,
    table: &'static str,
) -> Result<(TempDir, ConnectionPool), SqliteAccessError> {
    let (dir, path) = temp_db(prefix);
    let pool = ConnectionPool::builder(path).build()?;
    pool.with_write(move |conn| {
        conn.execute_batch(&format!(
            "CREATE TABLE {table} (id INTEGER PRIMARY KEY, val TEXT NOT NULL)"
        ))
    })?;
    Ok((dir, pool))
}
