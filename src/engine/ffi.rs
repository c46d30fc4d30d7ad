//! Owned handles over the bundled SQLite C API.
//!
//! This file is the **only** place in the crate that contains `unsafe` code. Everything above
//! it works with [`RawConnection`] and [`RawStatement`], which own their pointers and release
//! them on drop.

#![allow(unsafe_code)]

use std::ffi::{CStr, CString, c_char, c_int};
use std::ptr;

use rusqlite::ffi as sys;

use crate::types::Value;

pub(crate) use sys::{
    SQLITE_DONE, SQLITE_OK, SQLITE_OPEN_CREATE, SQLITE_OPEN_FULLMUTEX, SQLITE_OPEN_NOMUTEX,
    SQLITE_OPEN_READONLY, SQLITE_OPEN_READWRITE, SQLITE_OPEN_URI, SQLITE_ROW,
};

/// Code and message captured from the engine right after a failing call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct NativeFailure {
    pub(crate) code: i32,
    pub(crate) message: String,
}

impl NativeFailure {
    fn from_code(code: i32) -> Self {
        Self {
            code,
            message: error_string(code),
        }
    }
}

fn error_string(code: i32) -> String {
    // SAFETY: sqlite3_errstr returns a pointer to a static, NUL-terminated string.
    unsafe {
        let msg = sys::sqlite3_errstr(code);
        if msg.is_null() {
            format!("sqlite error {code}")
        } else {
            CStr::from_ptr(msg).to_string_lossy().into_owned()
        }
    }
}

/// An open `sqlite3*` handle, closed with `sqlite3_close` on drop.
///
/// Every [`RawStatement`] prepared on it must be dropped first.
pub(crate) struct RawConnection {
    db: *mut sys::sqlite3,
}

// SAFETY: the handle is only an address; moving it between threads is fine as long as no two
// threads drive it concurrently. `ConnectionHandle` funnels every call through its
// `DriverGate`, which admits a single thread at a time whatever the threading mode.
unsafe impl Send for RawConnection {}
// SAFETY: see above.
unsafe impl Sync for RawConnection {}

impl RawConnection {
    pub(crate) fn open(path: &str, flags: i32) -> Result<Self, NativeFailure> {
        let c_path = CString::new(path).map_err(|_| NativeFailure {
            code: sys::SQLITE_MISUSE,
            message: "database path contains a NUL byte".into(),
        })?;

        let mut db: *mut sys::sqlite3 = ptr::null_mut();
        // SAFETY: c_path is NUL-terminated and outlives the call; db is a valid out-pointer.
        let rc = unsafe { sys::sqlite3_open_v2(c_path.as_ptr(), &mut db, flags, ptr::null()) };
        if rc != sys::SQLITE_OK {
            let failure = if db.is_null() {
                NativeFailure::from_code(rc)
            } else {
                NativeFailure {
                    code: rc,
                    // SAFETY: db is non-null; errmsg returns a NUL-terminated string owned by db.
                    message: unsafe { message_of(db) },
                }
            };
            // A failed open may still allocate a handle; closing NULL is a harmless no-op.
            // SAFETY: db is either null or a handle returned by sqlite3_open_v2 with no
            // statements prepared on it.
            unsafe {
                sys::sqlite3_close(db);
            }
            return Err(failure);
        }
        Ok(Self { db })
    }

    pub(crate) fn prepare(&self, sql: &str) -> Result<RawStatement, NativeFailure> {
        let len = c_int::try_from(sql.len()).map_err(|_| NativeFailure::from_code(sys::SQLITE_TOOBIG))?;
        let head = sql.as_ptr().cast::<c_char>();
        let mut stmt: *mut sys::sqlite3_stmt = ptr::null_mut();
        let mut tail: *const c_char = ptr::null();
        // SAFETY: the SQL bytes are valid for `len` bytes for the duration of the call, and
        // sqlite copies what it needs into the statement. `tail` is left pointing into `sql`.
        let rc = unsafe { sys::sqlite3_prepare_v2(self.db, head, len, &mut stmt, &mut tail) };
        if rc != sys::SQLITE_OK {
            // SAFETY: stmt is null or a statement we own; finalize(NULL) is a no-op.
            unsafe {
                sys::sqlite3_finalize(stmt);
            }
            return Err(self.failure(rc));
        }
        if stmt.is_null() {
            return Err(NativeFailure {
                code: sys::SQLITE_MISUSE,
                message: "SQL text contains no statement".into(),
            });
        }
        let stmt = RawStatement { stmt };

        let rest = if tail.is_null() {
            ""
        } else {
            // SAFETY: sqlite sets `tail` to a position inside the `len` bytes starting at `head`.
            let consumed = unsafe { tail.offset_from(head) };
            usize::try_from(consumed)
                .ok()
                .and_then(|at| sql.get(at..))
                .unwrap_or("")
        };
        if self.holds_statement(rest) {
            return Err(NativeFailure {
                code: sys::SQLITE_MISUSE,
                message: "multiple statements in one SQL text; use execute_batch".into(),
            });
        }
        Ok(stmt)
    }

    /// `true` unless `sql` is only whitespace, `;` and comments.
    fn holds_statement(&self, sql: &str) -> bool {
        if sql.trim_start_matches(|c: char| c.is_whitespace() || c == ';').is_empty() {
            return false;
        }
        let Ok(len) = c_int::try_from(sql.len()) else {
            return true;
        };
        let mut stmt: *mut sys::sqlite3_stmt = ptr::null_mut();
        // SAFETY: as in `prepare`; the trial statement is finalized right away.
        unsafe {
            let rc = sys::sqlite3_prepare_v2(
                self.db,
                sql.as_ptr().cast::<c_char>(),
                len,
                &mut stmt,
                ptr::null_mut(),
            );
            let found = rc != sys::SQLITE_OK || !stmt.is_null();
            sys::sqlite3_finalize(stmt);
            found
        }
    }

    /// Run one or more `;`-separated statements without producing rows.
    pub(crate) fn exec(&self, sql: &str) -> Result<(), NativeFailure> {
        let c_sql = CString::new(sql).map_err(|_| NativeFailure {
            code: sys::SQLITE_MISUSE,
            message: "SQL text contains a NUL byte".into(),
        })?;
        let mut errmsg: *mut c_char = ptr::null_mut();
        // SAFETY: c_sql is NUL-terminated; no callback is installed; errmsg is a valid out-ptr.
        let rc = unsafe {
            sys::sqlite3_exec(self.db, c_sql.as_ptr(), None, ptr::null_mut(), &mut errmsg)
        };
        if rc == sys::SQLITE_OK {
            return Ok(());
        }
        let message = if errmsg.is_null() {
            error_string(rc)
        } else {
            // SAFETY: errmsg was allocated by sqlite and must be released with sqlite3_free.
            unsafe {
                let text = CStr::from_ptr(errmsg).to_string_lossy().into_owned();
                sys::sqlite3_free(errmsg.cast());
                text
            }
        };
        Err(NativeFailure { code: rc, message })
    }

    pub(crate) fn last_error_message(&self) -> String {
        // SAFETY: db is a live handle.
        unsafe { message_of(self.db) }
    }

    pub(crate) fn last_error_code(&self) -> i32 {
        // SAFETY: db is a live handle.
        unsafe { sys::sqlite3_errcode(self.db) }
    }

    pub(crate) fn is_autocommit(&self) -> bool {
        // SAFETY: db is a live handle.
        unsafe { sys::sqlite3_get_autocommit(self.db) != 0 }
    }

    pub(crate) fn changes(&self) -> u64 {
        // SAFETY: db is a live handle.
        let changes = unsafe { sys::sqlite3_changes(self.db) };
        u64::try_from(changes).unwrap_or(0)
    }

    pub(crate) fn last_insert_rowid(&self) -> i64 {
        // SAFETY: db is a live handle.
        unsafe { sys::sqlite3_last_insert_rowid(self.db) }
    }

    fn failure(&self, code: i32) -> NativeFailure {
        NativeFailure {
            code,
            message: self.last_error_message(),
        }
    }
}

impl Drop for RawConnection {
    fn drop(&mut self) {
        // SAFETY: db was returned by sqlite3_open_v2 and is closed exactly once. Statements
        // borrow their connection through `ConnectionHandle`, so none outlive it.
        let rc = unsafe { sys::sqlite3_close(self.db) };
        if rc != sys::SQLITE_OK {
            tracing::warn!(code = rc, "sqlite3_close left the connection open");
        }
    }
}

/// # Safety
/// `db` must be a live connection handle.
unsafe fn message_of(db: *mut sys::sqlite3) -> String {
    // SAFETY: guaranteed by the caller; errmsg never returns NULL for a live handle.
    unsafe {
        let msg = sys::sqlite3_errmsg(db);
        if msg.is_null() {
            return "unknown error".into();
        }
        CStr::from_ptr(msg).to_string_lossy().into_owned()
    }
}

/// A prepared `sqlite3_stmt*`, finalized on drop.
pub(crate) struct RawStatement {
    stmt: *mut sys::sqlite3_stmt,
}

// SAFETY: a statement is only stepped by the thread currently driving its connection; it is
// moved (never shared) between the statement cache and the executing call.
unsafe impl Send for RawStatement {}

impl RawStatement {
    /// Bind `value` at the 1-based `index`. Returns the raw engine code.
    pub(crate) fn bind(&mut self, index: usize, value: &Value) -> i32 {
        let Ok(index) = c_int::try_from(index) else {
            return sys::SQLITE_RANGE;
        };
        // SAFETY: stmt is live; text and blob bytes are copied by sqlite (SQLITE_TRANSIENT).
        unsafe {
            match value {
                Value::Null => sys::sqlite3_bind_null(self.stmt, index),
                Value::Int(v) => sys::sqlite3_bind_int64(self.stmt, index, *v),
                Value::Float(v) => sys::sqlite3_bind_double(self.stmt, index, *v),
                Value::Text(text) => match c_int::try_from(text.len()) {
                    Ok(len) => sys::sqlite3_bind_text(
                        self.stmt,
                        index,
                        text.as_ptr().cast::<c_char>(),
                        len,
                        sys::SQLITE_TRANSIENT(),
                    ),
                    Err(_) => sys::SQLITE_TOOBIG,
                },
                // A NULL data pointer would bind SQL NULL, so empty blobs go through zeroblob.
                Value::Blob(bytes) if bytes.is_empty() => {
                    sys::sqlite3_bind_zeroblob(self.stmt, index, 0)
                }
                Value::Blob(bytes) => match c_int::try_from(bytes.len()) {
                    Ok(len) => sys::sqlite3_bind_blob(
                        self.stmt,
                        index,
                        bytes.as_ptr().cast(),
                        len,
                        sys::SQLITE_TRANSIENT(),
                    ),
                    Err(_) => sys::SQLITE_TOOBIG,
                },
            }
        }
    }

    pub(crate) fn step(&mut self) -> i32 {
        // SAFETY: stmt is live.
        unsafe { sys::sqlite3_step(self.stmt) }
    }

    pub(crate) fn reset(&mut self) -> i32 {
        // SAFETY: stmt is live.
        unsafe { sys::sqlite3_reset(self.stmt) }
    }

    pub(crate) fn clear_bindings(&mut self) {
        // SAFETY: stmt is live.
        unsafe {
            sys::sqlite3_clear_bindings(self.stmt);
        }
    }

    pub(crate) fn column_count(&self) -> usize {
        // SAFETY: stmt is live.
        let count = unsafe { sys::sqlite3_column_count(self.stmt) };
        usize::try_from(count).unwrap_or(0)
    }

    pub(crate) fn column_name(&self, index: usize) -> String {
        let Ok(col) = c_int::try_from(index) else {
            return format!("col{index}");
        };
        // SAFETY: stmt is live and col < column_count; the name is owned by the statement.
        unsafe {
            let name = sys::sqlite3_column_name(self.stmt, col);
            if name.is_null() {
                format!("col{index}")
            } else {
                CStr::from_ptr(name).to_string_lossy().into_owned()
            }
        }
    }

    /// Read column `index` of the current row. Only valid right after a `ROW` step.
    pub(crate) fn column_value(&self, index: usize) -> Value {
        let Ok(col) = c_int::try_from(index) else {
            return Value::Null;
        };
        // SAFETY: stmt is live and positioned on a row. Text/blob pointers are read before
        // their byte counts, as the SQLite docs require, and copied out immediately.
        unsafe {
            match sys::sqlite3_column_type(self.stmt, col) {
                sys::SQLITE_INTEGER => Value::Int(sys::sqlite3_column_int64(self.stmt, col)),
                sys::SQLITE_FLOAT => Value::Float(sys::sqlite3_column_double(self.stmt, col)),
                sys::SQLITE_TEXT => {
                    let text = sys::sqlite3_column_text(self.stmt, col);
                    let len = usize::try_from(sys::sqlite3_column_bytes(self.stmt, col))
                        .unwrap_or(0);
                    if text.is_null() {
                        Value::Text(String::new())
                    } else {
                        let bytes = std::slice::from_raw_parts(text, len);
                        Value::Text(String::from_utf8_lossy(bytes).into_owned())
                    }
                }
                sys::SQLITE_BLOB => {
                    let blob = sys::sqlite3_column_blob(self.stmt, col);
                    let len = usize::try_from(sys::sqlite3_column_bytes(self.stmt, col))
                        .unwrap_or(0);
                    if blob.is_null() || len == 0 {
                        Value::Blob(Vec::new())
                    } else {
                        Value::Blob(std::slice::from_raw_parts(blob.cast::<u8>(), len).to_vec())
                    }
                }
                _ => Value::Null,
            }
        }
    }
}

impl Drop for RawStatement {
    fn drop(&mut self) {
        // SAFETY: stmt was returned by sqlite3_prepare_v2 and is finalized exactly once.
        unsafe {
            sys::sqlite3_finalize(self.stmt);
        }
    }
}
