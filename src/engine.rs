// Native engine surface.
//
// - ffi: owned raw connection/statement handles over the bundled SQLite C API
// - this module: open flags and the small enums the rest of the crate speaks

pub(crate) mod ffi;

use serde::{Deserialize, Serialize};

pub(crate) use ffi::{RawConnection, RawStatement};

/// How the connection may touch the database file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessMode {
    /// Fails to open if the file does not exist; writes are rejected by the engine.
    ReadOnly,
    /// The file must already exist.
    ReadWrite,
    /// Creates the file when missing.
    ReadWriteCreate,
}

/// Whether the engine serializes calls on the connection internally.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadingMode {
    /// Multi-thread mode: the connection's gate is the only serialization.
    NoMutex,
    /// Serialized mode: the engine also holds its own mutex around every native call.
    FullMutex,
}

/// Flags handed to the engine when a connection is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OpenFlags {
    pub access: AccessMode,
    pub threading: ThreadingMode,
}

impl OpenFlags {
    /// Read-only, connection-private locking. Used for pooled readers.
    #[must_use]
    pub fn read_only() -> Self {
        Self {
            access: AccessMode::ReadOnly,
            threading: ThreadingMode::NoMutex,
        }
    }

    /// Read-write, create when missing. Used for the write queue.
    #[must_use]
    pub fn read_write() -> Self {
        Self {
            access: AccessMode::ReadWriteCreate,
            threading: ThreadingMode::NoMutex,
        }
    }

    #[must_use]
    pub fn with_threading(mut self, threading: ThreadingMode) -> Self {
        self.threading = threading;
        self
    }

    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.access == AccessMode::ReadOnly
    }

    /// `true` when the engine itself makes the handle safe to drive from several threads.
    #[must_use]
    pub fn is_serialized(&self) -> bool {
        self.threading == ThreadingMode::FullMutex
    }

    pub(crate) fn to_raw(self) -> i32 {
        let access = match self.access {
            AccessMode::ReadOnly => ffi::SQLITE_OPEN_READONLY,
            AccessMode::ReadWrite => ffi::SQLITE_OPEN_READWRITE,
            AccessMode::ReadWriteCreate => ffi::SQLITE_OPEN_READWRITE | ffi::SQLITE_OPEN_CREATE,
        };
        let threading = match self.threading {
            ThreadingMode::NoMutex => ffi::SQLITE_OPEN_NOMUTEX,
            ThreadingMode::FullMutex => ffi::SQLITE_OPEN_FULLMUTEX,
        };
        access | threading | ffi::SQLITE_OPEN_URI
    }
}

/// Result of advancing a prepared statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum StepCode {
    Row,
    Done,
    /// Any code outside `{OK, DONE, ROW}`.
    Failed(i32),
}

impl StepCode {
    pub(crate) fn from_raw(code: i32) -> Self {
        match code {
            ffi::SQLITE_ROW => StepCode::Row,
            // OK is not produced by step for v2 statements, but is accepted as completion.
            ffi::SQLITE_DONE | ffi::SQLITE_OK => StepCode::Done,
            other => StepCode::Failed(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_codes_accept_ok_done_row() {
        assert_eq!(StepCode::from_raw(ffi::SQLITE_ROW), StepCode::Row);
        assert_eq!(StepCode::from_raw(ffi::SQLITE_DONE), StepCode::Done);
        assert_eq!(StepCode::from_raw(ffi::SQLITE_OK), StepCode::Done);
        assert_eq!(
            StepCode::from_raw(rusqlite::ffi::SQLITE_BUSY),
            StepCode::Failed(rusqlite::ffi::SQLITE_BUSY)
        );
    }

    #[test]
    fn flags_map_to_engine_bits() {
        let reader = OpenFlags::read_only().to_raw();
        assert_ne!(reader & ffi::SQLITE_OPEN_READONLY, 0);
        assert_ne!(reader & ffi::SQLITE_OPEN_NOMUTEX, 0);
        assert_eq!(reader & ffi::SQLITE_OPEN_CREATE, 0);

        let writer = OpenFlags::read_write()
            .with_threading(ThreadingMode::FullMutex)
            .to_raw();
        assert_ne!(writer & ffi::SQLITE_OPEN_READWRITE, 0);
        assert_ne!(writer & ffi::SQLITE_OPEN_CREATE, 0);
        assert_ne!(writer & ffi::SQLITE_OPEN_FULLMUTEX, 0);
        assert_eq!(writer & ffi::SQLITE_OPEN_NOMUTEX, 0);
    }
}
