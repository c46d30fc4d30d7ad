//! Strictly serial access to one connection.
//!
//! A [`SerialAccessQueue`] owns a dedicated worker thread that owns the connection. Work items
//! are sent over a channel and executed one at a time in the order the worker receives them;
//! the submitting thread blocks until its item finishes.

mod channel;
mod dispatcher;

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

use crate::connection::{ConnectionHandle, RollbackRequest, TransactionMode};
use crate::engine::OpenFlags;
use crate::error::{Result, SqliteAccessError};

use channel::{Command, QueueId, Responder};
use dispatcher::{ConnectionSlot, Opener, active_queues, run_serial_worker};

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

/// One connection, one worker thread, one work item at a time.
///
/// Submitting to a queue from inside one of its own work items (directly, or through another
/// queue) is rejected with [`SqliteAccessError::Misuse`] instead of deadlocking.
pub struct SerialAccessQueue {
    id: QueueId,
    label: String,
    sender: Sender<Command>,
    worker: Option<JoinHandle<()>>,
}

impl SerialAccessQueue {
    /// Create a queue whose connection is opened on the worker thread by the first work item.
    ///
    /// An open failure is returned to that work item's submitter; the next submission tries
    /// again.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::ConnectionError`] if the worker thread cannot be spawned.
    pub fn open(
        path: impl AsRef<Path>,
        flags: OpenFlags,
        label: impl Into<String>,
        cache_statements: bool,
    ) -> Result<Self> {
        let opener = Opener {
            path: path.as_ref().to_path_buf(),
            flags,
            cache_statements,
        };
        Self::spawn(label.into(), ConnectionSlot::lazy(opener))
    }

    /// Wrap an already open connection.
    ///
    /// # Errors
    /// Returns [`SqliteAccessError::ConnectionError`] if the worker thread cannot be spawned.
    pub fn new(handle: ConnectionHandle, label: impl Into<String>) -> Result<Self> {
        Self::spawn(label.into(), ConnectionSlot::ready(handle))
    }

    fn spawn(label: String, slot: ConnectionSlot) -> Result<Self> {
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel::<Command>();
        let worker_label = label.clone();
        let worker = thread::Builder::new()
            .name(format!("sqlite-serial-{label}"))
            .spawn(move || run_serial_worker(id, &worker_label, slot, &receiver))
            .map_err(|err| {
                SqliteAccessError::ConnectionError(format!(
                    "failed to spawn serial queue worker `{label}`: {err}"
                ))
            })?;
        Ok(Self {
            id,
            label,
            sender,
            worker: Some(worker),
        })
    }

    #[must_use]
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Run `work` against the queue's connection and wait for its result.
    ///
    /// No transaction is opened or closed around `work`. A panic inside `work` is caught and
    /// reported as [`SqliteAccessError::WorkItemPanicked`]; the queue keeps serving.
    ///
    /// # Errors
    /// - [`SqliteAccessError::Misuse`] when called from inside a work item already running on
    ///   this queue.
    /// - [`SqliteAccessError::Open`] when the lazily opened connection cannot be opened.
    /// - [`SqliteAccessError::ConnectionError`] when the worker is gone.
    /// - Whatever `work` returns.
    pub fn run<R, F>(&self, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let active = active_queues();
        if active.contains(&self.id) {
            tracing::warn!(queue = %self.label, "re-entrant submission rejected");
            return Err(SqliteAccessError::Misuse(format!(
                "re-entrant submission to serial queue `{}` would deadlock",
                self.label
            )));
        }

        let (respond_to, response) = mpsc::sync_channel(1);
        let label = self.label.clone();
        let job = Box::new(move |slot: &mut ConnectionSlot| {
            let outcome = slot
                .connection()
                .and_then(|conn| guarded(&label, || work(conn)));
            answer(&respond_to, outcome);
        });

        self.sender
            .send(Command::Run { active, job })
            .map_err(|_| self.worker_gone())?;
        response.recv().map_err(|_| self.worker_gone())?
    }

    /// Run `work` inside an explicit transaction.
    ///
    /// The transaction commits when `work` returns `Ok` without calling
    /// [`RollbackRequest::request`], and rolls back otherwise. When `work` fails (or panics)
    /// its own error is returned and a failing rollback is only logged. When the closing
    /// commit or rollback fails, that error is returned; the explicit-transaction flag is
    /// cleared either way.
    ///
    /// # Errors
    /// Everything [`run`](Self::run) returns, plus
    /// [`SqliteAccessError::Transaction`] from begin, commit or rollback.
    pub fn run_in_transaction<R, F>(&self, mode: TransactionMode, work: F) -> Result<R>
    where
        F: FnOnce(&ConnectionHandle, &mut RollbackRequest) -> Result<R> + Send + 'static,
        R: Send + 'static,
    {
        let label = self.label.clone();
        self.run(move |conn| {
            conn.begin_explicit(mode)?;
            let mut rollback = RollbackRequest::default();
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| work(conn, &mut rollback)));
            match outcome {
                Ok(Ok(value)) if rollback.is_requested() => {
                    conn.rollback_explicit()?;
                    Ok(value)
                }
                Ok(Ok(value)) => {
                    conn.commit_explicit()?;
                    Ok(value)
                }
                Ok(Err(err)) => {
                    rollback_after_failure(conn, &label);
                    Err(err)
                }
                Err(payload) => {
                    rollback_after_failure(conn, &label);
                    panic::resume_unwind(payload)
                }
            }
        })
    }

    fn worker_gone(&self) -> SqliteAccessError {
        SqliteAccessError::ConnectionError(format!(
            "serial queue `{}` worker stopped",
            self.label
        ))
    }
}

fn guarded<R>(label: &str, work: impl FnOnce() -> Result<R>) -> Result<R> {
    panic::catch_unwind(AssertUnwindSafe(work)).unwrap_or_else(|_| {
        tracing::warn!(queue = label, "work item panicked");
        Err(SqliteAccessError::WorkItemPanicked(label.to_owned()))
    })
}

fn answer<R>(respond_to: &Responder<R>, outcome: Result<R>) {
    // The submitter is blocked in `recv`; it only goes away if its thread died.
    let _ = respond_to.send(outcome);
}

fn rollback_after_failure(conn: &ConnectionHandle, label: &str) {
    if let Err(err) = conn.rollback_explicit() {
        tracing::warn!(queue = label, error = %err, "rollback after failed work item also failed");
    }
}

impl fmt::Debug for SerialAccessQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SerialAccessQueue")
            .field("id", &self.id)
            .field("label", &self.label)
            .finish_non_exhaustive()
    }
}

impl Drop for SerialAccessQueue {
    fn drop(&mut self) {
        let _ = self.sender.send(Command::Shutdown);
        if let Some(worker) = self.worker.take() {
            // Dropped from one of our own work items: the worker exits after that item returns.
            if worker.thread().id() == thread::current().id() {
                return;
            }
            if worker.join().is_err() {
                tracing::warn!(queue = %self.label, "serial worker thread panicked");
            }
        }
    }
}
