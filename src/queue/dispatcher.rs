use std::cell::RefCell;
use std::path::PathBuf;
use std::sync::mpsc::Receiver;

use crate::connection::ConnectionHandle;
use crate::engine::OpenFlags;
use crate::error::{Result, SqliteAccessError};

use super::channel::{Command, QueueId};

thread_local! {
    static ACTIVE_QUEUES: RefCell<Vec<QueueId>> = const { RefCell::new(Vec::new()) };
}

/// Queues whose work items are executing on the current call chain, outermost first.
pub(super) fn active_queues() -> Vec<QueueId> {
    ACTIVE_QUEUES.with(|active| active.borrow().clone())
}

/// Restores the worker thread's active-queue stack when a work item finishes.
struct ActiveScope {
    previous: Vec<QueueId>,
}

impl ActiveScope {
    fn enter(mut chain: Vec<QueueId>, queue: QueueId) -> Self {
        chain.push(queue);
        let previous = ACTIVE_QUEUES.with(|active| active.replace(chain));
        Self { previous }
    }
}

impl Drop for ActiveScope {
    fn drop(&mut self) {
        let previous = std::mem::take(&mut self.previous);
        ACTIVE_QUEUES.with(|active| {
            active.replace(previous);
        });
    }
}

pub(super) struct Opener {
    pub(super) path: PathBuf,
    pub(super) flags: OpenFlags,
    pub(super) cache_statements: bool,
}

/// The queue's connection, opened on the worker thread the first time a job needs it.
pub(crate) struct ConnectionSlot {
    handle: Option<ConnectionHandle>,
    opener: Option<Opener>,
}

impl ConnectionSlot {
    pub(super) fn lazy(opener: Opener) -> Self {
        Self {
            handle: None,
            opener: Some(opener),
        }
    }

    pub(super) fn ready(handle: ConnectionHandle) -> Self {
        Self {
            handle: Some(handle),
            opener: None,
        }
    }

    /// The open connection, opening it now if needed. A failed open is retried next time.
    pub(super) fn connection(&mut self) -> Result<&ConnectionHandle> {
        if self.handle.is_none() {
            let opener = self.opener.as_ref().ok_or_else(|| {
                SqliteAccessError::ConnectionError("serial queue has no connection".into())
            })?;
            let handle = ConnectionHandle::open(&opener.path, opener.flags)?
                .with_statement_cache(opener.cache_statements);
            self.handle = Some(handle);
        }
        self.handle.as_ref().ok_or_else(|| {
            SqliteAccessError::ConnectionError("serial queue connection unavailable".into())
        })
    }
}

pub(super) fn run_serial_worker(
    queue: QueueId,
    label: &str,
    mut slot: ConnectionSlot,
    receiver: &Receiver<Command>,
) {
    tracing::debug!(queue = label, "serial worker started");
    while let Ok(command) = receiver.recv() {
        match command {
            Command::Shutdown => break,
            Command::Run { active, job } => {
                let _scope = ActiveScope::enter(active, queue);
                job(&mut slot);
            }
        }
    }
    tracing::debug!(queue = label, "serial worker stopped");
}
