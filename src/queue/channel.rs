use std::sync::mpsc::SyncSender;

use crate::error::Result;

use super::dispatcher::ConnectionSlot;

pub(super) type QueueId = u64;

/// Type-erased work item; it answers on its own response channel.
pub(super) type Job = Box<dyn FnOnce(&mut ConnectionSlot) + Send>;

pub(super) type Responder<R> = SyncSender<Result<R>>;

pub(super) enum Command {
    Run {
        /// Queues already running work further up the submitting call chain.
        active: Vec<QueueId>,
        job: Job,
    },
    Shutdown,
}

