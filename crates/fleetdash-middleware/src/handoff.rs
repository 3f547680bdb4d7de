//! Cross-thread handoff between blocking callers and the connection worker.
//!
//! A caller builds a [`WorkerCommand`], keeps the matching [`Completion`],
//! queues the command and waits on the completion with a deadline.  The
//! worker answers through the [`Completer`] once the transport has taken the
//! message.  A caller that gives up early simply drops its end; the worker's
//! answer is then discarded.

use std::sync::mpsc;
use std::time::Duration;

use fleetdash_types::{FleetError, InstantActions, Order};

/// Unit of work queued to the worker.
#[derive(Debug)]
pub(crate) enum WorkerCommand {
    SendOrder { order: Order, reply: Completer },
    SendInstantActions { actions: InstantActions, reply: Completer },
    Disconnect { reply: Completer },
}

/// Worker-side end of a handoff.
#[derive(Debug)]
pub(crate) struct Completer {
    tx: mpsc::SyncSender<Result<(), FleetError>>,
}

impl Completer {
    pub(crate) fn complete(self, result: Result<(), FleetError>) {
        // The caller may already have timed out.
        let _ = self.tx.send(result);
    }
}

/// Caller-side end of a handoff.
#[derive(Debug)]
pub struct Completion {
    rx: mpsc::Receiver<Result<(), FleetError>>,
}

impl Completion {
    /// Block the calling thread until the worker answers or `timeout`
    /// elapses.
    ///
    /// Must not be called from the worker's own runtime.
    pub fn wait(self, timeout: Duration) -> Result<(), FleetError> {
        match self.rx.recv_timeout(timeout) {
            Ok(result) => result,
            Err(mpsc::RecvTimeoutError::Timeout) => Err(FleetError::DispatchTimeout(timeout)),
            Err(mpsc::RecvTimeoutError::Disconnected) => Err(FleetError::DispatchUnavailable(
                "worker stopped before answering".to_string(),
            )),
        }
    }
}

pub(crate) fn completion_pair() -> (Completer, Completion) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Completer { tx }, Completion { rx })
}
