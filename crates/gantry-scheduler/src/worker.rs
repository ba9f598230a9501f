//! Worker tasks and their exit monitoring.

use std::sync::Arc;

use gantry_executor::BuildExecutor;
use tokio::sync::mpsc;
use tokio::task::JoinError;

use crate::coordinator::{Command, QueueEntry};

/// Identity of one spawned worker. Exit signals carry it so the
/// coordinator can discard signals from workers it no longer tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct WorkerId(pub(crate) u64);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Why a worker stopped.
#[derive(Debug, Clone)]
pub(crate) enum WorkerOutcome {
    /// The executor returned; the build record is already terminal.
    Completed,
    /// The worker task died without finishing its build.
    Crashed(String),
}

/// The build currently occupying the worker slot.
#[derive(Debug)]
pub(crate) struct ActiveWorker {
    pub id: WorkerId,
    pub entry: QueueEntry,
}

/// Spawn a worker task for `entry`, plus a monitor that reports the
/// worker's exit back to the coordinator. The monitor sends exactly
/// one `WorkerExited` per worker, however the task ends.
pub(crate) fn spawn_worker(
    id: WorkerId,
    entry: QueueEntry,
    executor: Arc<BuildExecutor>,
    events: mpsc::UnboundedSender<Command>,
) -> ActiveWorker {
    let worker =
        tokio::spawn(async move { executor.run(entry.project_id, entry.build_id).await });

    tokio::spawn(async move {
        let outcome = match worker.await {
            Ok(Ok(())) => WorkerOutcome::Completed,
            Ok(Err(err)) => WorkerOutcome::Crashed(err.to_string()),
            Err(join_err) => WorkerOutcome::Crashed(describe_join_error(join_err)),
        };
        // The coordinator may already be gone during shutdown.
        let _ = events.send(Command::WorkerExited { worker: id, outcome });
    });

    ActiveWorker { id, entry }
}

fn describe_join_error(err: JoinError) -> String {
    if !err.is_panic() {
        return "worker task was cancelled".to_string();
    }
    let payload = err.into_panic();
    if let Some(message) = payload.downcast_ref::<String>() {
        format!("worker panicked: {}", message)
    } else if let Some(message) = payload.downcast_ref::<&'static str>() {
        format!("worker panicked: {}", message)
    } else {
        "worker panicked".to_string()
    }
}
