//! The build queue coordinator.
//!
//! A single task owns the pending queue and the one worker slot; all
//! interaction goes through its command channel. Builds run strictly
//! one at a time in arrival order, and a dead worker takes down its
//! own build only.

use std::collections::VecDeque;
use std::sync::Arc;

use gantry_core::{BuildId, BuildStatus, HookEvent, HookSink, ProjectId};
use gantry_executor::BuildExecutor;
use gantry_store::BuildStore;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::worker::{ActiveWorker, WorkerId, WorkerOutcome, spawn_worker};

/// One queued build.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueEntry {
    pub project_id: ProjectId,
    pub build_id: BuildId,
}

/// Messages handled by the coordinator task.
#[derive(Debug)]
pub(crate) enum Command {
    Enqueue(QueueEntry),
    WorkerExited {
        worker: WorkerId,
        outcome: WorkerOutcome,
    },
    Snapshot(oneshot::Sender<QueueSnapshot>),
}

/// Point-in-time view of the queue.
#[derive(Debug, Clone)]
pub struct QueueSnapshot {
    /// Builds waiting behind the active one, front first.
    pub pending: Vec<QueueEntry>,
    /// The build occupying the worker slot, if any.
    pub running: Option<QueueEntry>,
}

/// Handle to the coordinator. Cheap to clone; every clone feeds the
/// same queue.
#[derive(Clone)]
pub struct BuildQueue {
    tx: mpsc::UnboundedSender<Command>,
}

impl BuildQueue {
    /// Start the coordinator task and return a handle to it.
    pub fn start(
        executor: Arc<BuildExecutor>,
        builds: Arc<dyn BuildStore>,
        hooks: Arc<dyn HookSink>,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let coordinator = Coordinator {
            executor,
            builds,
            hooks,
            events: tx.clone(),
            pending: VecDeque::new(),
            slot: None,
            next_worker: 0,
        };
        tokio::spawn(coordinator.run(rx));
        Self { tx }
    }

    /// Add a build to the back of the queue. Accepting never waits on
    /// the build that is currently running.
    pub fn enqueue(&self, project_id: ProjectId, build_id: BuildId) {
        let entry = QueueEntry {
            project_id,
            build_id,
        };
        if self.tx.send(Command::Enqueue(entry)).is_err() {
            warn!(build_id = %build_id, "Build queue is shut down, dropping enqueue");
        }
    }

    /// Current queue contents. `None` if the coordinator is gone.
    pub async fn snapshot(&self) -> Option<QueueSnapshot> {
        let (tx, rx) = oneshot::channel();
        self.tx.send(Command::Snapshot(tx)).ok()?;
        rx.await.ok()
    }
}

struct Coordinator {
    executor: Arc<BuildExecutor>,
    builds: Arc<dyn BuildStore>,
    hooks: Arc<dyn HookSink>,
    /// Cloned into each worker monitor so exits come back as commands.
    events: mpsc::UnboundedSender<Command>,
    pending: VecDeque<QueueEntry>,
    slot: Option<ActiveWorker>,
    next_worker: u64,
}

impl Coordinator {
    async fn run(mut self, mut rx: mpsc::UnboundedReceiver<Command>) {
        info!("Build queue coordinator started");
        while let Some(command) = rx.recv().await {
            match command {
                Command::Enqueue(entry) => self.on_enqueue(entry),
                Command::WorkerExited { worker, outcome } => {
                    self.on_worker_exited(worker, outcome).await;
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.snapshot());
                }
            }
        }
        debug!("Build queue coordinator stopped");
    }

    fn snapshot(&self) -> QueueSnapshot {
        QueueSnapshot {
            pending: self.pending.iter().copied().collect(),
            running: self.slot.as_ref().map(|active| active.entry),
        }
    }

    fn on_enqueue(&mut self, entry: QueueEntry) {
        debug!(
            build_id = %entry.build_id,
            pending = self.pending.len(),
            "Build enqueued"
        );
        self.pending.push_back(entry);
        if self.slot.is_none() {
            self.start_next();
        }
    }

    /// Pop the queue head into the worker slot.
    fn start_next(&mut self) {
        let Some(entry) = self.pending.pop_front() else {
            debug!("Build queue idle");
            return;
        };
        let id = WorkerId(self.next_worker);
        self.next_worker += 1;
        info!(
            worker = %id,
            build_id = %entry.build_id,
            project_id = %entry.project_id,
            "Starting build worker"
        );
        self.slot = Some(spawn_worker(
            id,
            entry,
            Arc::clone(&self.executor),
            self.events.clone(),
        ));
    }

    async fn on_worker_exited(&mut self, worker: WorkerId, outcome: WorkerOutcome) {
        let entry = match &self.slot {
            Some(active) if active.id == worker => active.entry,
            Some(active) => {
                debug!(worker = %worker, current = %active.id, "Ignoring stale worker exit");
                return;
            }
            None => {
                debug!(worker = %worker, "Ignoring worker exit with an empty slot");
                return;
            }
        };
        self.slot = None;

        match outcome {
            WorkerOutcome::Completed => {
                debug!(worker = %worker, build_id = %entry.build_id, "Worker finished");
            }
            WorkerOutcome::Crashed(reason) => {
                error!(
                    worker = %worker,
                    build_id = %entry.build_id,
                    reason = %reason,
                    "Build worker died, failing its build"
                );
                self.fail_crashed_build(entry, &reason).await;
            }
        }
        self.start_next();
    }

    /// Crash recovery. A dead worker's build would otherwise sit in
    /// `Building` forever, so force it to `Failed`. The guarded
    /// transition keeps this away from builds the worker did finish
    /// before dying.
    async fn fail_crashed_build(&self, entry: QueueEntry, reason: &str) {
        let mut build = match self.builds.get(entry.project_id, entry.build_id).await {
            Ok(build) => build,
            Err(err) => {
                error!(build_id = %entry.build_id, error = %err, "Failed to load crashed build");
                return;
            }
        };
        if !build.try_finish(BuildStatus::Failed, None) {
            return;
        }
        build.append_output(format!("build aborted: {}", reason));
        if let Err(err) = self.builds.update(&build).await {
            error!(build_id = %entry.build_id, error = %err, "Failed to record crashed build");
            return;
        }
        self.hooks
            .notify(HookEvent::Failed, entry.project_id, entry.build_id);
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use gantry_core::{Build, CommandRunner, ExecFailure, GitClient, LogHookSink, Project};
    use gantry_executor::{ExecutorConfig, ProcessShell};
    use gantry_store::{MemoryBuildStore, MemoryProjectStore};

    use super::*;

    struct FakeGit;

    #[async_trait]
    impl GitClient for FakeGit {
        async fn clone_repo(
            &self,
            _remote_url: &str,
            _local_path: &Path,
        ) -> Result<String, ExecFailure> {
            Ok(String::new())
        }

        async fn checkout(
            &self,
            _local_path: &Path,
            _git_ref: &str,
        ) -> Result<String, ExecFailure> {
            Ok(String::new())
        }
    }

    /// Releases the busy flag even when the command future is aborted
    /// mid-run.
    struct BusyGuard<'a>(&'a AtomicBool);

    impl Drop for BusyGuard<'_> {
        fn drop(&mut self) {
            self.0.store(false, Ordering::SeqCst);
        }
    }

    /// Shell fake that records command order and whether two commands
    /// ever ran at the same time. Commands script their own behavior:
    /// `say X` echoes, `die N` fails with code N, `hang` never
    /// returns, `explode` panics.
    #[derive(Default)]
    struct ScriptedShell {
        busy: AtomicBool,
        overlapped: AtomicBool,
        log: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl CommandRunner for ScriptedShell {
        async fn run(&self, command: &str, _working_dir: &Path) -> Result<String, ExecFailure> {
            if self.busy.swap(true, Ordering::SeqCst) {
                self.overlapped.store(true, Ordering::SeqCst);
            }
            let _guard = BusyGuard(&self.busy);
            self.log.lock().unwrap().push(command.to_string());
            tokio::time::sleep(Duration::from_millis(20)).await;

            if let Some(text) = command.strip_prefix("say ") {
                return Ok(text.to_string());
            }
            if let Some(code) = command.strip_prefix("die ") {
                let exit_code: i32 = code.parse().unwrap();
                return Err(ExecFailure {
                    output: String::new(),
                    exit_code,
                    reason: format!("command exited with code {}", exit_code),
                });
            }
            match command {
                "hang" => {
                    tokio::time::sleep(Duration::from_secs(3600)).await;
                    Ok(String::new())
                }
                "explode" => panic!("shell exploded"),
                _ => Ok(String::new()),
            }
        }
    }

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<(HookEvent, BuildId)>>,
    }

    impl RecordingHooks {
        fn for_build(&self, build_id: BuildId) -> Vec<HookEvent> {
            self.events
                .lock()
                .unwrap()
                .iter()
                .filter(|(_, id)| *id == build_id)
                .map(|(event, _)| *event)
                .collect()
        }
    }

    impl HookSink for RecordingHooks {
        fn notify(&self, event: HookEvent, _project_id: ProjectId, build_id: BuildId) {
            self.events.lock().unwrap().push((event, build_id));
        }
    }

    struct QueueHarness {
        projects: Arc<MemoryProjectStore>,
        builds: Arc<MemoryBuildStore>,
        hooks: Arc<RecordingHooks>,
        shell: Arc<ScriptedShell>,
        queue: BuildQueue,
    }

    fn start_queue(timeout: Duration) -> QueueHarness {
        let projects = Arc::new(MemoryProjectStore::new());
        let builds = Arc::new(MemoryBuildStore::new());
        let hooks = Arc::new(RecordingHooks::default());
        let shell = Arc::new(ScriptedShell::default());
        let executor = Arc::new(gantry_executor::BuildExecutor::new(
            projects.clone(),
            builds.clone(),
            Arc::new(FakeGit),
            shell.clone(),
            hooks.clone(),
            ExecutorConfig::new(timeout),
        ));
        let queue = BuildQueue::start(executor, builds.clone(), hooks.clone());
        QueueHarness {
            projects,
            builds,
            hooks,
            shell,
            queue,
        }
    }

    async fn seed(
        projects: &MemoryProjectStore,
        builds: &MemoryBuildStore,
        steps: &[&str],
    ) -> (ProjectId, BuildId) {
        let project = Project::new("svc", "https://example.com/svc.git", std::env::temp_dir())
            .with_build_steps(steps.iter().map(|s| s.to_string()).collect());
        let build = Build::new(project.id, "queued build", "main", "dev");
        let ids = (project.id, build.id);
        projects.insert(project).await;
        builds.insert(build).await;
        ids
    }

    async fn wait_terminal(
        builds: &MemoryBuildStore,
        project_id: ProjectId,
        build_id: BuildId,
    ) -> Build {
        for _ in 0..500 {
            let build = builds.get(project_id, build_id).await.unwrap();
            if build.status.is_terminal() {
                return build;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("build {} never reached a terminal status", build_id);
    }

    #[tokio::test]
    async fn test_builds_run_in_order() {
        let harness = start_queue(Duration::from_secs(30));
        let (p1, b1) = seed(&harness.projects, &harness.builds, &["say one", "say two"]).await;
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["die 1"]).await;

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p2, b2);

        let first = wait_terminal(&harness.builds, p1, b1).await;
        let second = wait_terminal(&harness.builds, p2, b2).await;

        assert_eq!(first.status, BuildStatus::Success);
        assert_eq!(first.exit_code, Some(0));
        assert_eq!(second.status, BuildStatus::Failed);
        assert_eq!(second.exit_code, Some(1));

        assert!(!harness.shell.overlapped.load(Ordering::SeqCst));
        assert_eq!(
            *harness.shell.log.lock().unwrap(),
            vec!["say one", "say two", "die 1"]
        );

        assert_eq!(
            harness.hooks.for_build(b1),
            vec![HookEvent::Building, HookEvent::Success]
        );
        assert_eq!(
            harness.hooks.for_build(b2),
            vec![HookEvent::Building, HookEvent::Failed]
        );
    }

    #[tokio::test]
    async fn test_timeout_frees_the_queue() {
        let harness = start_queue(Duration::from_millis(150));
        let (p1, b1) = seed(&harness.projects, &harness.builds, &["hang"]).await;
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["say fine"]).await;

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p2, b2);

        let first = wait_terminal(&harness.builds, p1, b1).await;
        assert_eq!(first.status, BuildStatus::TimedOut);
        assert!(first.transcript().contains("timed out"));
        assert_eq!(
            harness.hooks.for_build(b1),
            vec![HookEvent::Building, HookEvent::Failed]
        );

        let second = wait_terminal(&harness.builds, p2, b2).await;
        assert_eq!(second.status, BuildStatus::Success);
    }

    #[tokio::test]
    async fn test_crashed_worker_recovery() {
        let harness = start_queue(Duration::from_secs(30));
        let (p1, b1) = seed(&harness.projects, &harness.builds, &["explode"]).await;
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["say still here"]).await;

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p2, b2);

        let crashed = wait_terminal(&harness.builds, p1, b1).await;
        assert_eq!(crashed.status, BuildStatus::Failed);
        assert_eq!(crashed.exit_code, None);
        let transcript = crashed.transcript();
        assert!(transcript.contains("build aborted"));
        assert!(transcript.contains("shell exploded"));
        assert_eq!(
            harness.hooks.for_build(b1),
            vec![HookEvent::Building, HookEvent::Failed]
        );

        let survivor = wait_terminal(&harness.builds, p2, b2).await;
        assert_eq!(survivor.status, BuildStatus::Success);
    }

    #[tokio::test]
    async fn test_missing_project_crash() {
        let harness = start_queue(Duration::from_secs(30));
        let orphan = Build::new(ProjectId::new(), "orphan", "main", "dev");
        let (p1, b1) = (orphan.project_id, orphan.id);
        harness.builds.insert(orphan).await;
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["say recovered"]).await;

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p2, b2);

        let failed = wait_terminal(&harness.builds, p1, b1).await;
        assert_eq!(failed.status, BuildStatus::Failed);
        assert!(failed.transcript().contains("build aborted"));

        let survivor = wait_terminal(&harness.builds, p2, b2).await;
        assert_eq!(survivor.status, BuildStatus::Success);
    }

    #[tokio::test]
    async fn test_snapshot_contents() {
        let harness = start_queue(Duration::from_secs(30));
        let (p1, b1) = seed(&harness.projects, &harness.builds, &["hang"]).await;
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["say waiting"]).await;

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p2, b2);
        tokio::time::sleep(Duration::from_millis(50)).await;

        let snapshot = harness.queue.snapshot().await.unwrap();
        assert_eq!(
            snapshot.running,
            Some(QueueEntry {
                project_id: p1,
                build_id: b1
            })
        );
        assert_eq!(
            snapshot.pending,
            vec![QueueEntry {
                project_id: p2,
                build_id: b2
            }]
        );
    }

    #[tokio::test]
    async fn test_stale_worker_exit_ignored() {
        let harness = start_queue(Duration::from_secs(30));
        let (p1, b1) = seed(&harness.projects, &harness.builds, &["say busy"]).await;
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["say next"]).await;

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p2, b2);
        // Forged exit from a worker the coordinator never spawned. It
        // must not free the slot or touch the running build.
        harness
            .queue
            .tx
            .send(Command::WorkerExited {
                worker: WorkerId(9999),
                outcome: WorkerOutcome::Crashed("forged".to_string()),
            })
            .unwrap();

        let first = wait_terminal(&harness.builds, p1, b1).await;
        let second = wait_terminal(&harness.builds, p2, b2).await;
        assert_eq!(first.status, BuildStatus::Success);
        assert_eq!(second.status, BuildStatus::Success);
        assert!(!harness.shell.overlapped.load(Ordering::SeqCst));
        assert_eq!(
            harness.hooks.for_build(b1),
            vec![HookEvent::Building, HookEvent::Success]
        );
        assert_eq!(
            harness.hooks.for_build(b2),
            vec![HookEvent::Building, HookEvent::Success]
        );

        // Let the slot drain, then send an exit with no worker at all.
        // The queue must keep accepting builds afterwards.
        for _ in 0..500 {
            if harness.queue.snapshot().await.unwrap().running.is_none() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        harness
            .queue
            .tx
            .send(Command::WorkerExited {
                worker: WorkerId(9999),
                outcome: WorkerOutcome::Completed,
            })
            .unwrap();
        let (p3, b3) = seed(&harness.projects, &harness.builds, &["say again"]).await;
        harness.queue.enqueue(p3, b3);
        let third = wait_terminal(&harness.builds, p3, b3).await;
        assert_eq!(third.status, BuildStatus::Success);
    }

    #[tokio::test]
    async fn test_duplicate_enqueue_runs_once() {
        let harness = start_queue(Duration::from_secs(30));
        let (p1, b1) = seed(&harness.projects, &harness.builds, &["say once"]).await;
        let entry = QueueEntry {
            project_id: p1,
            build_id: b1,
        };

        harness.queue.enqueue(p1, b1);
        harness.queue.enqueue(p1, b1);

        // No dedup: the second submission waits its turn in line.
        let snapshot = harness.queue.snapshot().await.unwrap();
        assert_eq!(snapshot.running, Some(entry));
        assert_eq!(snapshot.pending, vec![entry]);

        wait_terminal(&harness.builds, p1, b1).await;
        // A build enqueued behind the duplicate finishes only after the
        // duplicate's turn has come and gone.
        let (p2, b2) = seed(&harness.projects, &harness.builds, &["say after"]).await;
        harness.queue.enqueue(p2, b2);
        wait_terminal(&harness.builds, p2, b2).await;

        let rerun = harness.builds.get(p1, b1).await.unwrap();
        assert_eq!(rerun.status, BuildStatus::Success);
        assert_eq!(rerun.exit_code, Some(0));
        assert_eq!(
            harness.hooks.for_build(b1),
            vec![HookEvent::Building, HookEvent::Success]
        );
        assert_eq!(
            *harness.shell.log.lock().unwrap(),
            vec!["say once", "say after"]
        );
    }

    /// Same wiring as [`start_queue`] but over the real shell. Hook
    /// assertions live with the scripted-shell tests.
    fn start_shell_queue(
        timeout: Duration,
    ) -> (Arc<MemoryProjectStore>, Arc<MemoryBuildStore>, BuildQueue) {
        let projects = Arc::new(MemoryProjectStore::new());
        let builds = Arc::new(MemoryBuildStore::new());
        let executor = Arc::new(gantry_executor::BuildExecutor::new(
            projects.clone(),
            builds.clone(),
            Arc::new(FakeGit),
            Arc::new(ProcessShell),
            Arc::new(LogHookSink),
            ExecutorConfig::new(timeout),
        ));
        let queue = BuildQueue::start(executor, builds.clone(), Arc::new(LogHookSink));
        (projects, builds, queue)
    }

    #[tokio::test]
    async fn test_real_shell_exit_codes() {
        let (projects, builds, queue) = start_shell_queue(Duration::from_secs(30));
        let (p1, b1) = seed(&projects, &builds, &["echo hello from the build"]).await;
        let (p2, b2) = seed(&projects, &builds, &["exit 1"]).await;

        queue.enqueue(p1, b1);
        queue.enqueue(p2, b2);

        let first = wait_terminal(&builds, p1, b1).await;
        assert_eq!(first.status, BuildStatus::Success);
        assert_eq!(first.exit_code, Some(0));
        assert!(first.transcript().contains("$ echo hello from the build"));
        assert!(first.transcript().contains("hello from the build"));

        let second = wait_terminal(&builds, p2, b2).await;
        assert_eq!(second.status, BuildStatus::Failed);
        assert_eq!(second.exit_code, Some(1));
        assert!(second.transcript().contains("command exited with code 1"));
    }

    #[tokio::test]
    async fn test_real_shell_timeout() {
        let (projects, builds, queue) = start_shell_queue(Duration::from_millis(200));
        let (p1, b1) = seed(&projects, &builds, &["sleep 60"]).await;
        let (p2, b2) = seed(&projects, &builds, &["echo recovered"]).await;

        queue.enqueue(p1, b1);
        queue.enqueue(p2, b2);

        let timed_out = wait_terminal(&builds, p1, b1).await;
        assert_eq!(timed_out.status, BuildStatus::TimedOut);
        assert_eq!(timed_out.exit_code, None);
        assert!(timed_out.transcript().contains("timed out"));

        let second = wait_terminal(&builds, p2, b2).await;
        assert_eq!(second.status, BuildStatus::Success);
        assert!(second.transcript().contains("recovered"));
    }
}
