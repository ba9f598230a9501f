//! Build execution.
//!
//! One [`BuildExecutor::run`] call drives a single build end to end:
//! status transitions, the step pipeline, incremental output
//! persistence, timeout enforcement, and lifecycle hooks.

use std::sync::Arc;

use gantry_core::{
    Build, BuildId, BuildStatus, CommandRunner, ExecFailure, GitClient, HookEvent, HookSink,
    Project, ProjectId, build_pipeline,
};
use gantry_store::{BuildStore, ProjectStore, StoreError};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::config::ExecutorConfig;
use crate::guard;
use crate::step::StepRunner;

/// Errors that abort a run without finishing the build record.
///
/// Anything here means the executor itself could not keep going, not
/// that the build's steps failed. The scheduler treats such an exit as
/// a worker crash and force-fails the build.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// How the pipeline task ended when left to run on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PipelineOutcome {
    Succeeded,
    Failed { exit_code: i32 },
}

/// Executes builds one at a time on behalf of the scheduler.
pub struct BuildExecutor {
    projects: Arc<dyn ProjectStore>,
    builds: Arc<dyn BuildStore>,
    steps: StepRunner,
    hooks: Arc<dyn HookSink>,
    config: ExecutorConfig,
}

impl BuildExecutor {
    pub fn new(
        projects: Arc<dyn ProjectStore>,
        builds: Arc<dyn BuildStore>,
        git: Arc<dyn GitClient>,
        shell: Arc<dyn CommandRunner>,
        hooks: Arc<dyn HookSink>,
        config: ExecutorConfig,
    ) -> Self {
        Self {
            projects,
            builds,
            steps: StepRunner::new(git, shell),
            hooks,
            config,
        }
    }

    /// Run one build to a terminal status.
    ///
    /// Returns `Ok` whenever the record reached a terminal state, step
    /// failures and timeouts included. `Err` means the executor lost
    /// its storage mid-build; the caller owns the cleanup.
    pub async fn run(&self, project_id: ProjectId, build_id: BuildId) -> Result<(), ExecutorError> {
        let project = self.projects.get(project_id).await?;
        let mut build = self.builds.get(project_id, build_id).await?;
        if build.status.is_terminal() {
            warn!(
                build_id = %build_id,
                status = %build.status,
                "Refusing to rerun a finished build"
            );
            return Ok(());
        }

        build.start();
        self.builds.update(&build).await?;
        self.hooks.notify(HookEvent::Building, project_id, build_id);
        info!(
            build_id = %build_id,
            project = %project.name,
            git_ref = %build.effective_ref(),
            "Build started"
        );

        // The pipeline runs as its own task so the guard can kill it
        // without killing this one; this task survives to finish the
        // record and dispatch the terminal hook.
        let pipeline = tokio::spawn(run_pipeline(
            project,
            build,
            Arc::clone(&self.builds),
            self.steps.clone(),
        ));
        let timeout = guard::arm_timeout(
            self.config.build_timeout,
            Arc::clone(&self.builds),
            project_id,
            build_id,
            pipeline.abort_handle(),
        );

        let (status, exit_code, note) = match pipeline.await {
            Ok(Ok(PipelineOutcome::Succeeded)) => {
                timeout.abort();
                (BuildStatus::Success, Some(0), None)
            }
            Ok(Ok(PipelineOutcome::Failed { exit_code })) => {
                timeout.abort();
                (BuildStatus::Failed, Some(exit_code), None)
            }
            Ok(Err(err)) => {
                timeout.abort();
                return Err(err.into());
            }
            Err(join_err) if join_err.is_panic() => {
                timeout.abort();
                std::panic::resume_unwind(join_err.into_panic());
            }
            // Cancelled means the guard fired. The guard stores the
            // timeout itself; re-finishing below is a no-op unless its
            // write never landed.
            Err(_) => (
                BuildStatus::TimedOut,
                None,
                Some(format!(
                    "build timed out after {:?}",
                    self.config.build_timeout
                )),
            ),
        };

        let stored = self.finish(project_id, build_id, status, exit_code, note).await?;
        info!(build_id = %build_id, status = %stored, "Build finished");
        if let Some(event) = HookEvent::terminal_for(stored) {
            self.hooks.notify(event, project_id, build_id);
        }
        Ok(())
    }

    /// Apply a terminal status to the freshly loaded record and return
    /// what actually ended up stored. A competing finisher's earlier
    /// result wins.
    async fn finish(
        &self,
        project_id: ProjectId,
        build_id: BuildId,
        status: BuildStatus,
        exit_code: Option<i32>,
        note: Option<String>,
    ) -> Result<BuildStatus, ExecutorError> {
        let mut build = self.builds.get(project_id, build_id).await?;
        if build.try_finish(status, exit_code) {
            if let Some(note) = note {
                build.append_output(note);
            }
            self.builds.update(&build).await?;
        }
        Ok(build.status)
    }
}

/// The inner pipeline task: clone if needed, then run each step,
/// persisting output as it arrives. Runs under the timeout guard's
/// abort handle and can disappear at any await point, so it never
/// writes a terminal status itself; the executor finishes the record
/// after this task ends.
async fn run_pipeline(
    project: Project,
    mut build: Build,
    builds: Arc<dyn BuildStore>,
    steps: StepRunner,
) -> Result<PipelineOutcome, StoreError> {
    match steps.ensure_workspace(&project).await {
        Ok(Some(clone_output)) => {
            build.append_output(format!("cloning {}", project.remote_url));
            if !clone_output.is_empty() {
                build.append_output(clone_output);
            }
            builds.update(&build).await?;
        }
        Ok(None) => {}
        Err(failure) => return abort_pipeline(build, &builds, failure).await,
    }

    for step in build_pipeline(&project, &build) {
        debug!(build_id = %build.id, step = %step.echo_line(), "Running step");
        build.append_output(step.echo_line());
        builds.update(&build).await?;

        match steps.run(&project, &step).await {
            Ok(output) => {
                if !output.is_empty() {
                    build.append_output(output);
                    builds.update(&build).await?;
                }
            }
            Err(failure) => {
                warn!(
                    build_id = %build.id,
                    step = %step.echo_line(),
                    exit_code = failure.exit_code,
                    "Step failed, aborting remaining steps"
                );
                return abort_pipeline(build, &builds, failure).await;
            }
        }
    }

    Ok(PipelineOutcome::Succeeded)
}

/// Record a failed step's output and reason, then stop the pipeline.
async fn abort_pipeline(
    mut build: Build,
    builds: &Arc<dyn BuildStore>,
    failure: ExecFailure,
) -> Result<PipelineOutcome, StoreError> {
    let ExecFailure {
        output,
        exit_code,
        reason,
    } = failure;
    if !output.is_empty() {
        build.append_output(output);
    }
    build.append_output(reason);
    builds.update(&build).await?;
    Ok(PipelineOutcome::Failed { exit_code })
}
