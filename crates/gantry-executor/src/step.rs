//! Step dispatch.

use std::sync::Arc;

use gantry_core::{BuildStep, CommandRunner, ExecFailure, GitClient, Project};
use tracing::info;

/// Routes pipeline steps to the right process collaborator.
#[derive(Clone)]
pub struct StepRunner {
    git: Arc<dyn GitClient>,
    shell: Arc<dyn CommandRunner>,
}

impl StepRunner {
    pub fn new(git: Arc<dyn GitClient>, shell: Arc<dyn CommandRunner>) -> Self {
        Self { git, shell }
    }

    /// Clone the project's remote if the working copy is missing.
    /// Returns the clone output, or `None` when the copy already
    /// exists.
    pub async fn ensure_workspace(&self, project: &Project) -> Result<Option<String>, ExecFailure> {
        if project.local_path.exists() {
            return Ok(None);
        }
        info!(
            project = %project.name,
            path = %project.local_path.display(),
            "Working copy missing, cloning"
        );
        self.git
            .clone_repo(&project.remote_url, &project.local_path)
            .await
            .map(Some)
    }

    /// Run one pipeline step in the project working copy.
    pub async fn run(&self, project: &Project, step: &BuildStep) -> Result<String, ExecFailure> {
        match step {
            BuildStep::Checkout { git_ref } => {
                self.git.checkout(&project.local_path, git_ref).await
            }
            BuildStep::Command { command } => {
                self.shell.run(command, &project.local_path).await
            }
        }
    }
}
