//! Git operations via the `git` binary.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use gantry_core::{ExecFailure, GitClient};
use tokio::process::Command;
use tracing::{debug, info};

use crate::shell::combine_output;

/// Talks to the `git` binary on the build host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessGit;

impl ProcessGit {
    async fn capture(mut command: Command, action: &str) -> Result<String, ExecFailure> {
        let output = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                ExecFailure::bare(-1, format!("failed to run git {}: {}", action, err))
            })?;

        let text = combine_output(&output.stdout, &output.stderr);
        if output.status.success() {
            return Ok(text);
        }
        let exit_code = output.status.code().unwrap_or(-1);
        Err(ExecFailure {
            output: text,
            exit_code,
            reason: format!("git {} failed with exit code {}", action, exit_code),
        })
    }
}

#[async_trait]
impl GitClient for ProcessGit {
    async fn clone_repo(&self, remote_url: &str, local_path: &Path) -> Result<String, ExecFailure> {
        info!(remote = %remote_url, path = %local_path.display(), "Cloning repository");
        let mut command = Command::new("git");
        command.args(["clone", remote_url]).arg(local_path);
        Self::capture(command, "clone").await
    }

    async fn checkout(&self, local_path: &Path, git_ref: &str) -> Result<String, ExecFailure> {
        debug!(path = %local_path.display(), git_ref = %git_ref, "Checking out ref");
        let mut command = Command::new("git");
        command.args(["checkout", git_ref]).current_dir(local_path);
        Self::capture(command, "checkout").await
    }
}
