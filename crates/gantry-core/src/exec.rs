//! Process-level collaborator traits.
//!
//! The executor reaches git and the shell only through these seams, so
//! tests can swap in in-memory fakes.

use std::path::Path;

use async_trait::async_trait;
use thiserror::Error;

/// A step that could not complete.
///
/// Carries everything needed to finish the build record: whatever
/// output the command produced before dying, the exit code to store,
/// and a one-line reason for the transcript.
#[derive(Debug, Clone, Error)]
#[error("{reason}")]
pub struct ExecFailure {
    /// Output captured before the failure.
    pub output: String,
    /// Exit code to record. `-1` when the process died without one.
    pub exit_code: i32,
    /// One-line description appended to the build transcript.
    pub reason: String,
}

impl ExecFailure {
    /// A failure that produced no output, such as a spawn error.
    pub fn bare(exit_code: i32, reason: impl Into<String>) -> Self {
        Self {
            output: String::new(),
            exit_code,
            reason: reason.into(),
        }
    }
}

/// Git operations against a project working copy.
#[async_trait]
pub trait GitClient: Send + Sync {
    /// Clone `remote_url` into `local_path`, returning the combined
    /// stdout/stderr of the clone.
    async fn clone_repo(&self, remote_url: &str, local_path: &Path) -> Result<String, ExecFailure>;

    /// Check out `git_ref` in the working copy at `local_path`.
    async fn checkout(&self, local_path: &Path, git_ref: &str) -> Result<String, ExecFailure>;
}

/// Shell command execution inside a working directory.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    /// Run `command` through the shell with `working_dir` as its cwd,
    /// capturing combined stdout/stderr.
    async fn run(&self, command: &str, working_dir: &Path) -> Result<String, ExecFailure>;
}
