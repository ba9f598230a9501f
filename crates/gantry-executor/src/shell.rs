//! Shell command execution.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use gantry_core::{CommandRunner, ExecFailure};
use tokio::process::Command;
use tracing::debug;

/// Runs build commands through `sh -c` on the build host.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessShell;

#[async_trait]
impl CommandRunner for ProcessShell {
    async fn run(&self, command: &str, working_dir: &Path) -> Result<String, ExecFailure> {
        debug!(command = %command, cwd = %working_dir.display(), "Running shell command");
        let output = Command::new("sh")
            .args(["-c", command])
            .current_dir(working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            // Reap the child if this future is dropped mid-run, which
            // is how a timed-out build's processes get killed.
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|err| {
                ExecFailure::bare(-1, format!("failed to spawn shell for `{}`: {}", command, err))
            })?;

        let text = combine_output(&output.stdout, &output.stderr);
        if output.status.success() {
            return Ok(text);
        }
        let reason = match output.status.code() {
            Some(code) => format!("command exited with code {}", code),
            None => "command terminated by a signal".to_string(),
        };
        Err(ExecFailure {
            output: text,
            exit_code: output.status.code().unwrap_or(-1),
            reason,
        })
    }
}

/// Merge captured stdout and stderr into one transcript-ready string,
/// stderr after stdout, trailing newline dropped.
pub(crate) fn combine_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut text = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&String::from_utf8_lossy(stderr));
    }
    text.truncate(text.trim_end().len());
    text
}
