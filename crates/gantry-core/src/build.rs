//! Build records and the build status machine.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{BuildId, ProjectId};

/// Status of a build.
///
/// A build moves forward only: `Queued` to `Building` to one of the
/// three terminal statuses. Once terminal it is never transitioned
/// again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    /// Accepted and waiting for the worker slot.
    Queued,
    /// Currently executing on the worker.
    Building,
    /// Every step exited zero.
    Success,
    /// A step failed, or the worker died.
    Failed,
    /// The build exceeded its time budget.
    TimedOut,
}

impl BuildStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BuildStatus::Success | BuildStatus::Failed | BuildStatus::TimedOut
        )
    }
}

impl std::fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildStatus::Queued => write!(f, "queued"),
            BuildStatus::Building => write!(f, "building"),
            BuildStatus::Success => write!(f, "success"),
            BuildStatus::Failed => write!(f, "failed"),
            BuildStatus::TimedOut => write!(f, "timed_out"),
        }
    }
}

/// One persisted slice of build output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputChunk {
    /// When the chunk was captured.
    pub timestamp: DateTime<Utc>,
    /// Raw text: a step banner or one command's combined output.
    pub content: String,
}

/// A single execution of a project's pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Build {
    /// Unique identifier.
    pub id: BuildId,
    /// Project this build belongs to.
    pub project_id: ProjectId,
    /// Human-readable title (e.g., the commit subject).
    pub title: String,
    /// Branch to build.
    pub branch: String,
    /// Exact commit to build; takes precedence over `branch` when set.
    pub revision: Option<String>,
    /// Who requested the build.
    pub author: String,
    /// Free-form labels.
    pub tags: Vec<String>,
    /// Current status.
    pub status: BuildStatus,
    /// Output captured so far, in arrival order.
    pub output: Vec<OutputChunk>,
    /// Exit code: zero on success, the failing step's code on failure,
    /// unset while running and after a timeout.
    pub exit_code: Option<i32>,
    /// When the build was accepted.
    pub created_at: DateTime<Utc>,
    /// When the build started executing.
    pub started_at: Option<DateTime<Utc>>,
    /// When the build reached a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
}

impl Build {
    /// Create a queued build for `project_id`.
    pub fn new(
        project_id: ProjectId,
        title: impl Into<String>,
        branch: impl Into<String>,
        author: impl Into<String>,
    ) -> Self {
        Self {
            id: BuildId::new(),
            project_id,
            title: title.into(),
            branch: branch.into(),
            revision: None,
            author: author.into(),
            tags: Vec::new(),
            status: BuildStatus::Queued,
            output: Vec::new(),
            exit_code: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }

    pub fn with_revision(mut self, revision: impl Into<String>) -> Self {
        self.revision = Some(revision.into());
        self
    }

    pub fn with_tags(mut self, tags: Vec<String>) -> Self {
        self.tags = tags;
        self
    }

    /// The git ref the checkout step uses: the pinned revision when
    /// present, the branch otherwise.
    pub fn effective_ref(&self) -> &str {
        self.revision.as_deref().unwrap_or(&self.branch)
    }

    /// Append a chunk of output, stamped with the current time.
    pub fn append_output(&mut self, content: impl Into<String>) {
        self.output.push(OutputChunk {
            timestamp: Utc::now(),
            content: content.into(),
        });
    }

    /// The captured output as one newline-joined string.
    pub fn transcript(&self) -> String {
        self.output
            .iter()
            .map(|chunk| chunk.content.as_str())
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Mark a queued build as building and stamp `started_at`.
    /// Does nothing if the build already left the queue.
    pub fn start(&mut self) {
        if self.status == BuildStatus::Queued {
            self.status = BuildStatus::Building;
            self.started_at = Some(Utc::now());
        }
    }

    /// Transition to a terminal status, refusing to overwrite one.
    ///
    /// Returns `true` if this call performed the transition. A caller
    /// that gets `false` lost the race to another finisher and must
    /// keep the stored result.
    pub fn try_finish(&mut self, status: BuildStatus, exit_code: Option<i32>) -> bool {
        if self.status.is_terminal() || !status.is_terminal() {
            return false;
        }
        self.status = status;
        self.exit_code = exit_code;
        self.finished_at = Some(Utc::now());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queued_build() -> Build {
        Build::new(ProjectId::new(), "test build", "main", "dev")
    }

    #[test]
    fn test_new_build_defaults() {
        let build = queued_build();
        assert_eq!(build.status, BuildStatus::Queued);
        assert!(build.output.is_empty());
        assert!(build.exit_code.is_none());
        assert!(build.started_at.is_none());
        assert!(build.finished_at.is_none());
    }

    #[test]
    fn test_start_transition() {
        let mut build = queued_build();
        build.start();
        assert_eq!(build.status, BuildStatus::Building);
        assert!(build.started_at.is_some());
    }

    #[test]
    fn test_start_skips_terminal_build() {
        let mut build = queued_build();
        build.start();
        assert!(build.try_finish(BuildStatus::Failed, Some(1)));
        build.start();
        assert_eq!(build.status, BuildStatus::Failed);
    }

    #[test]
    fn test_try_finish_records_outcome() {
        let mut build = queued_build();
        build.start();
        assert!(build.try_finish(BuildStatus::Success, Some(0)));
        assert_eq!(build.status, BuildStatus::Success);
        assert_eq!(build.exit_code, Some(0));
        assert!(build.finished_at.is_some());
    }

    #[test]
    fn test_try_finish_already_terminal() {
        let mut build = queued_build();
        build.start();
        assert!(build.try_finish(BuildStatus::TimedOut, None));
        assert!(!build.try_finish(BuildStatus::Success, Some(0)));
        assert_eq!(build.status, BuildStatus::TimedOut);
        assert!(build.exit_code.is_none());
    }

    #[test]
    fn test_try_finish_non_terminal_target() {
        let mut build = queued_build();
        assert!(!build.try_finish(BuildStatus::Building, None));
        assert_eq!(build.status, BuildStatus::Queued);
    }

    #[test]
    fn test_effective_ref_precedence() {
        let build = queued_build();
        assert_eq!(build.effective_ref(), "main");
        let pinned = queued_build().with_revision("abc123");
        assert_eq!(pinned.effective_ref(), "abc123");
    }

    #[test]
    fn test_transcript_ordering() {
        let mut build = queued_build();
        build.append_output("$ make test");
        build.append_output("ok: 12 passed");
        assert_eq!(build.transcript(), "$ make test\nok: 12 passed");
    }
}
