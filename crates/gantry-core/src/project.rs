//! Project definitions.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::ProjectId;

/// A project registered with the build runner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier.
    pub id: ProjectId,
    /// Project name (e.g., "my-service").
    pub name: String,
    /// Where the working copy lives on the build host.
    pub local_path: PathBuf,
    /// Git remote the working copy is cloned from.
    pub remote_url: String,
    /// Shell commands run in order on every build.
    pub build_steps: Vec<String>,
}

impl Project {
    /// Create a project with no build steps configured.
    pub fn new(
        name: impl Into<String>,
        remote_url: impl Into<String>,
        local_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            id: ProjectId::new(),
            name: name.into(),
            local_path: local_path.into(),
            remote_url: remote_url.into(),
            build_steps: Vec::new(),
        }
    }

    pub fn with_build_steps(mut self, steps: Vec<String>) -> Self {
        self.build_steps = steps;
        self
    }
}
