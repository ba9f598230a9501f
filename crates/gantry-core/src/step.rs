//! Pipeline step assembly.

use serde::{Deserialize, Serialize};

use crate::{Build, Project};

/// One unit of work in a build pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum BuildStep {
    /// Switch the working copy to the requested ref.
    Checkout { git_ref: String },
    /// Run a shell command in the working copy.
    Command { command: String },
}

impl BuildStep {
    /// The transcript banner announcing this step.
    pub fn echo_line(&self) -> String {
        match self {
            BuildStep::Checkout { git_ref } => format!("$ git checkout {}", git_ref),
            BuildStep::Command { command } => format!("$ {}", command),
        }
    }
}

/// Assemble the step sequence for one build: a checkout of the build's
/// ref, then the project's configured commands in order.
pub fn build_pipeline(project: &Project, build: &Build) -> Vec<BuildStep> {
    let mut steps = Vec::with_capacity(project.build_steps.len() + 1);
    steps.push(BuildStep::Checkout {
        git_ref: build.effective_ref().to_string(),
    });
    steps.extend(project.build_steps.iter().map(|command| BuildStep::Command {
        command: command.clone(),
    }));
    steps
}
