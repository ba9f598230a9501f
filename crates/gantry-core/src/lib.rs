//! Core domain types and traits for the Gantry build runner.
//!
//! This crate contains:
//! - Project and build records with the build status machine
//! - Pipeline step assembly
//! - Collaborator traits for git, the shell, and lifecycle hooks

pub mod build;
pub mod exec;
pub mod hook;
pub mod id;
pub mod project;
pub mod step;

pub use build::{Build, BuildStatus, OutputChunk};
pub use exec::{CommandRunner, ExecFailure, GitClient};
pub use hook::{HookEvent, HookSink, LogHookSink};
pub use id::{BuildId, ProjectId};
pub use project::Project;
pub use step::{BuildStep, build_pipeline};
