//! Build execution for the Gantry build runner.
//!
//! Drives one build at a time end to end: workspace preparation, the
//! step pipeline, incremental output persistence, timeout enforcement,
//! and lifecycle hooks. Process access goes through the `GitClient`
//! and `CommandRunner` traits from `gantry-core`; this crate ships the
//! real implementations backed by the `git` binary and `sh`.

pub mod build;
pub mod config;
pub mod git;
mod guard;
pub mod shell;
pub mod step;

pub use build::{BuildExecutor, ExecutorError};
pub use config::{BUILD_TIMEOUT_ENV, ConfigError, ExecutorConfig};
pub use git::ProcessGit;
pub use shell::ProcessShell;
pub use step::StepRunner;
