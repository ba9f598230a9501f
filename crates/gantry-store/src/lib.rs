//! Storage layer for the Gantry build runner.
//!
//! Provides store traits and in-memory implementations. Everything the
//! executor and scheduler persist goes through these traits, so a
//! database-backed deployment only has to supply new implementations.

pub mod build;
pub mod error;
pub mod project;

pub use build::{BuildFilter, BuildStore, MemoryBuildStore};
pub use error::{StoreError, StoreResult};
pub use project::{MemoryProjectStore, ProjectStore};
