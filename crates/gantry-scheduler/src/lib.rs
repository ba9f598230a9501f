//! Build scheduling for the Gantry build runner.
//!
//! A coordinator task owns a FIFO queue and a single worker slot.
//! Workers run builds through `gantry-executor`; a monitor task
//! watches each one and reports its exit, so a crashed worker fails
//! only its own build and the queue keeps serving.

pub mod coordinator;
mod worker;

pub use coordinator::{BuildQueue, QueueEntry, QueueSnapshot};
