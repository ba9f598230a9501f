//! Build timeout enforcement.

use std::sync::Arc;
use std::time::Duration;

use gantry_core::{BuildId, BuildStatus, ProjectId};
use gantry_store::BuildStore;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{error, warn};

/// Arm the timeout for one build.
///
/// Sleeps for the full budget, then records the timeout and kills the
/// pipeline task. The executor aborts this guard when the pipeline
/// finishes in time, so a guard that wakes up means the budget really
/// elapsed. The record is finished before the pipeline is killed:
/// whoever observes the cancellation finds the timeout already stored.
///
/// The transition is guarded per loaded record, not atomically against
/// the store, so a pipeline finishing in this same instant can pass its
/// own check too and win the final `update`. Either way exactly one
/// terminal hook fires, from the executor.
pub(crate) fn arm_timeout(
    budget: Duration,
    builds: Arc<dyn BuildStore>,
    project_id: ProjectId,
    build_id: BuildId,
    pipeline: AbortHandle,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tokio::time::sleep(budget).await;
        warn!(
            build_id = %build_id,
            budget = ?budget,
            "Build exceeded its time budget, killing it"
        );
        match builds.get(project_id, build_id).await {
            Ok(mut build) => {
                if build.try_finish(BuildStatus::TimedOut, None) {
                    build.append_output(format!("build timed out after {:?}", budget));
                    if let Err(err) = builds.update(&build).await {
                        error!(
                            build_id = %build_id,
                            error = %err,
                            "Failed to record build timeout"
                        );
                    }
                }
            }
            Err(err) => {
                error!(build_id = %build_id, error = %err, "Failed to load build for timeout");
            }
        }
        pipeline.abort();
    })
}
