//! Build lifecycle hooks.

use tracing::info;

use crate::{BuildId, BuildStatus, ProjectId};

/// Lifecycle moments reported to the hook sink.
///
/// Every build gets exactly one `Building` event and exactly one
/// terminal event. Success maps to `Success`; failure, timeout, and a
/// dead worker all map to `Failed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// The build left the queue and started executing.
    Building,
    /// Every step finished green.
    Success,
    /// The build failed, timed out, or its worker died.
    Failed,
}

impl HookEvent {
    /// The terminal event for a stored status, if it has one.
    pub fn terminal_for(status: BuildStatus) -> Option<HookEvent> {
        match status {
            BuildStatus::Success => Some(HookEvent::Success),
            BuildStatus::Failed | BuildStatus::TimedOut => Some(HookEvent::Failed),
            BuildStatus::Queued | BuildStatus::Building => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HookEvent::Building => "building",
            HookEvent::Success => "success",
            HookEvent::Failed => "failed",
        }
    }
}

/// Receiver for lifecycle notifications.
///
/// Implementations must be fast and infallible. The executor calls
/// `notify` inline, fire-and-forget, and never waits on the result.
pub trait HookSink: Send + Sync {
    fn notify(&self, event: HookEvent, project_id: ProjectId, build_id: BuildId);
}

/// A sink that writes each event to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHookSink;

impl HookSink for LogHookSink {
    fn notify(&self, event: HookEvent, project_id: ProjectId, build_id: BuildId) {
        info!(
            event = event.as_str(),
            project_id = %project_id,
            build_id = %build_id,
            "Build lifecycle event"
        );
    }
}
