use crate::error::HostError;
use dex_types::Segment;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Handle to one deferred dispatch registered with the [`Scheduler`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SchedulerId(pub Uuid);

impl SchedulerId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for SchedulerId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for SchedulerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sched_{}", self.0)
    }
}

/// Observable state of a scheduler entry. Workpool's main loop and
/// action-retrier's heartbeat both poll this to notice lost dispatches.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SchedulerStatus {
    Pending,
    InProgress,
    Success,
    Failed,
    Canceled,
}

/// Deferred-function scheduler: the host primitive that runs a registered
/// function handle at (or after) a given segment and reports back how it
/// went. Implementations are expected to survive process restarts in a
/// real deployment; [`crate::memory::InMemoryScheduler`] does not, which is
/// an explicit limitation of treating this as an in-process reference.
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    /// Register `fn_handle(payload)` to run at `segment`. Returns a handle
    /// the caller persists alongside its own record so it can later poll
    /// or cancel this specific dispatch.
    async fn schedule_at(
        &self,
        segment: Segment,
        fn_handle: String,
        payload: serde_json::Value,
    ) -> Result<SchedulerId, HostError>;

    /// Best-effort cancellation. Returns `true` if the entry was pending
    /// and is now canceled; `false` if it had already started or did not
    /// exist (both are treated the same by callers: the cancellation had
    /// no effect and the original outcome — whatever it turns out to be —
    /// still needs to be observed).
    async fn cancel(&self, id: SchedulerId) -> Result<bool, HostError>;

    /// Current status, or `None` if the scheduler has no memory of `id`
    /// (e.g. it was garbage collected after completion).
    async fn status(&self, id: SchedulerId) -> Result<Option<SchedulerStatus>, HostError>;
}
