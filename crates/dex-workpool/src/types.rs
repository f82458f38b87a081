use chrono::{DateTime, Utc};
use dex_host::SchedulerId;
use dex_types::{Segment, WorkId, WorkResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Drives the pool's single-writer discipline. At most one main-loop tick
/// may be `Running` at a time; `kick` decides whether an existing
/// `Scheduled` entry already covers newly enqueued work or needs to be
/// pulled forward.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunState {
    Idle,
    Scheduled {
        segment: Segment,
        scheduled_id: SchedulerId,
        saturated: bool,
    },
    Running {
        generation: u64,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunStatus {
    pub state: RunState,
}

impl Default for RunStatus {
    fn default() -> Self {
        Self {
            state: RunState::Idle,
        }
    }
}

/// Singleton counters advanced once per main-loop tick.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct InternalState {
    pub generation: u64,
    pub in_progress_ids: Vec<WorkId>,
}

impl InternalState {
    pub fn is_in_progress(&self, id: WorkId) -> bool {
        self.in_progress_ids.contains(&id)
    }

    pub fn remove_in_progress(&mut self, id: WorkId) {
        self.in_progress_ids.retain(|x| *x != id);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PendingId(pub Uuid);

impl PendingId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for PendingId {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingStart {
    pub id: PendingId,
    pub work_id: WorkId,
    pub segment: Segment,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingCompletion {
    pub id: PendingId,
    pub work_id: WorkId,
    pub segment: Segment,
    pub result: WorkResult,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PendingCancellation {
    pub id: PendingId,
    pub work_id: WorkId,
    pub segment: Segment,
}

/// Durable record of an `on_complete` callback that itself threw. Never
/// retried; kept for operator visibility only.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OnCompleteFailure {
    pub work_id: WorkId,
    pub result: WorkResult,
    pub error: String,
    pub failed_at: DateTime<Utc>,
}

/// A serializable predicate over a [`WorkItem`], used by
/// `Workpool::cancel_matching`. Kept data-driven (rather than an arbitrary
/// closure) so a multi-page cancellation run can carry itself across a
/// `Scheduler::schedule_at` boundary, which only accepts a JSON payload.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CancelFilter {
    /// Matches items created strictly before the given time.
    CreatedBefore(DateTime<Utc>),
    /// Matches items whose `on_complete.context` has `key` set to `value`
    /// — used by a workflow engine to cancel every step it dispatched for
    /// one workflow id.
    OnCompleteContextEquals { key: String, value: serde_json::Value },
}

impl CancelFilter {
    pub fn matches(&self, item: &WorkItem) -> bool {
        match self {
            CancelFilter::CreatedBefore(cutoff) => item.created_at < *cutoff,
            CancelFilter::OnCompleteContextEquals { key, value } => item
                .on_complete
                .as_ref()
                .is_some_and(|oc| oc.context.get(key) == Some(value)),
        }
    }
}

/// How `status()` reports a work item to callers.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkStatus {
    Finished,
    Pending { previous_attempts: u32 },
    Running { previous_attempts: u32 },
}
