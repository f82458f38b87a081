use chrono::{DateTime, Utc};
use dex_host::SchedulerId;
use dex_types::{OnComplete, WorkResult};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "run_{}", self.0)
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum RunState {
    InProgress {
        scheduler_id: SchedulerId,
        start_time: DateTime<Utc>,
    },
    Completed {
        result: WorkResult,
        completed_at: DateTime<Utc>,
    },
}

/// A single retried action, tracked independently of any `Workpool`
/// instance — this is the one-off sibling of a `WorkItem`, used for
/// actions a caller wants durable retry semantics for without standing up
/// a whole pool.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Run {
    pub id: RunId,
    pub fn_handle: String,
    pub fn_args: serde_json::Value,
    pub on_complete: Option<OnComplete>,
    pub attempts: u32,
    pub state: RunState,
}
