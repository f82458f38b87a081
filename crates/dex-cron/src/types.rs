use chrono::{DateTime, Utc};
use dex_host::SchedulerId;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CronId(pub Uuid);

impl CronId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for CronId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for CronId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cron_{}", self.0)
    }
}

/// The two ways a caller can ask to be called back on a schedule.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Schedule {
    Interval { ms: u64 },
    Cron { cronspec: String, tz: Option<String> },
}

/// A registered recurring job. `generation` guards against a superseded
/// rescheduler entry acting after a newer one has already taken over (the
/// same role `dex_workpool`'s `InternalState::generation` plays for its
/// main loop, here verified per-job instead of per-pool).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CronJob {
    pub id: CronId,
    pub fn_handle: String,
    pub fn_args: serde_json::Value,
    pub schedule: Schedule,
    pub scheduled_time: DateTime<Utc>,
    pub generation: u64,
    pub rescheduler_id: SchedulerId,
    /// `Some(id)` while the previous dispatch of the user function is
    /// still in flight; the rescheduler skips starting a new one until
    /// this clears.
    pub dispatch: Option<SchedulerId>,
}
