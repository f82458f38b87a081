use chrono::{DateTime, Utc};
use dex_types::{OnComplete, PromiseId};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkflowId(pub Uuid);

impl WorkflowId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "wf_{}", self.0)
    }
}

/// Terminal outcome of a workflow execution.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum RunResult {
    Success { return_value: serde_json::Value },
    Failed { error: String },
    Canceled,
}

/// Durable record of one workflow instance.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Workflow {
    pub id: WorkflowId,
    pub name: String,
    pub workflow_handle: String,
    pub args: serde_json::Value,
    pub on_complete: Option<OnComplete>,
    pub generation_number: u64,
    pub run_result: Option<RunResult>,
    /// Root of this workflow's call tree; every step's `PromiseId` is a
    /// child of this root. Derived once at `create` time the same way the
    /// teacher derives an execution's root: a digest of identity, not of
    /// content that can change across replays.
    pub promise_root: PromiseId,
    pub parent: Option<ParentLink>,
    pub created_at: DateTime<Utc>,
}

/// Identifies the parent workflow step a nested workflow reports back to:
/// the exact `PromiseId` the parent's `run_workflow` call is waiting on.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParentLink {
    pub workflow_id: WorkflowId,
    pub promise_id: PromiseId,
    pub generation_number: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EventId(pub Uuid);

impl EventId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

/// Single-shot rendezvous point a workflow can await and an external
/// caller can send to, in either order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Event {
    pub id: EventId,
    pub workflow_id: WorkflowId,
    pub name: Option<String>,
    pub state: EventState,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum EventState {
    Created,
    Sent {
        result: Result<serde_json::Value, String>,
        sent_at: DateTime<Utc>,
    },
    Waiting {
        promise_id: PromiseId,
        workflow_id: WorkflowId,
        waiting_at: DateTime<Utc>,
    },
    Consumed {
        promise_id: PromiseId,
        workflow_id: WorkflowId,
        waiting_at: DateTime<Utc>,
        sent_at: DateTime<Utc>,
        consumed_at: DateTime<Utc>,
    },
}
