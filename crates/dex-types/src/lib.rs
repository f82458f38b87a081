pub mod error;
pub mod event;
pub mod execution_error;
pub mod join_set;
pub mod journal;
pub mod payload;
pub mod promise_id;
pub mod segment;
pub mod workpool;

pub use error::DomainError;
pub use event::{AwaitKind, EventType, InvokeKind, RetryPolicy, SignalDeliveryId};
pub use execution_error::{ErrorKind, ExecutionError};
pub use join_set::JoinSetId;
pub use journal::{ExecutionJournal, ExecutionStatus, JournalEntry};
pub use payload::{Codec, Payload};
pub use promise_id::{ExecutionId, MAX_CALL_DEPTH, PromiseId};
pub use segment::{
    clamp_run_at, current_segment, from_segment, next_segment, to_segment, Segment,
    MAX_SCHEDULE_HORIZON, SEGMENT_MS,
};
pub use workpool::{
    FnType, Globals, GlobalsError, OnComplete, RetryBehavior, RetryOption, WorkId, WorkItem,
    WorkResult, MAX_PARALLELISM_HARD_CAP, MAX_PARALLELISM_SOFT_CAP,
};
