//! Durable, bounded-parallelism job queue. A [`pool::Workpool`] owns a
//! namespace in a shared [`dex_host::Store`] and drives a single
//! self-rescheduling main-loop tick (`mainloop`) that enforces
//! `max_parallelism`, retries failed actions with jittered exponential
//! backoff (`retry`), and invokes each item's `on_complete` exactly once.

pub mod db;
pub mod error;
mod mainloop;
pub mod pool;
mod retry;
pub mod types;

pub use error::WorkpoolError;
pub use mainloop::MAX_TICK_BATCH;
pub use pool::Workpool;
pub use types::{
    CancelFilter, InternalState, OnCompleteFailure, PendingCancellation, PendingCompletion,
    PendingId, PendingStart, RunState, RunStatus, WorkStatus,
};
