//! Durable workflow execution: deterministic replay over an append-only
//! journal, with query/mutation/action steps dispatched through
//! `dex_workpool` and rendezvous events for external signals.
//!
//! [`engine::WorkflowEngine`] is the entry point. [`executor`] implements
//! the replay tick itself — a handler runs as an ordinary `tokio::task`
//! bridged over a channel, so user code reads like straight-line async
//! Rust even though the engine may suspend and resume it across process
//! restarts.

pub mod db;
pub mod engine;
pub mod error;
pub mod executor;
pub mod registry;
pub mod sandbox;
pub mod types;

pub use engine::WorkflowEngine;
pub use error::WorkflowError;
pub use executor::{PendingSideEffect, StepContext, StepKind, TickOutcome};
pub use registry::WorkflowRegistry;
pub use types::{Event, EventId, EventState, ParentLink, RunResult, Workflow, WorkflowId};
