//! Deterministic journal storage for workflow replay.
//!
//! A journal is the append-only record of everything a workflow execution
//! observed or decided: side effects it scheduled, randomness and time it
//! captured, signals it consumed. [`replay`] turns a journal back into a
//! cache a replaying handler can consult instead of re-executing side
//! effects; [`resolution`] derives read-only scans over it; [`size`] bounds
//! how large one journal is allowed to grow.

pub mod error;
pub mod replay;
pub mod resolution;
pub mod size;

pub use error::JournalError;
pub use replay::{CachedResult, ReplayCache};
pub use size::{JournalSizeError, MAX_JOURNAL_BYTES};
