//! Shared vocabulary for Workpool-style job queues. `dex-workpool` owns the
//! main-loop logic; these types are kept here so `dex-workflow`,
//! `dex-retrier`, and `dex-cron` can speak of work items without depending
//! on the workpool crate's internals.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Identifies one enqueued unit of work.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct WorkId(pub Uuid);

impl WorkId {
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for WorkId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for WorkId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "work_{}", self.0)
    }
}

/// Whether an enqueued function is a query, mutation, or action.
///
/// Only actions retry automatically: queries and mutations are assumed to
/// fail deterministically, so a retry would just reproduce the same error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum FnType {
    Query,
    Mutation,
    Action,
}

impl FnType {
    pub fn retries_by_default(self) -> bool {
        matches!(self, FnType::Action)
    }
}

/// Backoff schedule for a retried action.
///
/// `delay_for_attempt` matches `dex-workpool`'s main-loop backoff formula:
/// `initial_backoff_ms * base^attempt`, jittered by a multiplicative factor
/// in `[0.5, 1.5)` so that many items retrying in lockstep don't thunder the
/// scheduler in unison.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RetryBehavior {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub base: u32,
}

impl Default for RetryBehavior {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            initial_backoff_ms: 250,
            base: 2,
        }
    }
}

impl RetryBehavior {
    pub fn disabled() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            base: 1,
        }
    }

    pub fn has_attempts_remaining(&self, attempts_so_far: u32) -> bool {
        attempts_so_far < self.max_attempts
    }

    /// Backoff duration before the next attempt, with jitter supplied by the
    /// caller (a closure over `rand`, kept out of this crate so the type
    /// stays free of a `rand` dependency).
    pub fn base_delay_ms(&self, attempt: u32) -> u64 {
        let factor = self.base.saturating_pow(attempt);
        self.initial_backoff_ms.saturating_mul(factor as u64)
    }
}

/// How an individual work item opts into retry behavior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, Default)]
pub enum RetryOption {
    /// Use the function type's default (actions retry, others don't).
    #[default]
    Default,
    /// Never retry, regardless of function type.
    Disabled,
    /// Use this exact policy.
    Custom(RetryBehavior),
}

/// A terminal outcome for a dispatched work item.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum WorkResult {
    Success { return_value: serde_json::Value },
    Failed { error: String },
    Canceled,
}

impl WorkResult {
    pub fn is_terminal_success(&self) -> bool {
        matches!(self, WorkResult::Success { .. })
    }
}

/// A completion callback to invoke exactly once when a work item finalizes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OnComplete {
    pub fn_handle: String,
    pub context: serde_json::Value,
}

/// The durable record of one enqueued unit of work.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    pub id: WorkId,
    pub fn_handle: String,
    pub fn_name: String,
    pub fn_args: serde_json::Value,
    pub fn_type: FnType,
    pub run_at: DateTime<Utc>,
    pub attempts: u32,
    pub retry: RetryOption,
    pub on_complete: Option<OnComplete>,
    pub created_at: DateTime<Utc>,
}

/// Pool-wide tunables, validated on every `enqueue`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Globals {
    pub max_parallelism: u32,
    pub retry_actions_by_default: bool,
    pub default_retry_behavior: RetryBehavior,
}

impl Default for Globals {
    fn default() -> Self {
        Self {
            max_parallelism: 10,
            retry_actions_by_default: true,
            default_retry_behavior: RetryBehavior::default(),
        }
    }
}

/// Soft and hard bounds on `max_parallelism`.
pub const MAX_PARALLELISM_HARD_CAP: u32 = 200;
pub const MAX_PARALLELISM_SOFT_CAP: u32 = 100;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum GlobalsError {
    #[error("max_parallelism {value} exceeds hard cap {cap}")]
    MaxParallelismTooHigh { value: u32, cap: u32 },
}

impl Globals {
    /// Validates hard bounds; callers should separately `tracing::warn!` when
    /// crossing the soft cap (kept out of this crate to avoid a `tracing`
    /// dependency here).
    pub fn validate(&self) -> Result<(), GlobalsError> {
        if self.max_parallelism > MAX_PARALLELISM_HARD_CAP {
            return Err(GlobalsError::MaxParallelismTooHigh {
                value: self.max_parallelism,
                cap: MAX_PARALLELISM_HARD_CAP,
            });
        }
        Ok(())
    }

    pub fn exceeds_soft_cap(&self) -> bool {
        self.max_parallelism > MAX_PARALLELISM_SOFT_CAP
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_behavior_base_delay_grows_exponentially() {
        let rb = RetryBehavior {
            max_attempts: 5,
            initial_backoff_ms: 100,
            base: 2,
        };
        similar_asserts::assert_eq!(
            [rb.base_delay_ms(0), rb.base_delay_ms(1), rb.base_delay_ms(2)],
            [100, 200, 400]
        );
    }

    #[test]
    fn has_attempts_remaining_is_exclusive_of_max() {
        let rb = RetryBehavior {
            max_attempts: 3,
            ..RetryBehavior::default()
        };
        assert!(rb.has_attempts_remaining(2));
        assert!(!rb.has_attempts_remaining(3));
    }

    #[test]
    fn globals_validate_rejects_above_hard_cap() {
        let g = Globals {
            max_parallelism: 201,
            ..Globals::default()
        };
        assert!(g.validate().is_err());
    }

    #[test]
    fn globals_soft_cap_warns_without_failing_validation() {
        let g = Globals {
            max_parallelism: 150,
            ..Globals::default()
        };
        assert!(g.validate().is_ok());
        assert!(g.exceeds_soft_cap());
    }

    #[test]
    fn fn_type_only_actions_retry_by_default() {
        assert!(FnType::Action.retries_by_default());
        assert!(!FnType::Query.retries_by_default());
        assert!(!FnType::Mutation.retries_by_default());
    }
}
