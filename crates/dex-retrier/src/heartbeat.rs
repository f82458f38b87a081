//! Periodic loss detector. A degenerate Workpool for exactly one action at
//! a time: instead of a main loop draining pending-queues, a single
//! self-rescheduling heartbeat mutation walks every in-progress [`Run`]
//! and asks the host scheduler whether its dispatch is still alive.
//!
//! Grounded on `dex_workpool::mainloop`'s self-rescheduling tick, scaled
//! down to a fixed ~10s period instead of segment-driven dispatch, since
//! there's no pending-start queue to drain here — only drift detection.

use crate::db;
use crate::retrier::ActionRetrier;
use chrono::Duration;
use dex_host::{HostError, SchedulerStatus};
use dex_types::to_segment;
use rand::Rng;
use std::sync::{Arc, Weak};
use tracing::{debug, error};

pub(crate) const HEARTBEAT_HANDLE: &str = "dex_retrier:heartbeat";
const HEARTBEAT_PERIOD_MS: i64 = 10_000;

/// `10s` base period, jittered by `[0.5, 1.5)` like every other backoff in
/// this repository, so many retriers sharing a scheduler don't all wake in
/// lockstep.
pub(crate) fn next_heartbeat_delay() -> Duration {
    let jitter: f64 = rand::rng().random_range(0.5..1.5);
    Duration::milliseconds((HEARTBEAT_PERIOD_MS as f64 * jitter).round() as i64)
}

pub(crate) fn register_heartbeat_handle(retrier: &Arc<ActionRetrier>) {
    let weak: Weak<ActionRetrier> = Arc::downgrade(retrier);
    retrier.registry().register(HEARTBEAT_HANDLE, move |_args| {
        let weak = weak.clone();
        async move {
            let Some(retrier) = weak.upgrade() else {
                return Ok(serde_json::Value::Null);
            };
            if let Err(e) = run_heartbeat(&retrier).await {
                error!(error = %e, "action-retrier heartbeat failed");
                return Err(e.to_string());
            }
            retrier.reschedule_heartbeat().await.map_err(|e| e.to_string())?;
            Ok(serde_json::Value::Null)
        }
    });
}

async fn run_heartbeat(retrier: &Arc<ActionRetrier>) -> Result<(), HostError> {
    let runs = dex_host::transact_typed::<Vec<crate::types::Run>>(retrier.store(), move |tx| {
        let runs = db::in_progress_runs(tx)?;
        serde_json::to_value(runs).map_err(|e| HostError::Serialization(e.to_string()))
    })?;

    for run in runs {
        let crate::types::RunState::InProgress { scheduler_id, .. } = run.state else {
            continue;
        };
        let status = retrier.scheduler().status(scheduler_id).await?;
        let lost = match status {
            None => true,
            Some(SchedulerStatus::Failed) | Some(SchedulerStatus::Canceled) => true,
            Some(SchedulerStatus::Pending) | Some(SchedulerStatus::InProgress) | Some(SchedulerStatus::Success) => {
                false
            }
        };
        if !lost {
            continue;
        }
        debug!(run_id = %run.id, "action-retrier detected lost dispatch, retrying");
        retrier.retry(run).await?;
    }
    Ok(())
}

pub(crate) async fn schedule_next_heartbeat(retrier: &Arc<ActionRetrier>) -> Result<(), HostError> {
    let segment = to_segment(chrono::Utc::now() + next_heartbeat_delay());
    retrier
        .scheduler()
        .schedule_at(segment, HEARTBEAT_HANDLE.to_string(), serde_json::json!({}))
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrier::ActionRetrier;
    use crate::types::{Run, RunId, RunState};
    use dex_host::memory::{InMemoryScheduler, InMemoryStore};
    use dex_host::{FunctionRegistry, Scheduler, Store};

    #[test]
    fn next_heartbeat_delay_stays_within_jitter_bounds() {
        for _ in 0..1000 {
            let ms = next_heartbeat_delay().num_milliseconds();
            assert!(ms >= HEARTBEAT_PERIOD_MS / 2 && ms < (HEARTBEAT_PERIOD_MS * 3) / 2, "{ms}");
        }
    }

    #[test_log::test(tokio::test)]
    async fn heartbeat_retries_a_run_whose_scheduler_entry_disappeared() {
        let registry = FunctionRegistry::new();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let scheduler = Arc::new(InMemoryScheduler::new(registry.clone()));
        let retrier = ActionRetrier::new(store.clone(), scheduler.clone(), registry);

        // A run whose scheduler entry the host scheduler has never heard
        // of — simulates an infra-level loss (e.g. a restart that dropped
        // the in-flight dispatch) rather than a normal failure.
        let lost_scheduler_id = dex_host::SchedulerId::new();
        let run = Run {
            id: RunId::new(),
            fn_handle: "whatever".to_string(),
            fn_args: serde_json::json!({}),
            on_complete: None,
            attempts: 0,
            state: RunState::InProgress {
                scheduler_id: lost_scheduler_id,
                start_time: chrono::Utc::now(),
            },
        };
        dex_host::transact_typed::<()>(store.as_ref(), {
            let run = run.clone();
            move |tx| {
                db::put_run(tx, &run)?;
                Ok(serde_json::Value::Null)
            }
        })
        .unwrap();

        run_heartbeat(&retrier).await.unwrap();

        let runs = dex_host::transact_typed::<Vec<Run>>(store.as_ref(), |tx| {
            let runs = db::in_progress_runs(tx)?;
            serde_json::to_value(runs).map_err(|e| HostError::Serialization(e.to_string()))
        })
        .unwrap();
        let retried = runs.into_iter().find(|r| r.id == run.id).expect("run still in progress");
        assert_eq!(retried.attempts, 1);
        match retried.state {
            RunState::InProgress { scheduler_id, .. } => {
                assert_ne!(scheduler_id, lost_scheduler_id);
                let status = scheduler.status(scheduler_id).await.unwrap();
                assert!(status.is_some(), "retry should have scheduled a fresh entry");
            }
            other => panic!("expected still InProgress after retry, got {other:?}"),
        }
    }
}
