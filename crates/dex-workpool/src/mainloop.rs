//! The main loop: a single, self-rescheduling transaction per pool that
//! drains the three pending queues and keeps `|in_progress| <=
//! max_parallelism`. See `pool::Workpool::kick` for how a tick gets
//! scheduled and `pool::Workpool::run_tick` for the entry point invoked
//! when one fires.

use crate::db;
use crate::error::WorkpoolError;
use crate::pool::Workpool;
use crate::retry::jittered_delay;
use crate::types::{InternalState, OnCompleteFailure, PendingId, RunState, RunStatus};
use dex_host::{HostError, SchedulerId, Transaction};
use dex_types::{current_segment, to_segment, Segment, WorkId, WorkItem, WorkResult};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Per-pool cap on how many pending rows one tick will process, matching
/// the teacher's preference for bounded transaction size over unbounded
/// batching.
pub const MAX_TICK_BATCH: usize = 1024;

#[derive(Clone, Serialize, Deserialize)]
pub(crate) struct KickOutcome {
    pub new_status: RunStatus,
    pub needs_scheduler_dispatch: Option<Segment>,
    pub cancel_scheduler_id: Option<SchedulerId>,
    pub observed_segment: Segment,
    /// The pool's current `InternalState::generation`, tagged onto whatever
    /// scheduler entry `needs_scheduler_dispatch` asks for so the tick that
    /// eventually fires can verify it's still current.
    pub generation: u64,
}

/// Decide the next `RunState` in response to a kick from `source`
/// ("enqueue" | "cancel" | "completion"). Pure function over the current
/// `RunStatus`; the caller persists the result and performs any scheduler
/// I/O the outcome calls for.
pub(crate) fn decide_kick(
    tx: &dyn Transaction,
    pool_id: &str,
    source: &'static str,
) -> Result<KickOutcome, HostError> {
    let status = db::run_status(tx, pool_id)?;
    let generation = db::internal_state(tx, pool_id)?.generation;
    let now = chrono::Utc::now();
    let now_segment = current_segment();

    match status.state {
        RunState::Running { .. } => Ok(KickOutcome {
            new_status: status,
            needs_scheduler_dispatch: None,
            cancel_scheduler_id: None,
            observed_segment: now_segment,
            generation,
        }),
        RunState::Scheduled {
            segment,
            scheduled_id,
            saturated,
        } => {
            let leave_alone = (saturated && source == "enqueue")
                || segment <= to_segment(now + chrono::Duration::seconds(1));
            if leave_alone {
                Ok(KickOutcome {
                    new_status: RunStatus {
                        state: RunState::Scheduled {
                            segment,
                            scheduled_id,
                            saturated,
                        },
                    },
                    needs_scheduler_dispatch: None,
                    cancel_scheduler_id: None,
                    observed_segment: segment,
                    generation,
                })
            } else {
                Ok(KickOutcome {
                    new_status: RunStatus {
                        state: RunState::Scheduled {
                            segment: now_segment,
                            scheduled_id, // patched with the real id after dispatch
                            saturated: false,
                        },
                    },
                    needs_scheduler_dispatch: Some(now_segment),
                    cancel_scheduler_id: Some(scheduled_id),
                    observed_segment: now_segment,
                    generation,
                })
            }
        }
        RunState::Idle => Ok(KickOutcome {
            new_status: RunStatus {
                state: RunState::Scheduled {
                    segment: now_segment,
                    scheduled_id: SchedulerId::new(),
                    saturated: false,
                },
            },
            needs_scheduler_dispatch: Some(now_segment),
            cancel_scheduler_id: None,
            observed_segment: now_segment,
            generation,
        }),
    }
}

/// Registers this pool's main-tick handle with the shared registry so the
/// host scheduler can invoke it by name.
pub(crate) fn register_tick_handle(pool: &Arc<Workpool>) {
    let weak = Arc::downgrade(pool);
    let name = format!("dex_workpool:{}:main_tick", pool.pool_id);
    pool.registry.register(name, move |args| {
        let weak = weak.clone();
        async move {
            if let Some(pool) = weak.upgrade() {
                let generation = args.get("generation").and_then(|v| v.as_u64()).unwrap_or(0);
                pool.run_tick(generation).await.map_err(|e| e.to_string())?;
            }
            Ok(serde_json::Value::Null)
        }
    });
}

#[derive(Serialize, Deserialize)]
struct TickPlan {
    to_dispatch: Vec<WorkItem>,
    on_complete_calls: Vec<(dex_types::OnComplete, WorkId, WorkResult)>,
    reschedule: RunState,
    needs_scheduler_dispatch: Option<Segment>,
    /// `InternalState::generation` after this tick's own increment — tagged
    /// onto the next scheduled tick's payload.
    next_generation: u64,
}

#[derive(Serialize, Deserialize)]
enum TickResult {
    /// `expected_generation` didn't match `InternalState::generation`; an
    /// earlier tick already advanced the pool past this one.
    Stale { current_generation: u64 },
    Plan(TickPlan),
}

pub async fn run_tick(pool: &Arc<Workpool>, segment: Segment, generation: u64) -> Result<(), WorkpoolError> {
    let pool_id = pool.pool_id.clone();
    let result: TickResult = dex_host::transact_typed(pool.store.as_ref(), move |tx| {
        build_tick_plan(tx, &pool_id, segment, generation)
    })?;

    let plan = match result {
        TickResult::Stale { current_generation } => {
            let stale = WorkpoolError::StaleGeneration {
                expected: generation,
                actual: current_generation,
            };
            debug!(pool_id = %pool.pool_id, %stale, "stale main loop tick fired, aborting silently");
            return Ok(());
        }
        TickResult::Plan(plan) => plan,
    };

    debug!(
        pool_id = %pool.pool_id,
        dispatching = plan.to_dispatch.len(),
        on_completes = plan.on_complete_calls.len(),
        "main loop tick drained"
    );

    for item in &plan.to_dispatch {
        dispatch_one(pool, item.clone());
    }

    for (on_complete, work_id, result) in plan.on_complete_calls {
        run_on_complete(pool, on_complete, work_id, result).await;
    }

    if let Some(dispatch_segment) = plan.needs_scheduler_dispatch {
        let sched_id = pool
            .scheduler
            .schedule_at(
                dispatch_segment,
                format!("dex_workpool:{}:main_tick", pool.pool_id),
                serde_json::json!({"generation": plan.next_generation}),
            )
            .await
            .map_err(WorkpoolError::from)?;
        let pool_id = pool.pool_id.clone();
        dex_host::transact_typed::<()>(pool.store.as_ref(), move |tx| {
            let mut status = db::run_status(tx, &pool_id)?;
            if let RunState::Scheduled { scheduled_id, .. } = &mut status.state {
                *scheduled_id = sched_id;
            }
            db::put_run_status(tx, &pool_id, &status)?;
            Ok(serde_json::Value::Null)
        })?;
    }

    Ok(())
}

fn build_tick_plan(
    tx: &mut dyn Transaction,
    pool_id: &str,
    segment: Segment,
    expected_generation: u64,
) -> Result<serde_json::Value, HostError> {
    let mut internal = db::internal_state(tx, pool_id)?;
    if internal.generation != expected_generation {
        return serde_json::to_value(TickResult::Stale {
            current_generation: internal.generation,
        })
        .map_err(|e| HostError::Serialization(e.to_string()));
    }
    let globals = db::globals(tx, pool_id)?;

    // 1. Cancellations -> synthesized completions.
    let cancellations = db::pending_cancellations_through(tx, pool_id, segment)?;
    let mut synthesized: Vec<(WorkId, WorkResult)> = Vec::new();
    for c in cancellations.iter().take(MAX_TICK_BATCH) {
        if db::get_work_item(tx, pool_id, c.work_id)?.is_some() {
            synthesized.push((c.work_id, WorkResult::Canceled));
        }
        db::delete_pending_cancellation(tx, pool_id, c.id);
    }

    // 2. Completions (stored + synthesized): retry or finalize.
    let stored_completions = db::pending_completions_through(tx, pool_id, segment)?;
    let mut to_dispatch: Vec<WorkItem> = Vec::new();
    let mut on_complete_calls: Vec<(dex_types::OnComplete, WorkId, WorkResult)> = Vec::new();

    let mut handle_completion = |tx: &mut dyn Transaction,
                                  internal: &mut InternalState,
                                  work_id: WorkId,
                                  result: WorkResult|
     -> Result<(), HostError> {
        let item = match db::get_work_item(tx, pool_id, work_id)? {
            Some(i) => i,
            None => return Ok(()), // already finalized by a concurrent cancellation
        };

        let retry_behavior = match &item.retry {
            dex_types::RetryOption::Disabled => None,
            dex_types::RetryOption::Default if item.fn_type.retries_by_default() => {
                Some(globals.default_retry_behavior.clone())
            }
            dex_types::RetryOption::Default => None,
            dex_types::RetryOption::Custom(rb) => Some(rb.clone()),
        };

        let should_retry = matches!(result, WorkResult::Failed { .. })
            && retry_behavior
                .as_ref()
                .is_some_and(|rb| rb.has_attempts_remaining(item.attempts));

        if should_retry {
            let rb = retry_behavior.unwrap();
            let delay = jittered_delay(&rb, item.attempts);
            let retry_at = chrono::Utc::now() + delay;
            let mut updated = item.clone();
            updated.attempts += 1;
            db::put_work_item(tx, pool_id, &updated)?;
            db::insert_pending_start(
                tx,
                pool_id,
                &crate::types::PendingStart {
                    id: PendingId::new(),
                    work_id,
                    segment: to_segment(retry_at),
                },
            )?;
            internal.remove_in_progress(work_id);
        } else {
            if let Some(oc) = item.on_complete.clone() {
                on_complete_calls.push((oc, work_id, result));
            }
            db::delete_work_item(tx, pool_id, work_id);
            internal.remove_in_progress(work_id);
        }
        Ok(())
    };

    for c in stored_completions.into_iter().take(MAX_TICK_BATCH) {
        let id = c.id;
        handle_completion(tx, &mut internal, c.work_id, c.result)?;
        db::delete_pending_completion(tx, pool_id, id);
    }
    for (work_id, result) in synthesized {
        handle_completion(tx, &mut internal, work_id, result)?;
    }

    // 3. Starts, subject to capacity.
    let starts = db::pending_starts_through(tx, pool_id, segment)?;
    let capacity = globals
        .max_parallelism
        .saturating_sub(internal.in_progress_ids.len() as u32) as usize;
    let mut saturated_remaining = false;
    for (i, s) in starts.iter().enumerate() {
        if i >= capacity || i >= MAX_TICK_BATCH {
            saturated_remaining = true;
            break;
        }
        if let Some(item) = db::get_work_item(tx, pool_id, s.work_id)? {
            to_dispatch.push(item);
            internal.in_progress_ids.push(s.work_id);
            db::delete_pending_start(tx, pool_id, s.id);
        }
    }

    internal.generation += 1;
    db::put_internal_state(tx, pool_id, &internal)?;

    let (reschedule, needs_scheduler_dispatch) = if saturated_remaining {
        let next = current_segment();
        (
            RunState::Scheduled {
                segment: next,
                scheduled_id: SchedulerId::new(),
                saturated: true,
            },
            Some(next),
        )
    } else {
        // Find the earliest future pending row, if any.
        let earliest = db::pending_starts_through(tx, pool_id, Segment(u64::MAX))?
            .into_iter()
            .map(|s| s.segment)
            .chain(
                db::pending_completions_through(tx, pool_id, Segment(u64::MAX))?
                    .into_iter()
                    .map(|c| c.segment),
            )
            .filter(|seg| *seg > segment)
            .min();
        match earliest {
            Some(seg) => (
                RunState::Scheduled {
                    segment: seg,
                    scheduled_id: SchedulerId::new(),
                    saturated: false,
                },
                Some(seg),
            ),
            None => (RunState::Idle, None),
        }
    };

    db::put_run_status(tx, pool_id, &RunStatus { state: reschedule.clone() })?;

    serde_json::to_value(TickResult::Plan(TickPlan {
        to_dispatch,
        on_complete_calls,
        reschedule,
        needs_scheduler_dispatch,
        next_generation: internal.generation,
    }))
    .map_err(|e| HostError::Serialization(e.to_string()))
}

fn dispatch_one(pool: &Arc<Workpool>, item: WorkItem) {
    let pool = pool.clone();
    tokio::spawn(async move {
        let outcome = pool.registry.dispatch(&item.fn_handle, item.fn_args.clone()).await;
        let result = match outcome {
            Ok(Ok(value)) => WorkResult::Success { return_value: value },
            Ok(Err(err)) => WorkResult::Failed { error: err },
            Err(host_err) => WorkResult::Failed {
                error: host_err.to_string(),
            },
        };

        let pool_id = pool.pool_id.clone();
        let work_id = item.id;
        let completion_segment = current_segment();
        let insert = dex_host::transact_typed::<()>(pool.store.as_ref(), move |tx| {
            db::insert_pending_completion(
                tx,
                &pool_id,
                &crate::types::PendingCompletion {
                    id: PendingId::new(),
                    work_id,
                    segment: completion_segment,
                    result,
                },
            )?;
            Ok(serde_json::Value::Null)
        });

        if let Err(e) = insert {
            error!(%work_id, error = %e, "failed to record work item completion");
            return;
        }

        if let Err(e) = pool.kick("completion", None).await {
            warn!(%work_id, error = %e, "failed to kick main loop after completion");
        }
    });
}

async fn run_on_complete(
    pool: &Arc<Workpool>,
    on_complete: dex_types::OnComplete,
    work_id: WorkId,
    result: WorkResult,
) {
    let payload = serde_json::json!({
        "context": on_complete.context,
        "work_id": work_id.to_string(),
        "result": result,
    });
    match pool.registry.dispatch(&on_complete.fn_handle, payload).await {
        Ok(Ok(_)) => {
            info!(%work_id, "on_complete callback succeeded");
        }
        Ok(Err(err)) => {
            error!(%work_id, %err, "on_complete callback failed");
            record_failure(pool, work_id, result, err).await;
        }
        Err(err) => {
            error!(%work_id, %err, "on_complete handle could not be dispatched");
            record_failure(pool, work_id, result, err.to_string()).await;
        }
    }
}

async fn record_failure(pool: &Arc<Workpool>, work_id: WorkId, result: WorkResult, error: String) {
    let pool_id = pool.pool_id.clone();
    let failure = OnCompleteFailure {
        work_id,
        result,
        error,
        failed_at: chrono::Utc::now(),
    };
    if let Err(e) = dex_host::transact_typed::<()>(pool.store.as_ref(), move |tx| {
        db::record_on_complete_failure(tx, &pool_id, &failure)?;
        Ok(serde_json::Value::Null)
    }) {
        error!(%work_id, error = %e, "failed to record on_complete failure");
    }
}
