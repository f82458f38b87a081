use crate::db;
use crate::error::RetrierError;
use crate::heartbeat;
use crate::types::{Run, RunId, RunState};
use chrono::Utc;
use dex_host::{FunctionRegistry, HostError, Scheduler, SchedulerId, Store};
use dex_types::{current_segment, OnComplete, WorkResult};
use std::sync::{Arc, Weak};
use tracing::{error, info};
use uuid::Uuid;

const DISPATCH_HANDLE: &str = "dex_retrier:dispatch_run";
const RUNS_TABLE: &str = "dex_retrier:runs";

/// Durable retry wrapper for a single action, independent of any
/// `Workpool`. A caller that wants "run this once, survive a lost
/// dispatch" without standing up a whole pool reaches for this instead.
///
/// Grounded on `dex_workpool::pool::Workpool`: same `store`/`scheduler`/
/// `registry` trio, same self-registering constructor, but with the main
/// loop's three pending-queues collapsed down to one `runs` table and a
/// heartbeat in place of a tick.
pub struct ActionRetrier {
    store: Arc<dyn Store>,
    scheduler: Arc<dyn Scheduler>,
    registry: FunctionRegistry,
}

impl ActionRetrier {
    pub fn new(store: Arc<dyn Store>, scheduler: Arc<dyn Scheduler>, registry: FunctionRegistry) -> Arc<Self> {
        let retrier = Arc::new(Self {
            store,
            scheduler,
            registry,
        });
        register_dispatch_handle(&retrier);
        heartbeat::register_heartbeat_handle(&retrier);
        retrier
    }

    pub(crate) fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub(crate) fn scheduler(&self) -> &Arc<dyn Scheduler> {
        &self.scheduler
    }

    pub(crate) fn registry(&self) -> &FunctionRegistry {
        &self.registry
    }

    /// Schedule the first heartbeat cycle. Callers invoke this once after
    /// construction, the same way `InMemoryScheduler::spawn` has to be
    /// called explicitly rather than starting itself.
    pub async fn start(self: &Arc<Self>) -> Result<(), RetrierError> {
        heartbeat::schedule_next_heartbeat(self).await.map_err(RetrierError::from)
    }

    pub(crate) async fn reschedule_heartbeat(self: &Arc<Self>) -> Result<(), HostError> {
        heartbeat::schedule_next_heartbeat(self).await
    }

    /// Dispatch `fn_handle(fn_args)` through the host scheduler with
    /// durable loss detection, returning as soon as the dispatch itself is
    /// recorded — well before the action completes.
    pub async fn run(
        self: &Arc<Self>,
        fn_handle: impl Into<String>,
        fn_args: serde_json::Value,
        on_complete: Option<OnComplete>,
    ) -> Result<RunId, RetrierError> {
        let id = RunId::new();
        let run = Run {
            id,
            fn_handle: fn_handle.into(),
            fn_args,
            on_complete,
            attempts: 0,
            state: RunState::InProgress {
                scheduler_id: SchedulerId::new(), // patched with the real id after dispatch
                start_time: Utc::now(),
            },
        };
        self.persist(&run)?;
        self.schedule_dispatch(id).await?;
        Ok(id)
    }

    pub async fn status(&self, id: RunId) -> Result<RunState, RetrierError> {
        Ok(self.load(id)?.state)
    }

    pub async fn cancel(self: &Arc<Self>, id: RunId) -> Result<(), RetrierError> {
        let run = self.load(id)?;
        if let RunState::InProgress { scheduler_id, .. } = run.state {
            let _ = self.scheduler.cancel(scheduler_id).await;
        }
        self.complete(id, WorkResult::Canceled)
    }

    /// Re-dispatch a run the heartbeat has determined lost its original
    /// scheduler entry. Bumps `attempts` and replaces `scheduler_id`;
    /// leaves `start_time` reset to now so a stuck retry doesn't look like
    /// it's been in flight since the very first attempt.
    pub(crate) async fn retry(self: &Arc<Self>, mut run: Run) -> Result<(), HostError> {
        run.attempts += 1;
        let sched_id = self
            .scheduler
            .schedule_at(current_segment(), DISPATCH_HANDLE.to_string(), serde_json::json!({"run_id": run.id.0}))
            .await?;
        run.state = RunState::InProgress {
            scheduler_id: sched_id,
            start_time: Utc::now(),
        };
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::put_run(tx, &run)?;
            Ok(serde_json::Value::Null)
        })
    }

    fn persist(&self, run: &Run) -> Result<(), RetrierError> {
        let run = run.clone();
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::put_run(tx, &run)?;
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    fn load(&self, id: RunId) -> Result<Run, RetrierError> {
        let run: Option<Run> = dex_host::transact_typed(self.store.as_ref(), move |tx| {
            serde_json::to_value(db::get_run(tx, id)?).map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        run.ok_or(RetrierError::NotFound(id.0))
    }

    fn complete(&self, id: RunId, result: WorkResult) -> Result<(), RetrierError> {
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            let mut run = db::get_run(tx, id)?.ok_or_else(|| HostError::NotFound {
                table: RUNS_TABLE.to_string(),
                key: id.0.to_string(),
            })?;
            run.state = RunState::Completed {
                result: result.clone(),
                completed_at: Utc::now(),
            };
            db::put_run(tx, &run)?;
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    async fn schedule_dispatch(self: &Arc<Self>, id: RunId) -> Result<(), RetrierError> {
        let sched_id = self
            .scheduler
            .schedule_at(current_segment(), DISPATCH_HANDLE.to_string(), serde_json::json!({"run_id": id.0}))
            .await?;
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            let mut run = db::get_run(tx, id)?.ok_or_else(|| HostError::NotFound {
                table: RUNS_TABLE.to_string(),
                key: id.0.to_string(),
            })?;
            if let RunState::InProgress { scheduler_id, .. } = &mut run.state {
                *scheduler_id = sched_id;
            }
            db::put_run(tx, &run)?;
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    /// Run the action itself, called from the `DISPATCH_HANDLE` wrapper.
    /// Any `HostError` here is a real infrastructure failure and propagates
    /// so the wrapper reports it to the scheduler as a failed dispatch —
    /// the action's own failure, by contrast, is captured as a normal
    /// `WorkResult::Failed` and never surfaces as a lost dispatch.
    async fn execute(self: &Arc<Self>, id: RunId) -> Result<(), RetrierError> {
        let run = self.load(id)?;
        let outcome = self.registry.dispatch(&run.fn_handle, run.fn_args.clone()).await;
        let result = match outcome {
            Ok(Ok(value)) => WorkResult::Success { return_value: value },
            Ok(Err(err)) => WorkResult::Failed { error: err },
            Err(host_err) => WorkResult::Failed {
                error: host_err.to_string(),
            },
        };
        self.complete(id, result.clone())?;
        if let Some(on_complete) = run.on_complete.clone() {
            self.invoke_on_complete(id, on_complete, result).await;
        }
        Ok(())
    }

    async fn invoke_on_complete(&self, id: RunId, on_complete: OnComplete, result: WorkResult) {
        let payload = serde_json::json!({
            "context": on_complete.context,
            "run_id": id.0.to_string(),
            "result": result,
        });
        match self.registry.dispatch(&on_complete.fn_handle, payload).await {
            Ok(Ok(_)) => info!(%id, "on_complete callback succeeded"),
            Ok(Err(err)) => error!(%id, %err, "on_complete callback failed"),
            Err(err) => error!(%id, %err, "on_complete handle could not be dispatched"),
        }
    }
}

/// Registers the shared handle the scheduler dispatches to run one `Run`'s
/// underlying action and record its outcome. One handle serves every run
/// this retrier ever creates; `run_id` in the payload picks out which one.
fn register_dispatch_handle(retrier: &Arc<ActionRetrier>) {
    let weak: Weak<ActionRetrier> = Arc::downgrade(retrier);
    retrier.registry.register(DISPATCH_HANDLE, move |args| {
        let weak = weak.clone();
        async move {
            let Some(retrier) = weak.upgrade() else {
                return Ok(serde_json::Value::Null);
            };
            let run_id: Uuid = serde_json::from_value(args["run_id"].clone()).map_err(|e| e.to_string())?;
            retrier.execute(RunId(run_id)).await.map_err(|e| e.to_string())?;
            Ok(serde_json::Value::Null)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_host::memory::{InMemoryScheduler, InMemoryStore};
    use std::time::Duration;

    fn build() -> Arc<ActionRetrier> {
        let registry = FunctionRegistry::new();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let scheduler = InMemoryScheduler::new(registry.clone());
        scheduler.spawn();
        ActionRetrier::new(store, Arc::new(scheduler), registry)
    }

    #[test_log::test(tokio::test)]
    async fn run_dispatches_and_records_success() {
        let retrier = build();
        retrier.registry().register("double", |args: serde_json::Value| async move {
            let n = args["n"].as_i64().unwrap_or(0);
            Ok(serde_json::json!(n * 2))
        });

        let id = retrier.run("double", serde_json::json!({"n": 21}), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(dex_types::SEGMENT_MS as u64 * 3)).await;

        match retrier.status(id).await.unwrap() {
            RunState::Completed { result, .. } => {
                similar_asserts::assert_eq!(result, WorkResult::Success { return_value: serde_json::json!(42) });
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn run_records_action_failure_without_treating_it_as_a_lost_dispatch() {
        let retrier = build();
        retrier.registry().register("always_fails", |_args: serde_json::Value| async move {
            Err("boom".to_string())
        });

        let id = retrier.run("always_fails", serde_json::json!({}), None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(dex_types::SEGMENT_MS as u64 * 3)).await;

        match retrier.status(id).await.unwrap() {
            RunState::Completed { result, .. } => {
                assert_eq!(result, WorkResult::Failed { error: "boom".to_string() });
            }
            other => panic!("expected Completed, got {other:?}"),
        }
    }

    #[test_log::test(tokio::test)]
    async fn on_complete_is_invoked_with_the_run_result() {
        let retrier = build();
        retrier.registry().register("noop", |_args: serde_json::Value| async move { Ok(serde_json::json!("ok")) });

        let (tx, rx) = tokio::sync::oneshot::channel();
        let tx = std::sync::Mutex::new(Some(tx));
        retrier.registry().register("callback", move |args: serde_json::Value| {
            let sent = tx.lock().unwrap().take();
            async move {
                if let Some(sent) = sent {
                    let _ = sent.send(args);
                }
                Ok(serde_json::Value::Null)
            }
        });

        retrier
            .run(
                "noop",
                serde_json::json!({}),
                Some(OnComplete {
                    fn_handle: "callback".to_string(),
                    context: serde_json::json!({"caller": "test"}),
                }),
            )
            .await
            .unwrap();

        let payload = tokio::time::timeout(Duration::from_millis(dex_types::SEGMENT_MS as u64 * 10), rx)
            .await
            .expect("on_complete callback never fired")
            .unwrap();
        assert_eq!(payload["context"]["caller"], "test");
        assert_eq!(payload["result"]["return_value"], "ok");
    }

    #[test_log::test(tokio::test)]
    async fn cancel_marks_run_canceled_and_cancels_the_scheduler_entry() {
        let retrier = build();
        retrier.registry().register("never_called", |_args: serde_json::Value| async move {
            panic!("canceled run should not dispatch");
        });

        let id = retrier
            .run("never_called", serde_json::json!({}), None)
            .await
            .unwrap();
        retrier.cancel(id).await.unwrap();

        match retrier.status(id).await.unwrap() {
            RunState::Completed { result, .. } => assert_eq!(result, WorkResult::Canceled),
            other => panic!("expected Completed(Canceled), got {other:?}"),
        }
    }
}
