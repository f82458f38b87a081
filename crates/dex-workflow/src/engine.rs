//! Public entry point: creates workflow executions, drives them forward
//! whenever new information arrives (a dispatched step completes, an
//! event is sent), and answers status/listing queries. Wires together
//! `dex_host` (storage + scheduler + function registry), `dex_workpool`
//! (dispatching query/mutation/action steps with retry), and
//! [`crate::executor`] (the replay tick itself).

use crate::db;
use crate::error::WorkflowError;
use crate::executor::{self, PendingSideEffect, StepKind, TickOutcome};
use crate::registry::WorkflowRegistry;
use crate::types::{Event, EventId, EventState, ParentLink, RunResult, Workflow, WorkflowId};
use dex_host::{FunctionRegistry, HostError, Scheduler, Store};
use dex_types::{FnType, OnComplete, PromiseId, RetryOption};
use dex_workpool::Workpool;
use std::sync::Arc;
use tracing::{error, info, warn};

const RESUME_STEP_HANDLE: &str = "dex_workflow:resume_step";

/// Durable workflow execution engine. One instance per process; every
/// workflow this process creates or resumes shares its `Store`,
/// `Scheduler`, and registries.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    function_registry: FunctionRegistry,
    workflow_registry: WorkflowRegistry,
    workpool: Arc<Workpool>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        function_registry: FunctionRegistry,
        workflow_registry: WorkflowRegistry,
    ) -> Arc<Self> {
        let workpool = Workpool::new("dex_workflow", store.clone(), scheduler, function_registry.clone());
        let engine = Arc::new(Self {
            store,
            function_registry: function_registry.clone(),
            workflow_registry,
            workpool,
        });
        register_resume_handle(&engine, &function_registry);
        engine
    }

    /// Creates a new workflow execution and drives its first tick.
    pub async fn create(
        self: &Arc<Self>,
        name: impl Into<String>,
        workflow_handle: impl Into<String>,
        args: serde_json::Value,
        on_complete: Option<OnComplete>,
    ) -> Result<WorkflowId, WorkflowError> {
        let id = WorkflowId::new();
        let workflow_handle = workflow_handle.into();
        let promise_root = PromiseId::promise_root(workflow_handle.as_bytes(), &id.0.to_string(), None);
        let workflow = Workflow {
            id,
            name: name.into(),
            workflow_handle,
            args,
            on_complete,
            generation_number: 0,
            run_result: None,
            promise_root,
            parent: None,
            created_at: chrono::Utc::now(),
        };
        dex_host::transact_typed::<()>(self.store.as_ref(), {
            let workflow = workflow.clone();
            move |tx| {
                db::put_workflow(tx, &workflow)?;
                Ok(serde_json::Value::Null)
            }
        })?;

        self.advance(id).await?;
        Ok(id)
    }

    /// Runs one replay tick and dispatches whatever it produces: finalizes
    /// the workflow row on a terminal result, or enqueues/records the new
    /// steps a blocked tick needs before it can continue.
    pub async fn advance(self: &Arc<Self>, workflow_id: WorkflowId) -> Result<(), WorkflowError> {
        match executor::run_tick(self.store.as_ref(), &self.workflow_registry, workflow_id).await? {
            TickOutcome::Finalized(result) => self.finalize(workflow_id, result).await,
            TickOutcome::Blocked(effects) => {
                for effect in effects {
                    self.dispatch_side_effect(workflow_id, effect).await?;
                }
                Ok(())
            }
        }
    }

    async fn dispatch_side_effect(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
        effect: PendingSideEffect,
    ) -> Result<(), WorkflowError> {
        match effect {
            PendingSideEffect::DispatchFunction {
                promise_id,
                kind,
                name,
                args,
            } => {
                let fn_type = match kind {
                    StepKind::Query => FnType::Query,
                    StepKind::Mutation => FnType::Mutation,
                    StepKind::Action => FnType::Action,
                    StepKind::Workflow | StepKind::AwaitEvent => {
                        unreachable!("workflow/event steps never produce a DispatchFunction effect")
                    }
                };
                let generation_number = dex_host::transact_typed::<u64>(self.store.as_ref(), move |tx| {
                    let wf = db::get_workflow(tx, workflow_id)?.ok_or(HostError::NotFound {
                        table: "dex_workflow:workflows".into(),
                        key: workflow_id.to_string(),
                    })?;
                    serde_json::to_value(wf.generation_number).map_err(|e| HostError::Serialization(e.to_string()))
                })?;
                let context = serde_json::json!({
                    "workflow_id": workflow_id.0,
                    "promise_id": promise_id,
                    "generation_number": generation_number,
                });
                self.workpool
                    .enqueue(
                        name.clone(),
                        name,
                        args,
                        fn_type,
                        chrono::Utc::now(),
                        RetryOption::Default,
                        Some(OnComplete {
                            fn_handle: RESUME_STEP_HANDLE.to_string(),
                            context,
                        }),
                        None,
                    )
                    .await?;
                Ok(())
            }
            PendingSideEffect::SpawnWorkflow {
                promise_id,
                workflow_name,
                args,
            } => self.spawn_child(workflow_id, promise_id, workflow_name, args).await,
            PendingSideEffect::AwaitEvent { promise_id, name } => {
                self.record_wait(workflow_id, promise_id, name).await
            }
        }
    }

    async fn spawn_child(
        self: &Arc<Self>,
        parent_id: WorkflowId,
        parent_promise_id: PromiseId,
        workflow_handle: String,
        args: serde_json::Value,
    ) -> Result<(), WorkflowError> {
        let parent = dex_host::transact_typed::<Option<Workflow>>(self.store.as_ref(), move |tx| {
            let wf = db::get_workflow(tx, parent_id)?;
            serde_json::to_value(wf).map_err(|e| HostError::Serialization(e.to_string()))
        })?
        .ok_or(WorkflowError::NotFound(parent_id.0))?;

        let child_id = WorkflowId::new();
        let promise_root = PromiseId::promise_root(
            workflow_handle.as_bytes(),
            &child_id.0.to_string(),
            Some(&parent_promise_id),
        );
        let child = Workflow {
            id: child_id,
            name: workflow_handle.clone(),
            workflow_handle,
            args,
            on_complete: None,
            generation_number: 0,
            run_result: None,
            promise_root,
            parent: Some(ParentLink {
                workflow_id: parent_id,
                promise_id: parent_promise_id,
                generation_number: parent.generation_number,
            }),
            created_at: chrono::Utc::now(),
        };
        dex_host::transact_typed::<()>(self.store.as_ref(), {
            let child = child.clone();
            move |tx| {
                db::put_workflow(tx, &child)?;
                Ok(serde_json::Value::Null)
            }
        })?;

        self.advance(child_id).await
    }

    async fn record_wait(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
        promise_id: PromiseId,
        name: String,
    ) -> Result<(), WorkflowError> {
        let pre_sent = dex_host::transact_typed::<Option<Result<serde_json::Value, String>>>(self.store.as_ref(), {
            let name = name.clone();
            let promise_id = promise_id.clone();
            move |tx| {
                let existing = db::find_events(tx, workflow_id, Some(&name))?;
                if existing
                    .iter()
                    .any(|e| matches!(&e.state, EventState::Waiting { promise_id: p, .. } if *p == promise_id))
                {
                    return serde_json::to_value(Option::<Result<serde_json::Value, String>>::None)
                        .map_err(|e| HostError::Serialization(e.to_string()));
                }
                if existing
                    .iter()
                    .any(|e| matches!(&e.state, EventState::Consumed { promise_id: p, .. } if *p == promise_id))
                {
                    return Err(HostError::Aborted(format!(
                        "event {name:?} on workflow {workflow_id} was already consumed by this await"
                    )));
                }
                if let Some(mut sent) = existing.into_iter().find(|e| matches!(e.state, EventState::Sent { .. })) {
                    let (result, sent_at) = match sent.state.clone() {
                        EventState::Sent { result, sent_at } => (result, sent_at),
                        _ => unreachable!(),
                    };
                    sent.state = EventState::Consumed {
                        promise_id,
                        workflow_id,
                        waiting_at: chrono::Utc::now(),
                        sent_at,
                        consumed_at: chrono::Utc::now(),
                    };
                    db::put_event(tx, &sent)?;
                    return serde_json::to_value(Some(result)).map_err(|e| HostError::Serialization(e.to_string()));
                }
                let event = Event {
                    id: EventId::new(),
                    workflow_id,
                    name: Some(name),
                    state: EventState::Waiting {
                        promise_id,
                        workflow_id,
                        waiting_at: chrono::Utc::now(),
                    },
                };
                db::put_event(tx, &event)?;
                serde_json::to_value(Option::<Result<serde_json::Value, String>>::None)
                    .map_err(|e| HostError::Serialization(e.to_string()))
            }
        })?;

        if let Some(result) = pre_sent {
            self.append_signal_received(workflow_id, promise_id, &name, result).await?;
            self.advance(workflow_id).await?;
        }
        Ok(())
    }

    /// Delivers a value to the named event for `workflow_id`. If the
    /// workflow is already waiting on it, resolves the wait and resumes
    /// the workflow; otherwise records the delivery so a later
    /// `await_event` call picks it up immediately (a `Sent` event with no
    /// waiter yet).
    pub async fn send_event(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
        name: &str,
        result: Result<serde_json::Value, String>,
    ) -> Result<(), WorkflowError> {
        let waiter = dex_host::transact_typed::<Option<Event>>(self.store.as_ref(), {
            let name = name.to_string();
            let result = result.clone();
            move |tx| {
                let existing = db::find_events(tx, workflow_id, Some(&name))?;
                let already_resolved = existing
                    .iter()
                    .any(|e| matches!(e.state, EventState::Sent { .. } | EventState::Consumed { .. }));
                let waiting = existing
                    .into_iter()
                    .find(|e| matches!(e.state, EventState::Waiting { .. }));
                match waiting {
                    Some(mut event) => {
                        let (promise_id, wf_id, waiting_at) = match event.state.clone() {
                            EventState::Waiting {
                                promise_id,
                                workflow_id,
                                waiting_at,
                            } => (promise_id, workflow_id, waiting_at),
                            _ => unreachable!(),
                        };
                        event.state = EventState::Consumed {
                            promise_id,
                            workflow_id: wf_id,
                            waiting_at,
                            sent_at: chrono::Utc::now(),
                            consumed_at: chrono::Utc::now(),
                        };
                        db::put_event(tx, &event)?;
                        serde_json::to_value(Some(event)).map_err(|e| HostError::Serialization(e.to_string()))
                    }
                    None => {
                        if already_resolved {
                            return Err(HostError::Aborted(format!(
                                "event {name:?} on workflow {workflow_id} already sent or consumed"
                            )));
                        }
                        let event = Event {
                            id: EventId::new(),
                            workflow_id,
                            name: Some(name),
                            state: EventState::Sent {
                                result,
                                sent_at: chrono::Utc::now(),
                            },
                        };
                        db::put_event(tx, &event)?;
                        serde_json::to_value(Option::<Event>::None).map_err(|e| HostError::Serialization(e.to_string()))
                    }
                }
            }
        })?;

        if let Some(event) = waiter {
            if let EventState::Consumed { promise_id, .. } = &event.state {
                self.append_signal_received(workflow_id, promise_id.clone(), name, result)
                    .await?;
                self.advance(workflow_id).await?;
            }
        }
        Ok(())
    }

    async fn append_signal_received(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
        promise_id: PromiseId,
        name: &str,
        result: Result<serde_json::Value, String>,
    ) -> Result<(), WorkflowError> {
        let payload = dex_types::Payload::new(
            serde_json::to_vec(&result.unwrap_or(serde_json::Value::Null)).unwrap_or_default(),
            dex_types::Codec::Json,
        );
        let name = name.to_string();
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            let mut entries = db::get_journal(tx, workflow_id)?;
            let sequence = entries.len() as u64;
            let entry = dex_types::JournalEntry {
                sequence,
                timestamp: chrono::Utc::now(),
                event: dex_types::EventType::SignalReceived {
                    promise_id,
                    signal_name: name,
                    payload,
                    delivery_id: sequence,
                },
            };
            dex_journal::size::check_append_size(&entries, &entry)
                .map_err(|e| HostError::Aborted(e.to_string()))?;
            entries.push(entry);
            db::put_journal(tx, workflow_id, &entries)?;
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    /// Idempotent: a workflow already carrying a `run_result` is left alone,
    /// so a late-arriving step completion after `cancel()` has already
    /// finalized it can't overwrite the result or re-fire `on_complete`/
    /// `resolve_parent_step`.
    async fn finalize(self: &Arc<Self>, workflow_id: WorkflowId, result: RunResult) -> Result<(), WorkflowError> {
        let workflow = dex_host::transact_typed::<Option<Workflow>>(self.store.as_ref(), move |tx| {
            let mut wf = db::get_workflow(tx, workflow_id)?.ok_or(HostError::NotFound {
                table: "dex_workflow:workflows".into(),
                key: workflow_id.to_string(),
            })?;
            if wf.run_result.is_some() {
                return serde_json::to_value(Option::<Workflow>::None)
                    .map_err(|e| HostError::Serialization(e.to_string()));
            }
            wf.run_result = Some(result.clone());
            wf.generation_number += 1;
            db::put_workflow(tx, &wf)?;
            serde_json::to_value(Some(wf)).map_err(|e| HostError::Serialization(e.to_string()))
        })?;

        let Some(workflow) = workflow else {
            return Ok(());
        };

        info!(%workflow_id, "workflow finalized");

        if let Some(on_complete) = &workflow.on_complete {
            let outcome: Result<serde_json::Value, String> = match &workflow.run_result {
                Some(RunResult::Success { return_value }) => Ok(return_value.clone()),
                Some(RunResult::Failed { error }) => Err(error.clone()),
                Some(RunResult::Canceled) => Err("canceled".to_string()),
                None => unreachable!(),
            };
            let payload = serde_json::json!({
                "context": on_complete.context,
                "result": outcome,
            });
            match self.function_registry.dispatch(&on_complete.fn_handle, payload).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(%workflow_id, %err, "workflow on_complete callback failed"),
                Err(err) => warn!(%workflow_id, %err, "workflow on_complete handle could not be dispatched"),
            }
        }

        if let Some(parent) = &workflow.parent {
            self.resolve_parent_step(parent, &workflow).await?;
        }

        Ok(())
    }

    async fn resolve_parent_step(
        self: &Arc<Self>,
        parent: &ParentLink,
        child: &Workflow,
    ) -> Result<(), WorkflowError> {
        let outcome: Result<serde_json::Value, String> = match &child.run_result {
            Some(RunResult::Success { return_value }) => Ok(return_value.clone()),
            Some(RunResult::Failed { error }) => Err(error.clone()),
            Some(RunResult::Canceled) => Err("child workflow canceled".to_string()),
            None => unreachable!(),
        };
        let payload = executor::encode_outcome(&outcome);
        let parent_id = parent.workflow_id;
        let promise_id = parent.promise_id.clone();

        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            let mut entries = db::get_journal(tx, parent_id)?;
            let sequence = entries.len() as u64;
            let entry = dex_types::JournalEntry {
                sequence,
                timestamp: chrono::Utc::now(),
                event: dex_types::EventType::InvokeCompleted {
                    promise_id: promise_id.clone(),
                    result: payload.clone(),
                    attempt: 1,
                },
            };
            dex_journal::size::check_append_size(&entries, &entry)
                .map_err(|e| HostError::Aborted(e.to_string()))?;
            entries.push(entry);
            db::put_journal(tx, parent_id, &entries)?;
            Ok(serde_json::Value::Null)
        })?;

        self.advance(parent_id).await
    }

    /// Cancels `workflow_id` and, recursively, every still-running child it
    /// spawned via `spawn_workflow`, plus any step the workflow itself
    /// currently has in flight in the shared workpool.
    pub async fn cancel(self: &Arc<Self>, workflow_id: WorkflowId) -> Result<(), WorkflowError> {
        let children = dex_host::transact_typed::<Vec<Workflow>>(self.store.as_ref(), move |tx| {
            serde_json::to_value(db::running_children_of(tx, workflow_id)?)
                .map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        for child in children {
            Box::pin(self.cancel(child.id)).await?;
        }

        self.workpool
            .cancel_matching(
                dex_workpool::CancelFilter::OnCompleteContextEquals {
                    key: "workflow_id".to_string(),
                    value: serde_json::json!(workflow_id.0),
                },
                None,
            )
            .await?;

        self.finalize(workflow_id, RunResult::Canceled).await
    }

    pub async fn cleanup(self: &Arc<Self>, workflow_id: WorkflowId) -> Result<(), WorkflowError> {
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::delete_workflow(tx, workflow_id);
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    pub async fn get_status(self: &Arc<Self>, workflow_id: WorkflowId) -> Result<Option<Workflow>, WorkflowError> {
        let wf = dex_host::transact_typed::<Option<Workflow>>(self.store.as_ref(), move |tx| {
            let wf = db::get_workflow(tx, workflow_id)?;
            serde_json::to_value(wf).map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        Ok(wf)
    }

    pub async fn list(self: &Arc<Self>) -> Result<Vec<Workflow>, WorkflowError> {
        let all = dex_host::transact_typed::<Vec<Workflow>>(self.store.as_ref(), move |tx| {
            let all = db::list_workflows(tx)?;
            serde_json::to_value(all).map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        Ok(all)
    }

    pub async fn list_by_name(self: &Arc<Self>, name: &str) -> Result<Vec<Workflow>, WorkflowError> {
        Ok(self.list().await?.into_iter().filter(|w| w.name == name).collect())
    }

    /// Raw journal entries for `workflow_id`, for inspection/debugging.
    pub async fn list_steps(
        self: &Arc<Self>,
        workflow_id: WorkflowId,
    ) -> Result<Vec<dex_types::JournalEntry>, WorkflowError> {
        let entries = dex_host::transact_typed::<Vec<dex_types::JournalEntry>>(self.store.as_ref(), move |tx| {
            let entries = db::get_journal(tx, workflow_id)?;
            serde_json::to_value(entries).map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        Ok(entries)
    }
}

/// Registers the handle `dex_workpool` calls back into when a dispatched
/// step (query/mutation/action) finishes: appends the `InvokeCompleted`
/// journal entry and advances the workflow.
fn register_resume_handle(engine: &Arc<WorkflowEngine>, registry: &FunctionRegistry) {
    let weak = Arc::downgrade(engine);
    registry.register(RESUME_STEP_HANDLE, move |payload| {
        let weak = weak.clone();
        async move {
            let Some(engine) = weak.upgrade() else {
                return Ok(serde_json::Value::Null);
            };
            let context = payload.get("context").cloned().unwrap_or(serde_json::Value::Null);
            let workflow_id: WorkflowId = serde_json::from_value(
                context
                    .get("workflow_id")
                    .cloned()
                    .ok_or("resume_step payload missing workflow_id")?,
            )
            .map_err(|e| e.to_string())?;
            let promise_id: PromiseId = serde_json::from_value(
                context
                    .get("promise_id")
                    .cloned()
                    .ok_or("resume_step payload missing promise_id")?,
            )
            .map_err(|e| e.to_string())?;
            let dispatched_generation: u64 = serde_json::from_value(
                context
                    .get("generation_number")
                    .cloned()
                    .ok_or("resume_step payload missing generation_number")?,
            )
            .map_err(|e| e.to_string())?;

            let current_generation = dex_host::transact_typed::<Option<u64>>(engine.store.as_ref(), move |tx| {
                let wf = db::get_workflow(tx, workflow_id)?;
                serde_json::to_value(wf.map(|w| w.generation_number))
                    .map_err(|e| HostError::Serialization(e.to_string()))
            })
            .map_err(|e| e.to_string())?;
            if current_generation != Some(dispatched_generation) {
                let stale = WorkflowError::StaleGeneration {
                    expected: dispatched_generation,
                    actual: current_generation.unwrap_or(dispatched_generation),
                };
                warn!(%workflow_id, %stale, "stale step completion fired, aborting silently");
                return Ok(serde_json::Value::Null);
            }

            let work_result: dex_types::WorkResult =
                serde_json::from_value(payload.get("result").cloned().ok_or("resume_step payload missing result")?)
                    .map_err(|e| e.to_string())?;

            let outcome: Result<serde_json::Value, String> = match work_result {
                dex_types::WorkResult::Success { return_value } => Ok(return_value),
                dex_types::WorkResult::Failed { error } => Err(error),
                dex_types::WorkResult::Canceled => Err("canceled".to_string()),
            };
            let result_payload = executor::encode_outcome(&outcome);

            let append = dex_host::transact_typed::<()>(engine.store.as_ref(), move |tx| {
                let mut entries = db::get_journal(tx, workflow_id)?;
                let sequence = entries.len() as u64;
                let entry = dex_types::JournalEntry {
                    sequence,
                    timestamp: chrono::Utc::now(),
                    event: dex_types::EventType::InvokeCompleted {
                        promise_id,
                        result: result_payload,
                        attempt: 1,
                    },
                };
                dex_journal::size::check_append_size(&entries, &entry)
                    .map_err(|e| HostError::Aborted(e.to_string()))?;
                entries.push(entry);
                db::put_journal(tx, workflow_id, &entries)?;
                Ok(serde_json::Value::Null)
            });
            if let Err(e) = append {
                error!(%workflow_id, error = %e, "failed to journal step completion");
                return Err(e.to_string());
            }

            if let Err(e) = engine.advance(workflow_id).await {
                error!(%workflow_id, error = %e, "failed to advance workflow after step completion");
                return Err(e.to_string());
            }
            Ok(serde_json::Value::Null)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_host::memory::{InMemoryScheduler, InMemoryStore};
    use dex_types::WorkResult;

    fn build() -> (Arc<WorkflowEngine>, FunctionRegistry) {
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let function_registry = FunctionRegistry::new();
        let scheduler: Arc<dyn Scheduler> = Arc::new(InMemoryScheduler::new(function_registry.clone()));
        let workflow_registry = WorkflowRegistry::new();
        let engine = WorkflowEngine::new(store, scheduler, function_registry.clone(), workflow_registry);
        (engine, function_registry)
    }

    #[test_log::test(tokio::test)]
    async fn cancel_then_late_step_completion_does_not_reopen_the_workflow() {
        let (engine, function_registry) = build();
        engine.workflow_registry.register("slow_wf", |ctx, args| async move {
            ctx.run_action("slow_action", args).await
        });

        let workflow_id = engine
            .create("test", "slow_wf", serde_json::json!({"n": 1}), None)
            .await
            .unwrap();

        let entries = engine.list_steps(workflow_id).await.unwrap();
        let promise_id = match &entries[0].event {
            dex_types::EventType::InvokeScheduled { promise_id, .. } => promise_id.clone(),
            other => panic!("expected InvokeScheduled, got {other:?}"),
        };

        engine.cancel(workflow_id).await.unwrap();
        let after_cancel = engine.get_status(workflow_id).await.unwrap().unwrap();
        similar_asserts::assert_eq!(after_cancel.run_result, Some(RunResult::Canceled));
        assert_eq!(after_cancel.generation_number, 1);

        // The action dispatched before cancel() finally completes, stamped
        // with the generation it was dispatched under (0) — a round late.
        let context = serde_json::json!({
            "workflow_id": workflow_id.0,
            "promise_id": promise_id,
            "generation_number": 0u64,
        });
        let payload = serde_json::json!({
            "context": context,
            "result": WorkResult::Success { return_value: serde_json::json!("too late") },
        });
        function_registry.dispatch(RESUME_STEP_HANDLE, payload).await.unwrap().unwrap();

        let after_late_completion = engine.get_status(workflow_id).await.unwrap().unwrap();
        similar_asserts::assert_eq!(after_late_completion.run_result, Some(RunResult::Canceled));
        assert_eq!(
            after_late_completion.generation_number, 1,
            "late completion must not bump the generation a second time"
        );
    }

    #[test_log::test(tokio::test)]
    async fn replay_with_changed_step_args_raises_a_determinism_violation() {
        let (engine, _function_registry) = build();
        engine.workflow_registry.register("echo_wf", |ctx, args| async move {
            ctx.run_action("echo", args).await
        });

        // Seed a workflow whose journal already recorded `echo({"n": 1})`
        // as the first call a replay will make, then change `args` to
        // `{"n": 2}` before that replay runs — the same situation a code
        // change between deploys would produce.
        let workflow_id = WorkflowId::new();
        let promise_root = PromiseId::promise_root(b"echo_wf", &workflow_id.0.to_string(), None);
        let workflow = Workflow {
            id: workflow_id,
            name: "test".to_string(),
            workflow_handle: "echo_wf".to_string(),
            args: serde_json::json!({"n": 2}),
            on_complete: None,
            generation_number: 0,
            run_result: None,
            promise_root: promise_root.clone(),
            parent: None,
            created_at: chrono::Utc::now(),
        };
        // `process_batch`'s sequence counter starts at the journal's
        // current length, so with one seeded entry the first live request
        // this tick lands on sequence 1, not 0.
        let recorded_promise_id = promise_root.child(1).unwrap();
        let seeded_entry = dex_types::JournalEntry {
            sequence: 0,
            timestamp: chrono::Utc::now(),
            event: dex_types::EventType::InvokeScheduled {
                promise_id: recorded_promise_id,
                kind: dex_types::InvokeKind::Function,
                function_name: "echo".to_string(),
                input: dex_types::Payload::new(
                    serde_json::to_vec(&serde_json::json!({"n": 1})).unwrap(),
                    dex_types::Codec::Json,
                ),
                retry_policy: None,
            },
        };
        dex_host::transact_typed::<()>(engine.store.as_ref(), move |tx| {
            db::put_workflow(tx, &workflow)?;
            db::put_journal(tx, workflow_id, std::slice::from_ref(&seeded_entry))?;
            Ok(serde_json::Value::Null)
        })
        .unwrap();

        let err = engine.advance(workflow_id).await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::DeterminismViolation { sequence: 1, .. }),
            "expected a determinism violation on sequence 1, got {err:?}"
        );
    }
}
