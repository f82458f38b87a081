//! Bridges synchronous-looking workflow handler code to the journal.
//!
//! A handler runs as an ordinary `tokio::task`. Every `ctx.run_*`/
//! `ctx.await_event` call sends a [`StepRequest`] down a bounded channel
//! and blocks on a paired `oneshot` reply. The executor, running
//! concurrently in the same tick, drains that channel: a request whose
//! answer is already in the journal gets its reply sent immediately (the
//! handler keeps running, synchronously, within the same tick); a request
//! with no journal entry gets a fresh `InvokeScheduled`/`ExecutionAwaiting`
//! entry appended and is left unanswered — its `oneshot` is simply never
//! resolved. Once any request blocks this way, the executor aborts the
//! handler task and ends the tick; the real answer arrives on a later
//! tick, scheduled by whatever side effect was dispatched for it.

use crate::db;
use crate::error::WorkflowError;
use crate::registry::WorkflowRegistry;
use crate::types::{RunResult, Workflow, WorkflowId};
use dex_host::HostError;
use dex_journal::{size::check_append_size, ReplayCache};
use dex_types::{Codec, EventType, InvokeKind, JournalEntry, Payload, PromiseId};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StepKind {
    Query,
    Mutation,
    Action,
    Workflow,
    AwaitEvent,
}

pub struct StepRequest {
    pub kind: StepKind,
    pub name: String,
    pub args: serde_json::Value,
    pub reply: oneshot::Sender<Result<serde_json::Value, String>>,
}

/// Handed to a running workflow handler in place of real I/O. Every method
/// suspends until the journal has an answer, whether that takes zero
/// ticks (replay hit) or many (a real action completing later).
#[derive(Clone)]
pub struct StepContext {
    tx: mpsc::Sender<StepRequest>,
}

impl StepContext {
    pub(crate) fn new(tx: mpsc::Sender<StepRequest>) -> Self {
        Self { tx }
    }

    async fn call(&self, kind: StepKind, name: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        let (reply_tx, reply_rx) = oneshot::channel();
        if self
            .tx
            .send(StepRequest {
                kind,
                name: name.to_string(),
                args,
                reply: reply_tx,
            })
            .await
            .is_err()
        {
            // Executor already gone (tick ending); hang until aborted.
            std::future::pending::<()>().await;
        }
        match reply_rx.await {
            Ok(result) => result,
            // Unresolved this tick: this task is about to be aborted by
            // the executor. Park rather than returning a bogus error.
            Err(_) => {
                std::future::pending::<()>().await;
                unreachable!()
            }
        }
    }

    pub async fn run_query(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        self.call(StepKind::Query, name, args).await
    }

    pub async fn run_mutation(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        self.call(StepKind::Mutation, name, args).await
    }

    pub async fn run_action(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        self.call(StepKind::Action, name, args).await
    }

    pub async fn run_workflow(&self, name: &str, args: serde_json::Value) -> Result<serde_json::Value, String> {
        self.call(StepKind::Workflow, name, args).await
    }

    pub async fn await_event(&self, name: &str) -> Result<serde_json::Value, String> {
        self.call(StepKind::AwaitEvent, name, serde_json::Value::Null).await
    }
}

/// Encodes a step's outcome into the `Payload` carried by
/// `EventType::InvokeCompleted`. The journal format itself (from
/// `dex-types`) only models "some bytes came back"; the ok/err tag is this
/// crate's own convention layered on top.
#[derive(Serialize, Deserialize)]
struct StepOutcome {
    ok: bool,
    value: serde_json::Value,
}

pub(crate) fn encode_outcome(result: &Result<serde_json::Value, String>) -> Payload {
    let outcome = match result {
        Ok(v) => StepOutcome { ok: true, value: v.clone() },
        Err(e) => StepOutcome {
            ok: false,
            value: serde_json::Value::String(e.clone()),
        },
    };
    Payload::new(serde_json::to_vec(&outcome).unwrap_or_default(), Codec::Json)
}

fn decode_outcome(payload: &Payload) -> Result<serde_json::Value, String> {
    match serde_json::from_slice::<StepOutcome>(&payload.bytes) {
        Ok(o) if o.ok => Ok(o.value),
        Ok(o) => Err(o.value.as_str().unwrap_or("step failed").to_string()),
        Err(e) => Err(format!("corrupt step outcome: {e}")),
    }
}

/// What the tick needs to do once the transaction that built it commits:
/// side effects the transaction decided on but couldn't perform itself
/// (dispatching to `dex_workpool`, spawning a nested workflow, resolving
/// an event wait) because those require `.await`.
pub enum PendingSideEffect {
    DispatchFunction {
        promise_id: PromiseId,
        kind: StepKind,
        name: String,
        args: serde_json::Value,
    },
    SpawnWorkflow {
        promise_id: PromiseId,
        workflow_name: String,
        args: serde_json::Value,
    },
    /// Handler is waiting on a named event that hasn't been sent yet;
    /// the caller must record a `Waiting` event row so a later `send`
    /// knows which promise to resolve.
    AwaitEvent {
        promise_id: PromiseId,
        name: String,
    },
}

pub enum TickOutcome {
    /// The handler finished (or failed) without blocking; the workflow is
    /// now terminal.
    Finalized(RunResult),
    /// The handler blocked on at least one new step; side effects below
    /// must be performed by the caller outside any transaction.
    Blocked(Vec<PendingSideEffect>),
}

/// Runs one replay tick for `workflow_id`: loads the journal, replays the
/// handler against it, and returns either a terminal result or the side
/// effects a blocked tick needs dispatched.
pub async fn run_tick(
    store: &dyn dex_host::Store,
    registry: &WorkflowRegistry,
    workflow_id: WorkflowId,
) -> Result<TickOutcome, WorkflowError> {
    let (workflow, entries) = dex_host::transact_typed::<(Workflow, Vec<JournalEntry>)>(
        store,
        move |tx| {
            let wf = db::get_workflow(tx, workflow_id)?
                .ok_or_else(|| HostError::NotFound {
                    table: "dex_workflow:workflows".into(),
                    key: workflow_id.to_string(),
                })?;
            let entries = db::get_journal(tx, workflow_id)?;
            serde_json::to_value((wf, entries)).map_err(|e| HostError::Serialization(e.to_string()))
        },
    )?;

    if workflow.run_result.is_some() {
        return Ok(TickOutcome::Finalized(workflow.run_result.clone().unwrap()));
    }

    let handler = registry
        .get(&workflow.workflow_handle)
        .ok_or_else(|| WorkflowError::Event(format!("no handler registered for {}", workflow.workflow_handle)))?;

    let cache = ReplayCache::build(&entries);
    let (tx_chan, mut rx_chan) = mpsc::channel::<StepRequest>(64);
    let ctx = StepContext::new(tx_chan);
    let mut join_handle = tokio::spawn(handler(ctx, workflow.args.clone()));

    loop {
        tokio::select! {
            biased;
            joined = &mut join_handle => {
                let result = match joined {
                    Ok(Ok(value)) => RunResult::Success { return_value: value },
                    Ok(Err(error)) => RunResult::Failed { error },
                    Err(join_err) => RunResult::Failed { error: format!("handler panicked: {join_err}") },
                };
                return Ok(TickOutcome::Finalized(result));
            }
            maybe_req = rx_chan.recv() => {
                let Some(first) = maybe_req else {
                    // Channel closed without the handler finishing: treat
                    // as a blocked tick with nothing new to dispatch.
                    return Ok(TickOutcome::Blocked(Vec::new()));
                };
                let mut batch = vec![first];
                while let Ok(r) = rx_chan.try_recv() {
                    batch.push(r);
                }

                let outcome = process_batch(store, workflow_id, &workflow, &entries, &cache, batch).await?;
                match outcome {
                    Some(side_effects) => {
                        join_handle.abort();
                        return Ok(TickOutcome::Blocked(side_effects));
                    }
                    None => continue, // every request in the batch resolved from cache; keep running
                }
            }
        }
    }
}

/// Processes one batch of step requests pulled off the channel in a single
/// drain. Returns `Some(side_effects)` if at least one request had no
/// journal entry yet (tick must end); `None` if every request resolved
/// from the cache and the handler can keep running this tick.
async fn process_batch(
    store: &dyn dex_host::Store,
    workflow_id: WorkflowId,
    workflow: &Workflow,
    entries: &[JournalEntry],
    cache: &ReplayCache,
    batch: Vec<StepRequest>,
) -> Result<Option<Vec<PendingSideEffect>>, WorkflowError> {
    let counter = AtomicU32::new(entries.len() as u32);
    let mut new_entries = Vec::new();
    let mut side_effects = Vec::new();
    let mut resolved_any = false;
    let mut unresolved_replies = Vec::new();

    for req in batch {
        let seq = counter.fetch_add(1, Ordering::SeqCst);
        let promise_id =
            workflow
                .promise_root
                .child(seq)
                .map_err(|e| WorkflowError::DeterminismViolation {
                    sequence: seq as u64,
                    detail: e.to_string(),
                })?;

        match req.kind {
            StepKind::AwaitEvent => {
                if let Some(payload) = cache.get_signal(&promise_id) {
                    let _ = req.reply.send(Ok(serde_json::from_slice(&payload.bytes).unwrap_or(serde_json::Value::Null)));
                    resolved_any = true;
                } else {
                    side_effects.push(PendingSideEffect::AwaitEvent {
                        promise_id,
                        name: req.name.clone(),
                    });
                    unresolved_replies.push(req.reply);
                }
            }
            _ => {
                // Steps are only ever scheduled as `InvokeKind::Function` by this
                // engine (`Http` is reserved for a future direct-HTTP step kind),
                // so a kind mismatch here can only mean the journal was corrupted.
                if let Some(scheduled) = dex_journal::resolution::find_invoke_scheduled(entries, &promise_id) {
                    let req_input = Payload::new(serde_json::to_vec(&req.args).unwrap_or_default(), Codec::Json);
                    if *scheduled.kind != InvokeKind::Function
                        || scheduled.function_name != req.name
                        || *scheduled.input != req_input
                    {
                        return Err(WorkflowError::DeterminismViolation {
                            sequence: seq as u64,
                            detail: format!(
                                "replay called {:?} but journal recorded {:?}",
                                req.name, scheduled.function_name,
                            ),
                        });
                    }
                }

                if let Some(payload) = cache.get_invoke(&promise_id) {
                    let decoded = decode_outcome(payload);
                    let _ = req.reply.send(decoded);
                    resolved_any = true;
                } else if already_scheduled(entries, &promise_id) {
                    // In flight from an earlier tick; stay blocked.
                    unresolved_replies.push(req.reply);
                } else {
                    let entry = JournalEntry {
                        sequence: seq as u64,
                        timestamp: chrono::Utc::now(),
                        event: EventType::InvokeScheduled {
                            promise_id: promise_id.clone(),
                            kind: InvokeKind::Function,
                            function_name: req.name.clone(),
                            input: Payload::new(
                                serde_json::to_vec(&req.args).unwrap_or_default(),
                                Codec::Json,
                            ),
                            retry_policy: None,
                        },
                    };
                    new_entries.push(entry);
                    side_effects.push(match req.kind {
                        StepKind::Workflow => PendingSideEffect::SpawnWorkflow {
                            promise_id,
                            workflow_name: req.name,
                            args: req.args,
                        },
                        kind => PendingSideEffect::DispatchFunction {
                            promise_id,
                            kind,
                            name: req.name,
                            args: req.args,
                        },
                    });
                    unresolved_replies.push(req.reply);
                }
            }
        }
    }
    drop(unresolved_replies); // dropping senders lets their futures hang (see StepContext::call)

    if !new_entries.is_empty() {
        dex_host::transact_typed::<()>(store, move |tx| {
            let mut current = db::get_journal(tx, workflow_id)?;
            for e in &new_entries {
                check_append_size(&current, e).map_err(|err| HostError::Aborted(err.to_string()))?;
                current.push(e.clone());
            }
            db::put_journal(tx, workflow_id, &current)?;
            Ok(serde_json::Value::Null)
        })?;
        debug!(%workflow_id, new_steps = side_effects.len(), "journaled new steps");
    }

    if side_effects.is_empty() && resolved_any {
        Ok(None)
    } else if side_effects.is_empty() {
        // Pure waits on already-in-flight work: still a blocked tick.
        Ok(Some(Vec::new()))
    } else {
        Ok(Some(side_effects))
    }
}

fn already_scheduled(entries: &[JournalEntry], pid: &PromiseId) -> bool {
    dex_journal::resolution::is_invoke_scheduled(entries, pid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_host::memory::InMemoryStore;

    fn seed_workflow(store: &dyn dex_host::Store, handle: &str, args: serde_json::Value) -> (WorkflowId, PromiseId) {
        let workflow_id = WorkflowId::new();
        let promise_root = PromiseId::promise_root(handle.as_bytes(), &workflow_id.0.to_string(), None);
        let workflow = Workflow {
            id: workflow_id,
            name: handle.to_string(),
            workflow_handle: handle.to_string(),
            args,
            on_complete: None,
            generation_number: 0,
            run_result: None,
            promise_root: promise_root.clone(),
            parent: None,
            created_at: chrono::Utc::now(),
        };
        dex_host::transact_typed::<()>(store, move |tx| {
            db::put_workflow(tx, &workflow)?;
            Ok(serde_json::Value::Null)
        })
        .unwrap();
        (workflow_id, promise_root)
    }

    #[test_log::test(tokio::test)]
    async fn new_action_step_blocks_the_tick_with_a_dispatch_side_effect() {
        let store = InMemoryStore::new();
        let registry = WorkflowRegistry::new();
        registry.register("wf", |ctx, args| async move { ctx.run_action("double", args).await });
        let (workflow_id, _) = seed_workflow(&store, "wf", serde_json::json!({"n": 21}));

        let outcome = run_tick(&store, &registry, workflow_id).await.unwrap();
        let effects = match outcome {
            TickOutcome::Blocked(effects) => effects,
            TickOutcome::Finalized(result) => panic!("expected a blocked tick, got {result:?}"),
        };
        assert_eq!(effects.len(), 1);
        match &effects[0] {
            PendingSideEffect::DispatchFunction { kind, name, args, .. } => {
                assert_eq!(*kind, StepKind::Action);
                assert_eq!(name, "double");
                similar_asserts::assert_eq!(args, &serde_json::json!({"n": 21}));
            }
            other => panic!("expected DispatchFunction, got a different side effect ({})", other_variant(other)),
        }
    }

    fn other_variant(effect: &PendingSideEffect) -> &'static str {
        match effect {
            PendingSideEffect::DispatchFunction { .. } => "DispatchFunction",
            PendingSideEffect::SpawnWorkflow { .. } => "SpawnWorkflow",
            PendingSideEffect::AwaitEvent { .. } => "AwaitEvent",
        }
    }

    #[test_log::test(tokio::test)]
    async fn replaying_a_recorded_step_with_different_args_is_a_determinism_violation() {
        let store = InMemoryStore::new();
        let registry = WorkflowRegistry::new();
        registry.register("wf", |ctx, args| async move { ctx.run_action("double", args).await });
        let (workflow_id, promise_root) = seed_workflow(&store, "wf", serde_json::json!({"n": 2}));

        // The journal remembers this call as `double({"n": 1})`; the
        // workflow's own stored args now disagree with that record. The
        // sequence counter starts at the journal's current length, so with
        // one seeded entry the live replay call lands on sequence 1.
        let recorded_promise_id = promise_root.child(1).unwrap();
        let seeded_entry = JournalEntry {
            sequence: 0,
            timestamp: chrono::Utc::now(),
            event: EventType::InvokeScheduled {
                promise_id: recorded_promise_id,
                kind: InvokeKind::Function,
                function_name: "double".to_string(),
                input: Payload::new(serde_json::to_vec(&serde_json::json!({"n": 1})).unwrap(), Codec::Json),
                retry_policy: None,
            },
        };
        dex_host::transact_typed::<()>(&store, move |tx| {
            db::put_journal(tx, workflow_id, std::slice::from_ref(&seeded_entry))?;
            Ok(serde_json::Value::Null)
        })
        .unwrap();

        let err = run_tick(&store, &registry, workflow_id).await.unwrap_err();
        assert!(
            matches!(err, WorkflowError::DeterminismViolation { sequence: 1, .. }),
            "expected a determinism violation, got {err:?}"
        );
    }
}
