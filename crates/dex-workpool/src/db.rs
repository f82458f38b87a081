//! Typed table accessors over `dex_host::Transaction`. Table names are
//! namespaced per pool instance (`pool_id`) so one `Store` can host many
//! independent Workpools, matching the spec's "each pool instance owns its
//! own parallelism budget" model.

use crate::types::{
    InternalState, OnCompleteFailure, PendingCancellation, PendingCompletion, PendingId,
    PendingStart, RunStatus,
};
use dex_host::{HostError, Transaction, TransactionExt};
use dex_types::{Globals, WorkId, WorkItem};

fn table(pool_id: &str, name: &str) -> String {
    format!("workpool:{pool_id}:{name}")
}

pub fn globals(tx: &dyn Transaction, pool_id: &str) -> Result<Globals, HostError> {
    Ok(tx
        .get::<Globals>(&table(pool_id, "globals"), "singleton")?
        .unwrap_or_default())
}

pub fn put_globals(tx: &mut dyn Transaction, pool_id: &str, globals: &Globals) -> Result<(), HostError> {
    tx.put(&table(pool_id, "globals"), "singleton", globals)
}

pub fn run_status(tx: &dyn Transaction, pool_id: &str) -> Result<RunStatus, HostError> {
    Ok(tx
        .get::<RunStatus>(&table(pool_id, "run_status"), "singleton")?
        .unwrap_or_default())
}

pub fn put_run_status(tx: &mut dyn Transaction, pool_id: &str, status: &RunStatus) -> Result<(), HostError> {
    tx.put(&table(pool_id, "run_status"), "singleton", status)
}

pub fn internal_state(tx: &dyn Transaction, pool_id: &str) -> Result<InternalState, HostError> {
    Ok(tx
        .get::<InternalState>(&table(pool_id, "internal_state"), "singleton")?
        .unwrap_or_default())
}

pub fn put_internal_state(
    tx: &mut dyn Transaction,
    pool_id: &str,
    state: &InternalState,
) -> Result<(), HostError> {
    tx.put(&table(pool_id, "internal_state"), "singleton", state)
}

pub fn put_work_item(tx: &mut dyn Transaction, pool_id: &str, item: &WorkItem) -> Result<(), HostError> {
    tx.put(&table(pool_id, "work_items"), &item.id.to_string(), item)
}

pub fn get_work_item(
    tx: &dyn Transaction,
    pool_id: &str,
    id: WorkId,
) -> Result<Option<WorkItem>, HostError> {
    tx.get(&table(pool_id, "work_items"), &id.to_string())
}

pub fn delete_work_item(tx: &mut dyn Transaction, pool_id: &str, id: WorkId) {
    tx.delete(&table(pool_id, "work_items"), &id.to_string())
}

pub fn insert_pending_start(
    tx: &mut dyn Transaction,
    pool_id: &str,
    entry: &PendingStart,
) -> Result<(), HostError> {
    tx.put(&table(pool_id, "pending_start"), &entry.id.0.to_string(), entry)
}

pub fn insert_pending_completion(
    tx: &mut dyn Transaction,
    pool_id: &str,
    entry: &PendingCompletion,
) -> Result<(), HostError> {
    tx.put(
        &table(pool_id, "pending_completion"),
        &entry.id.0.to_string(),
        entry,
    )
}

pub fn insert_pending_cancellation(
    tx: &mut dyn Transaction,
    pool_id: &str,
    entry: &PendingCancellation,
) -> Result<(), HostError> {
    tx.put(
        &table(pool_id, "pending_cancellation"),
        &entry.id.0.to_string(),
        entry,
    )
}

/// All pending starts up to and including `segment`, ascending by segment
/// then by insertion id (the closest approximation to FIFO this flat
/// key-value layout offers).
pub fn pending_starts_through(
    tx: &dyn Transaction,
    pool_id: &str,
    segment: dex_types::Segment,
) -> Result<Vec<PendingStart>, HostError> {
    let mut all: Vec<(String, PendingStart)> = tx.scan(&table(pool_id, "pending_start"))?;
    all.retain(|(_, e)| e.segment <= segment);
    all.sort_by_key(|(k, e)| (e.segment, k.clone()));
    Ok(all.into_iter().map(|(_, e)| e).collect())
}

pub fn pending_completions_through(
    tx: &dyn Transaction,
    pool_id: &str,
    segment: dex_types::Segment,
) -> Result<Vec<PendingCompletion>, HostError> {
    let mut all: Vec<(String, PendingCompletion)> = tx.scan(&table(pool_id, "pending_completion"))?;
    all.retain(|(_, e)| e.segment <= segment);
    all.sort_by_key(|(k, e)| (e.segment, k.clone()));
    Ok(all.into_iter().map(|(_, e)| e).collect())
}

pub fn pending_cancellations_through(
    tx: &dyn Transaction,
    pool_id: &str,
    segment: dex_types::Segment,
) -> Result<Vec<PendingCancellation>, HostError> {
    let mut all: Vec<(String, PendingCancellation)> =
        tx.scan(&table(pool_id, "pending_cancellation"))?;
    all.retain(|(_, e)| e.segment <= segment);
    all.sort_by_key(|(k, e)| (e.segment, k.clone()));
    Ok(all.into_iter().map(|(_, e)| e).collect())
}

/// True if `id` already has a pending cancellation row, used to keep
/// `Workpool::cancel_matching` from re-matching (and re-requesting
/// cancellation of) an item the previous page already queued — the item
/// stays in `work_items` until the main loop processes the cancellation,
/// so a predicate like "created before X" would otherwise match it forever.
pub fn has_pending_cancellation(tx: &dyn Transaction, pool_id: &str, id: WorkId) -> Result<bool, HostError> {
    let cancellations: Vec<(String, PendingCancellation)> = tx.scan(&table(pool_id, "pending_cancellation"))?;
    Ok(cancellations.iter().any(|(_, e)| e.work_id == id))
}

/// Any pending (start or future completion) row for this work item, used
/// by `status()` to distinguish "pending" from "running".
pub fn has_any_pending(tx: &dyn Transaction, pool_id: &str, id: WorkId) -> Result<bool, HostError> {
    let starts: Vec<(String, PendingStart)> = tx.scan(&table(pool_id, "pending_start"))?;
    Ok(starts.iter().any(|(_, e)| e.work_id == id))
}

pub fn delete_pending_start(tx: &mut dyn Transaction, pool_id: &str, id: PendingId) {
    tx.delete(&table(pool_id, "pending_start"), &id.0.to_string());
}

pub fn delete_pending_completion(tx: &mut dyn Transaction, pool_id: &str, id: PendingId) {
    tx.delete(&table(pool_id, "pending_completion"), &id.0.to_string());
}

pub fn delete_pending_cancellation(tx: &mut dyn Transaction, pool_id: &str, id: PendingId) {
    tx.delete(&table(pool_id, "pending_cancellation"), &id.0.to_string());
}

pub fn record_on_complete_failure(
    tx: &mut dyn Transaction,
    pool_id: &str,
    failure: &OnCompleteFailure,
) -> Result<(), HostError> {
    tx.put(
        &table(pool_id, "on_complete_failures"),
        &format!("{}-{}", failure.work_id, failure.failed_at.timestamp_micros()),
        failure,
    )
}
