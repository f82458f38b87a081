use crate::types::{Run, RunId};
use dex_host::{HostError, Transaction, TransactionExt};

const RUNS: &str = "dex_retrier:runs";

pub fn get_run(tx: &dyn Transaction, id: RunId) -> Result<Option<Run>, HostError> {
    tx.get(RUNS, &id.0.to_string())
}

pub fn put_run(tx: &mut dyn Transaction, run: &Run) -> Result<(), HostError> {
    tx.put(RUNS, &run.id.0.to_string(), run)
}

pub fn delete_run(tx: &mut dyn Transaction, id: RunId) {
    tx.delete(RUNS, &id.0.to_string());
}

pub fn in_progress_runs(tx: &dyn Transaction) -> Result<Vec<Run>, HostError> {
    let all: Vec<(String, Run)> = tx.scan(RUNS)?;
    Ok(all
        .into_iter()
        .map(|(_, r)| r)
        .filter(|r| matches!(r.state, crate::types::RunState::InProgress { .. }))
        .collect())
}
