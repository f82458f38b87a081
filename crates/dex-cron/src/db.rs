use crate::types::{CronId, CronJob};
use dex_host::{HostError, Transaction, TransactionExt};

const JOBS: &str = "dex_cron:jobs";

pub fn get_job(tx: &dyn Transaction, id: CronId) -> Result<Option<CronJob>, HostError> {
    tx.get(JOBS, &id.0.to_string())
}

pub fn put_job(tx: &mut dyn Transaction, job: &CronJob) -> Result<(), HostError> {
    tx.put(JOBS, &job.id.0.to_string(), job)
}

pub fn delete_job(tx: &mut dyn Transaction, id: CronId) {
    tx.delete(JOBS, &id.0.to_string());
}

pub fn all_jobs(tx: &dyn Transaction) -> Result<Vec<CronJob>, HostError> {
    let all: Vec<(String, CronJob)> = tx.scan(JOBS)?;
    Ok(all.into_iter().map(|(_, j)| j).collect())
}
