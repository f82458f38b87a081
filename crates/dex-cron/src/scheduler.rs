use crate::db;
use crate::error::CronError;
use crate::schedule as sched;
use crate::types::{CronId, CronJob, Schedule};
use chrono::Utc;
use dex_host::{FunctionRegistry, HostError, Scheduler, SchedulerId, Store};
use dex_types::{current_segment, to_segment};
use std::sync::{Arc, Weak};
use tracing::{debug, warn};
use uuid::Uuid;

const RESCHEDULER_HANDLE: &str = "dex_cron:rescheduler";
const DISPATCH_HANDLE: &str = "dex_cron:dispatch";

/// A persistent interval/cron scheduler. Every [`CronJob`] keeps itself
/// alive by re-enqueuing its own rescheduler one fire ahead — grounded on
/// `dex_workpool::pool::Workpool`'s self-rescheduling main loop, collapsed
/// down to one job per row instead of a shared pending-queue.
pub struct CronScheduler {
    store: Arc<dyn Store>,
    scheduler: Arc<dyn Scheduler>,
    registry: FunctionRegistry,
}

impl CronScheduler {
    pub fn new(store: Arc<dyn Store>, scheduler: Arc<dyn Scheduler>, registry: FunctionRegistry) -> Arc<Self> {
        let cron = Arc::new(Self {
            store,
            scheduler,
            registry,
        });
        register_rescheduler_handle(&cron);
        register_dispatch_handle(&cron);
        cron
    }

    pub async fn register(
        self: &Arc<Self>,
        fn_handle: impl Into<String>,
        fn_args: serde_json::Value,
        schedule: Schedule,
    ) -> Result<CronId, CronError> {
        sched::validate(&schedule)?;
        let now = Utc::now();
        let fire_at = sched::next_fire(&schedule, now)?;
        let job = CronJob {
            id: CronId::new(),
            fn_handle: fn_handle.into(),
            fn_args,
            schedule,
            scheduled_time: fire_at,
            generation: 0,
            rescheduler_id: SchedulerId::new(), // patched once scheduled below
            dispatch: None,
        };
        let id = job.id;
        self.persist(&job)?;
        self.schedule_rescheduler(id, fire_at, 0).await?;
        Ok(id)
    }

    pub async fn delete(self: &Arc<Self>, id: CronId) -> Result<(), CronError> {
        let job = self.load(id)?;
        let _ = self.scheduler.cancel(job.rescheduler_id).await;
        if let Some(dispatch_id) = job.dispatch {
            let _ = self.scheduler.cancel(dispatch_id).await;
        }
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::delete_job(tx, id);
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    pub async fn get(&self, id: CronId) -> Result<CronJob, CronError> {
        self.load(id)
    }

    pub async fn list(&self) -> Result<Vec<CronJob>, CronError> {
        Ok(dex_host::transact_typed::<Vec<CronJob>>(self.store.as_ref(), |tx| {
            serde_json::to_value(db::all_jobs(tx)?).map_err(|e| HostError::Serialization(e.to_string()))
        })?)
    }

    fn load(&self, id: CronId) -> Result<CronJob, CronError> {
        let job: Option<CronJob> = dex_host::transact_typed(self.store.as_ref(), move |tx| {
            serde_json::to_value(db::get_job(tx, id)?).map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        job.ok_or(CronError::NotFound(id.0))
    }

    fn persist(&self, job: &CronJob) -> Result<(), CronError> {
        let job = job.clone();
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::put_job(tx, &job)?;
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    async fn schedule_rescheduler(
        self: &Arc<Self>,
        id: CronId,
        fire_at: chrono::DateTime<Utc>,
        generation: u64,
    ) -> Result<(), CronError> {
        let sched_id = self
            .scheduler
            .schedule_at(
                to_segment(fire_at),
                RESCHEDULER_HANDLE.to_string(),
                serde_json::json!({"cron_id": id.0, "generation": generation}),
            )
            .await?;
        let mut job = self.load(id)?;
        job.rescheduler_id = sched_id;
        self.persist(&job)?;
        Ok(())
    }

    /// Fired by the host scheduler for every rescheduler entry. Verifies
    /// it's still the current generation (an older entry left over from a
    /// race loses silently), dispatches the user function unless the
    /// previous dispatch is still in flight, then schedules its own
    /// successor.
    async fn run_rescheduler(self: &Arc<Self>, id: CronId, generation: u64) -> Result<(), CronError> {
        let mut job = self.load(id)?;
        if job.generation != generation {
            debug!(%id, generation, current = job.generation, "superseded rescheduler entry fired, ignoring");
            return Ok(());
        }

        if job.dispatch.is_none() {
            let dispatch_id = self
                .scheduler
                .schedule_at(
                    current_segment(),
                    DISPATCH_HANDLE.to_string(),
                    serde_json::json!({
                        "cron_id": id.0,
                        "fn_handle": job.fn_handle,
                        "fn_args": job.fn_args,
                    }),
                )
                .await?;
            job.dispatch = Some(dispatch_id);
        } else {
            warn!(%id, "previous cron dispatch still in flight, skipping this fire");
        }

        let next_fire = sched::next_fire(&job.schedule, job.scheduled_time)?;
        job.scheduled_time = next_fire;
        job.generation += 1;
        let next_generation = job.generation;
        self.persist(&job)?;
        self.schedule_rescheduler(id, next_fire, next_generation).await
    }

    fn clear_dispatch(&self, id: CronId) -> Result<(), CronError> {
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            if let Some(mut job) = db::get_job(tx, id)? {
                job.dispatch = None;
                db::put_job(tx, &job)?;
            }
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }
}

fn register_rescheduler_handle(cron: &Arc<CronScheduler>) {
    let weak: Weak<CronScheduler> = Arc::downgrade(cron);
    cron.registry.register(RESCHEDULER_HANDLE, move |args| {
        let weak = weak.clone();
        async move {
            let Some(cron) = weak.upgrade() else {
                return Ok(serde_json::Value::Null);
            };
            let id: Uuid = serde_json::from_value(args["cron_id"].clone()).map_err(|e| e.to_string())?;
            let generation: u64 = serde_json::from_value(args["generation"].clone()).map_err(|e| e.to_string())?;
            cron.run_rescheduler(CronId(id), generation).await.map_err(|e| e.to_string())?;
            Ok(serde_json::Value::Null)
        }
    });
}

fn register_dispatch_handle(cron: &Arc<CronScheduler>) {
    let weak: Weak<CronScheduler> = Arc::downgrade(cron);
    cron.registry.register(DISPATCH_HANDLE, move |args| {
        let weak = weak.clone();
        async move {
            let Some(cron) = weak.upgrade() else {
                return Ok(serde_json::Value::Null);
            };
            let id: Uuid = serde_json::from_value(args["cron_id"].clone()).map_err(|e| e.to_string())?;
            let fn_handle = args["fn_handle"].as_str().unwrap_or_default().to_string();
            let fn_args = args["fn_args"].clone();

            match cron.registry.dispatch(&fn_handle, fn_args).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => warn!(%err, %fn_handle, "cron job function returned an error"),
                Err(err) => warn!(%err, %fn_handle, "cron job function handle missing"),
            }

            cron.clear_dispatch(CronId(id)).map_err(|e| e.to_string())?;
            Ok(serde_json::Value::Null)
        }
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use dex_host::memory::{InMemoryScheduler, InMemoryStore};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;

    fn build() -> Arc<CronScheduler> {
        let registry = FunctionRegistry::new();
        let store: Arc<dyn Store> = Arc::new(InMemoryStore::new());
        let scheduler = InMemoryScheduler::new(registry.clone());
        scheduler.spawn();
        CronScheduler::new(store, Arc::new(scheduler), registry)
    }

    #[test_log::test(tokio::test)]
    async fn interval_job_fires_repeatedly_and_reschedules_itself() {
        let cron = build();
        let hits = Arc::new(AtomicU32::new(0));
        let counter = hits.clone();
        cron.registry.register("tick", move |_args: serde_json::Value| {
            let counter = counter.clone();
            async move {
                counter.fetch_add(1, Ordering::SeqCst);
                Ok(serde_json::Value::Null)
            }
        });

        cron.register("tick", serde_json::json!({}), Schedule::Interval { ms: 1000 })
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(dex_types::SEGMENT_MS as u64 * 20)).await;
        assert!(hits.load(Ordering::SeqCst) >= 1, "interval job never fired");
    }

    #[test_log::test(tokio::test)]
    async fn rejects_sub_second_intervals() {
        let cron = build();
        let err = cron
            .register("tick", serde_json::json!({}), Schedule::Interval { ms: 10 })
            .await
            .unwrap_err();
        assert!(matches!(err, CronError::IntervalTooShort { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn delete_cancels_the_pending_rescheduler_entry() {
        let cron = build();
        cron.registry.register("tick", |_args: serde_json::Value| async move { Ok(serde_json::Value::Null) });

        let id = cron
            .register("tick", serde_json::json!({}), Schedule::Interval { ms: 60_000 })
            .await
            .unwrap();
        let job = cron.get(id).await.unwrap();

        cron.delete(id).await.unwrap();

        assert!(cron.get(id).await.is_err());
        let status = cron.scheduler.status(job.rescheduler_id).await.unwrap();
        similar_asserts::assert_eq!(status, Some(dex_host::SchedulerStatus::Canceled));
    }
}
