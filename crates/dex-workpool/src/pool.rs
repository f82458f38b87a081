use crate::db;
use crate::error::WorkpoolError;
use crate::mainloop::{self, KickOutcome};
use crate::types::{CancelFilter, PendingCancellation, PendingId, PendingStart, WorkStatus};
use dex_host::{FunctionRegistry, HostError, Scheduler, Store};
use dex_types::{
    current_segment, to_segment, FnType, Globals, OnComplete, RetryOption, WorkId, WorkItem,
};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};

/// One durable, bounded-parallelism job queue. Each instance owns its own
/// `pool_id` namespace within the shared [`Store`] and a handle into the
/// shared [`FunctionRegistry`]/[`Scheduler`] used to drive its main loop.
pub struct Workpool {
    pub(crate) pool_id: String,
    pub(crate) store: Arc<dyn Store>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) registry: FunctionRegistry,
}

impl Workpool {
    /// Create a pool and register its internal dispatch handles with
    /// `registry`. `pool_id` must be unique per logical pool sharing a
    /// `store`.
    pub fn new(
        pool_id: impl Into<String>,
        store: Arc<dyn Store>,
        scheduler: Arc<dyn Scheduler>,
        registry: FunctionRegistry,
    ) -> Arc<Self> {
        let pool = Arc::new(Self {
            pool_id: pool_id.into(),
            store,
            scheduler,
            registry,
        });
        mainloop::register_tick_handle(&pool);
        register_cancel_page_handle(&pool);
        pool
    }

    fn tick_handle_name(&self) -> String {
        format!("dex_workpool:{}:main_tick", self.pool_id)
    }

    fn cancel_page_handle_name(&self) -> String {
        format!("dex_workpool:{}:cancel_page", self.pool_id)
    }

    /// Enqueue one work item, validating pool-wide config if provided.
    #[instrument(skip(self, fn_args, config), fields(pool_id = %self.pool_id))]
    pub async fn enqueue(
        self: &Arc<Self>,
        fn_handle: String,
        fn_name: String,
        fn_args: serde_json::Value,
        fn_type: FnType,
        run_at: chrono::DateTime<chrono::Utc>,
        retry: RetryOption,
        on_complete: Option<OnComplete>,
        config: Option<Globals>,
    ) -> Result<WorkId, WorkpoolError> {
        if let Some(cfg) = &config {
            cfg.validate()?;
            if cfg.exceeds_soft_cap() {
                warn!(max_parallelism = cfg.max_parallelism, "pool configured above soft cap");
            }
        }

        let item = WorkItem {
            id: WorkId::new(),
            fn_handle,
            fn_name,
            fn_args,
            fn_type,
            run_at: dex_types::clamp_run_at(run_at),
            attempts: 0,
            retry,
            on_complete,
            created_at: chrono::Utc::now(),
        };

        let kick_segment = self.kick("enqueue", config).await?;
        let start_segment = std::cmp::max(to_segment(item.run_at), kick_segment);

        let pool_id = self.pool_id.clone();
        let item_clone = item.clone();
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::put_work_item(tx, &pool_id, &item_clone)?;
            db::insert_pending_start(
                tx,
                &pool_id,
                &PendingStart {
                    id: PendingId::new(),
                    work_id: item_clone.id,
                    segment: start_segment,
                },
            )?;
            Ok(serde_json::Value::Null)
        })
        .map_err(WorkpoolError::from)?;

        info!(work_id = %item.id, "enqueued work item");
        Ok(item.id)
    }

    pub async fn enqueue_batch(
        self: &Arc<Self>,
        items: Vec<(
            String,
            String,
            serde_json::Value,
            FnType,
            chrono::DateTime<chrono::Utc>,
            RetryOption,
            Option<OnComplete>,
        )>,
        config: Option<Globals>,
    ) -> Result<Vec<WorkId>, WorkpoolError> {
        let mut ids = Vec::with_capacity(items.len());
        for (fn_handle, fn_name, fn_args, fn_type, run_at, retry, on_complete) in items {
            ids.push(
                self.enqueue(
                    fn_handle,
                    fn_name,
                    fn_args,
                    fn_type,
                    run_at,
                    retry,
                    on_complete,
                    config.clone(),
                )
                .await?,
            );
        }
        Ok(ids)
    }

    /// Ensure a main-loop tick is scheduled soon; returns the segment the
    /// loop will next observe. Applies the pool config update, if any,
    /// within the same decision transaction.
    pub(crate) async fn kick(
        self: &Arc<Self>,
        source: &'static str,
        config: Option<Globals>,
    ) -> Result<dex_types::Segment, WorkpoolError> {
        let pool_id = self.pool_id.clone();
        let outcome = dex_host::transact_typed::<KickOutcome>(self.store.as_ref(), move |tx| {
            if let Some(cfg) = &config {
                db::put_globals(tx, &pool_id, cfg)?;
            }
            let outcome = mainloop::decide_kick(tx, &pool_id, source)?;
            db::put_run_status(tx, &pool_id, &outcome.new_status)?;
            serde_json::to_value(&outcome).map_err(|e| HostError::Serialization(e.to_string()))
        })?;

        if let Some(stale_id) = outcome.cancel_scheduler_id {
            let _ = self.scheduler.cancel(stale_id).await;
        }

        if let Some(dispatch_segment) = outcome.needs_scheduler_dispatch {
            let sched_id = self
                .scheduler
                .schedule_at(
                    dispatch_segment,
                    self.tick_handle_name(),
                    serde_json::json!({"generation": outcome.generation}),
                )
                .await
                .map_err(WorkpoolError::from)?;
            let pool_id = self.pool_id.clone();
            dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
                let mut status = db::run_status(tx, &pool_id)?;
                if let crate::types::RunState::Scheduled { scheduled_id, .. } = &mut status.state {
                    *scheduled_id = sched_id;
                }
                db::put_run_status(tx, &pool_id, &status)?;
                Ok(serde_json::Value::Null)
            })?;
        }

        Ok(outcome.observed_segment)
    }

    pub async fn cancel(self: &Arc<Self>, id: WorkId) -> Result<(), WorkpoolError> {
        let segment = self.kick("cancel", None).await?;
        let pool_id = self.pool_id.clone();
        dex_host::transact_typed::<()>(self.store.as_ref(), move |tx| {
            db::insert_pending_cancellation(
                tx,
                &pool_id,
                &PendingCancellation {
                    id: PendingId::new(),
                    work_id: id,
                    segment,
                },
            )?;
            Ok(serde_json::Value::Null)
        })?;
        Ok(())
    }

    /// Page through work items created before `before` (default: now),
    /// canceling up to `limit` (default 256) per call and rescheduling
    /// itself if the page was full.
    pub async fn cancel_all(
        self: &Arc<Self>,
        before: Option<chrono::DateTime<chrono::Utc>>,
        limit: Option<usize>,
    ) -> Result<(), WorkpoolError> {
        let cutoff = before.unwrap_or_else(chrono::Utc::now);
        self.cancel_matching(CancelFilter::CreatedBefore(cutoff), limit).await
    }

    /// Like [`Workpool::cancel_all`], but keyed on an arbitrary
    /// [`CancelFilter`] instead of a creation-time cutoff. Used by callers
    /// that tag work through `on_complete.context` (e.g. a workflow engine
    /// canceling every step it dispatched for one workflow) and need to
    /// cancel exactly that subset.
    ///
    /// Cancels the first page inline, then — if the page was full —
    /// reschedules its own continuation through the host scheduler rather
    /// than recursing in-process, the same self-rescheduling shape as the
    /// main loop tick.
    pub async fn cancel_matching(self: &Arc<Self>, filter: CancelFilter, limit: Option<usize>) -> Result<(), WorkpoolError> {
        self.cancel_page(filter, limit).await
    }

    async fn cancel_page(self: &Arc<Self>, filter: CancelFilter, limit: Option<usize>) -> Result<(), WorkpoolError> {
        let page_size = limit.unwrap_or(256);
        let pool_id = self.pool_id.clone();
        let scan_filter = filter.clone();
        let ids: Vec<WorkId> = dex_host::transact_typed(self.store.as_ref(), move |tx| {
            let mut items: Vec<(String, WorkItem)> = tx.scan(&format!("workpool:{pool_id}:work_items"))?;
            let mut filtered = Vec::with_capacity(items.len());
            for entry in items.drain(..) {
                if scan_filter.matches(&entry.1) && !db::has_pending_cancellation(tx, &pool_id, entry.1.id)? {
                    filtered.push(entry);
                }
            }
            let mut items = filtered;
            items.sort_by(|a, b| b.1.created_at.cmp(&a.1.created_at));
            items.truncate(page_size);
            serde_json::to_value(items.into_iter().map(|(_, i)| i.id).collect::<Vec<_>>())
                .map_err(|e| HostError::Serialization(e.to_string()))
        })?;

        let full_page = ids.len() == page_size;
        for id in &ids {
            self.cancel(*id).await?;
        }
        if full_page {
            self.scheduler
                .schedule_at(
                    current_segment(),
                    self.cancel_page_handle_name(),
                    serde_json::json!({"filter": filter, "limit": limit}),
                )
                .await
                .map_err(WorkpoolError::from)?;
        }
        Ok(())
    }

    #[instrument(skip(self), fields(pool_id = %self.pool_id))]
    pub async fn status(self: &Arc<Self>, id: WorkId) -> Result<WorkStatus, WorkpoolError> {
        let pool_id = self.pool_id.clone();
        let status = dex_host::transact_typed::<WorkStatus>(self.store.as_ref(), move |tx| {
            let item = db::get_work_item(tx, &pool_id, id)?;
            let item = match item {
                None => return Ok(serde_json::to_value(WorkStatus::Finished).unwrap()),
                Some(i) => i,
            };
            let state = if db::has_any_pending(tx, &pool_id, id)? {
                WorkStatus::Pending {
                    previous_attempts: item.attempts,
                }
            } else {
                WorkStatus::Running {
                    previous_attempts: item.attempts,
                }
            };
            serde_json::to_value(state).map_err(|e| HostError::Serialization(e.to_string()))
        })?;
        Ok(status)
    }

    pub async fn status_batch(
        self: &Arc<Self>,
        ids: Vec<WorkId>,
    ) -> Result<Vec<WorkStatus>, WorkpoolError> {
        let mut out = Vec::with_capacity(ids.len());
        for id in ids {
            out.push(self.status(id).await?);
        }
        Ok(out)
    }

    /// Entry point invoked by the scheduler/registry when a tick fires.
    /// `generation` is the `InternalState::generation` the scheduling call
    /// observed; a tick whose generation no longer matches the pool's
    /// current state is stale and aborts without touching anything.
    pub async fn run_tick(self: &Arc<Self>, generation: u64) -> Result<(), WorkpoolError> {
        mainloop::run_tick(self, current_segment(), generation).await
    }
}

/// Registers the handle a scheduled `cancel_matching` continuation page
/// dispatches through, mirroring `mainloop::register_tick_handle`'s
/// `Weak`-based self-registration.
fn register_cancel_page_handle(pool: &Arc<Workpool>) {
    let weak = Arc::downgrade(pool);
    let name = pool.cancel_page_handle_name();
    pool.registry.register(name, move |args| {
        let weak = weak.clone();
        async move {
            if let Some(pool) = weak.upgrade() {
                let filter: CancelFilter = serde_json::from_value(
                    args.get("filter").cloned().unwrap_or(serde_json::Value::Null),
                )
                .map_err(|e| e.to_string())?;
                let limit = args.get("limit").and_then(|v| v.as_u64()).map(|n| n as usize);
                pool.cancel_page(filter, limit).await.map_err(|e| e.to_string())?;
            }
            Ok(serde_json::Value::Null)
        }
    });
}
