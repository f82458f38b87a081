//! Single-process reference implementations of [`Store`] and [`Scheduler`].
//!
//! Grounded on `everruns-durable`'s `InMemoryWorkflowEventStore`: one
//! `parking_lot::RwLock`-guarded map per concern, no async I/O on the hot
//! path. Unlike that store this one also serializes every transaction
//! behind a single mutex rather than sharding per-entity locks — the
//! embedded, single-writer-per-pool discipline the rest of this repository
//! assumes doesn't need finer-grained locking, and a coarse lock keeps the
//! "serializable mutation" contract trivially true.

use crate::error::HostError;
use crate::registry::FunctionRegistry;
use crate::scheduler::{Scheduler, SchedulerId, SchedulerStatus};
use crate::store::{Store, Transaction};
use dex_types::{to_segment, Segment};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// In-memory [`Store`]: one big table-of-tables behind a single lock.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<HashMap<String, HashMap<String, serde_json::Value>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

struct MapTransaction<'a> {
    tables: &'a mut HashMap<String, HashMap<String, serde_json::Value>>,
}

impl Transaction for MapTransaction<'_> {
    fn get_raw(&self, table: &str, key: &str) -> Option<serde_json::Value> {
        self.tables.get(table)?.get(key).cloned()
    }

    fn put_raw(&mut self, table: &str, key: &str, value: serde_json::Value) {
        self.tables
            .entry(table.to_string())
            .or_default()
            .insert(key.to_string(), value);
    }

    fn delete_raw(&mut self, table: &str, key: &str) {
        if let Some(t) = self.tables.get_mut(table) {
            t.remove(key);
        }
    }

    fn scan_raw(&self, table: &str) -> Vec<(String, serde_json::Value)> {
        self.tables
            .get(table)
            .map(|t| t.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }
}

impl Store for InMemoryStore {
    fn transact(
        &self,
        f: Box<dyn FnOnce(&mut dyn Transaction) -> Result<serde_json::Value, HostError> + Send + '_>,
    ) -> Result<serde_json::Value, HostError> {
        let mut guard = self.tables.lock();
        let mut tx = MapTransaction {
            tables: &mut guard,
        };
        f(&mut tx)
    }
}

#[derive(Clone)]
struct ScheduledEntry {
    segment: Segment,
    fn_handle: String,
    payload: serde_json::Value,
    status: SchedulerStatus,
}

/// In-memory [`Scheduler`]. A background task (spawned by [`Self::spawn`])
/// wakes once per segment quantum, dispatches every due entry through a
/// [`FunctionRegistry`], and records the outcome. Entries dispatched but
/// never observed (process exit mid-flight) are simply lost — the
/// reference implementation's explicit gap; a durable scheduler backed by
/// the same store would instead persist entries and survive restarts.
pub struct InMemoryScheduler {
    entries: Arc<Mutex<HashMap<SchedulerId, ScheduledEntry>>>,
    registry: FunctionRegistry,
}

impl InMemoryScheduler {
    pub fn new(registry: FunctionRegistry) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            registry,
        }
    }

    /// Spawn the dispatch loop. Returns a `JoinHandle` the caller can hold
    /// to keep the loop alive (or drop to let it run detached for the
    /// process lifetime).
    pub fn spawn(&self) -> tokio::task::JoinHandle<()> {
        let entries = self.entries.clone();
        let registry = self.registry.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(Duration::from_millis(
                dex_types::SEGMENT_MS as u64,
            ));
            loop {
                ticker.tick().await;
                let due: Vec<(SchedulerId, ScheduledEntry)> = {
                    let now_segment = to_segment(chrono::Utc::now());
                    let guard = entries.lock();
                    guard
                        .iter()
                        .filter(|(_, e)| {
                            e.segment <= now_segment
                                && matches!(e.status, SchedulerStatus::Pending)
                        })
                        .map(|(id, e)| (*id, e.clone()))
                        .collect()
                };
                for (id, entry) in due {
                    {
                        let mut guard = entries.lock();
                        if let Some(e) = guard.get_mut(&id) {
                            e.status = SchedulerStatus::InProgress;
                        }
                    }
                    debug!(handle = %entry.fn_handle, %id, "dispatching scheduler entry");
                    let outcome = registry.dispatch(&entry.fn_handle, entry.payload.clone()).await;
                    let mut guard = entries.lock();
                    if let Some(e) = guard.get_mut(&id) {
                        e.status = match outcome {
                            Ok(Ok(_)) => SchedulerStatus::Success,
                            Ok(Err(err)) => {
                                warn!(handle = %entry.fn_handle, %err, "scheduled handler returned error");
                                SchedulerStatus::Failed
                            }
                            Err(err) => {
                                warn!(handle = %entry.fn_handle, %err, "scheduled handler handle missing");
                                SchedulerStatus::Failed
                            }
                        };
                    }
                }
            }
        })
    }
}

#[async_trait::async_trait]
impl Scheduler for InMemoryScheduler {
    async fn schedule_at(
        &self,
        segment: Segment,
        fn_handle: String,
        payload: serde_json::Value,
    ) -> Result<SchedulerId, HostError> {
        let id = SchedulerId::new();
        self.entries.lock().insert(
            id,
            ScheduledEntry {
                segment,
                fn_handle,
                payload,
                status: SchedulerStatus::Pending,
            },
        );
        Ok(id)
    }

    async fn cancel(&self, id: SchedulerId) -> Result<bool, HostError> {
        let mut guard = self.entries.lock();
        match guard.get_mut(&id) {
            Some(e) if matches!(e.status, SchedulerStatus::Pending) => {
                e.status = SchedulerStatus::Canceled;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn status(&self, id: SchedulerId) -> Result<Option<SchedulerStatus>, HostError> {
        Ok(self.entries.lock().get(&id).map(|e| e.status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::TransactionExt;

    #[test]
    fn store_transact_is_atomic_per_call() {
        let store = InMemoryStore::new();
        let result = store.transact(Box::new(|tx| {
            tx.put("items", "a", &42)?;
            tx.put("items", "b", &43)?;
            Ok(serde_json::Value::Null)
        }));
        assert!(result.is_ok());

        let read = store.transact(Box::new(|tx| {
            let a: Option<i32> = tx.get("items", "a")?;
            Ok(serde_json::to_value(a).unwrap())
        }));
        assert_eq!(read.unwrap(), serde_json::json!(42));
    }

    #[test]
    fn delete_removes_key_from_subsequent_reads() {
        let store = InMemoryStore::new();
        store
            .transact(Box::new(|tx| {
                tx.put("items", "a", &1)?;
                Ok(serde_json::Value::Null)
            }))
            .unwrap();
        store
            .transact(Box::new(|tx| {
                tx.delete("items", "a");
                Ok(serde_json::Value::Null)
            }))
            .unwrap();
        let read = store
            .transact(Box::new(|tx| {
                let v: Option<i32> = tx.get("items", "a")?;
                Ok(serde_json::to_value(v).unwrap())
            }))
            .unwrap();
        assert_eq!(read, serde_json::Value::Null);
    }

    #[test_log::test(tokio::test)]
    async fn scheduler_dispatches_due_entries() {
        let registry = FunctionRegistry::new();
        registry.register("noop", |_v| async move { Ok(serde_json::json!("done")) });
        let scheduler = InMemoryScheduler::new(registry);
        let _handle = scheduler.spawn();

        let id = scheduler
            .schedule_at(dex_types::current_segment(), "noop".to_string(), serde_json::json!({}))
            .await
            .unwrap();

        tokio::time::sleep(Duration::from_millis(dex_types::SEGMENT_MS as u64 * 2)).await;
        let status = scheduler.status(id).await.unwrap();
        assert_eq!(status, Some(SchedulerStatus::Success));
    }

    #[test_log::test(tokio::test)]
    async fn canceling_a_pending_entry_prevents_dispatch() {
        let registry = FunctionRegistry::new();
        let scheduler = InMemoryScheduler::new(registry);
        let id = scheduler
            .schedule_at(
                dex_types::next_segment().succ(),
                "whatever".to_string(),
                serde_json::json!({}),
            )
            .await
            .unwrap();
        assert!(scheduler.cancel(id).await.unwrap());
        assert_eq!(
            scheduler.status(id).await.unwrap(),
            Some(SchedulerStatus::Canceled)
        );
    }
}
