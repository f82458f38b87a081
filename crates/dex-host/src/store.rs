use crate::error::HostError;
use serde::de::DeserializeOwned;
use serde::Serialize;

/// A snapshot-isolated view into the store, live only for the duration of
/// one `Store::transact` call. Every table is a flat `key -> JSON value`
/// map; callers layer typed accessors on top (see `dex_workpool::db` for an
/// example) rather than this crate knowing about `WorkItem`, `Workflow`,
/// or any other domain type.
pub trait Transaction {
    fn get_raw(&self, table: &str, key: &str) -> Option<serde_json::Value>;
    fn put_raw(&mut self, table: &str, key: &str, value: serde_json::Value);
    fn delete_raw(&mut self, table: &str, key: &str);
    /// All `(key, value)` pairs in a table, in insertion order. Tables in
    /// this reference implementation are small enough that callers filter
    /// and sort in-process rather than pushing predicates down.
    fn scan_raw(&self, table: &str) -> Vec<(String, serde_json::Value)>;
}

/// Typed convenience wrappers over [`Transaction`]. Kept as an extension
/// trait (not inherent methods) so `Transaction` itself stays object-safe.
pub trait TransactionExt: Transaction {
    fn get<T: DeserializeOwned>(&self, table: &str, key: &str) -> Result<Option<T>, HostError> {
        match self.get_raw(table, key) {
            Some(v) => serde_json::from_value(v)
                .map(Some)
                .map_err(|e| HostError::Serialization(e.to_string())),
            None => Ok(None),
        }
    }

    fn put<T: Serialize>(&mut self, table: &str, key: &str, value: &T) -> Result<(), HostError> {
        let v = serde_json::to_value(value).map_err(|e| HostError::Serialization(e.to_string()))?;
        self.put_raw(table, key, v);
        Ok(())
    }

    fn delete(&mut self, table: &str, key: &str) {
        self.delete_raw(table, key);
    }

    fn scan<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<(String, T)>, HostError> {
        self.scan_raw(table)
            .into_iter()
            .map(|(k, v)| {
                serde_json::from_value(v)
                    .map(|parsed| (k, parsed))
                    .map_err(|e| HostError::Serialization(e.to_string()))
            })
            .collect()
    }
}

impl<T: Transaction + ?Sized> TransactionExt for T {}

/// The transactional substrate every Workpool/Workflow/retrier/cron
/// mutation runs against. Models the "serializable mutation" primitive the
/// rest of this crate treats as given: a caller-supplied closure sees a
/// consistent snapshot and its writes land atomically, or not at all.
///
/// The closure's return value is carried out as a JSON `Value` rather than
/// a generic `T` so this trait stays object-safe — callers hold an
/// `Arc<dyn Store>` and deserialize the typed result themselves (see
/// [`TransactionExt`] for the matching typed helpers on the `Transaction`
/// side).
///
/// `dex-host` ships one implementation, [`crate::memory::InMemoryStore`],
/// suitable for a single process. A production deployment swaps this trait
/// for an embedded KV or a mutex+WAL-backed store without touching any
/// downstream crate.
pub trait Store: Send + Sync {
    fn transact(
        &self,
        f: Box<dyn FnOnce(&mut dyn Transaction) -> Result<serde_json::Value, HostError> + Send + '_>,
    ) -> Result<serde_json::Value, HostError>;
}

/// Run a transaction and deserialize its result into `T`. The ergonomic
/// entry point most callers use instead of `Store::transact` directly.
pub fn transact_typed<T: DeserializeOwned>(
    store: &dyn Store,
    f: impl FnOnce(&mut dyn Transaction) -> Result<serde_json::Value, HostError> + Send + '_,
) -> Result<T, HostError> {
    let value = store.transact(Box::new(f))?;
    serde_json::from_value(value).map_err(|e| HostError::Serialization(e.to_string()))
}
