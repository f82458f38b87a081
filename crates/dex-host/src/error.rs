/// Errors surfaced by the host substrate: the transactional store and the
/// deferred-function scheduler that `dex-workpool`, `dex-workflow`,
/// `dex-retrier`, and `dex-cron` all build on.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    #[error("key {key:?} not found in table {table:?}")]
    NotFound { table: String, key: String },

    #[error("scheduler entry {0:?} not found")]
    SchedulerEntryNotFound(String),

    #[error("function handle {0:?} is not registered")]
    UnknownHandle(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("mutation aborted: {0}")]
    Aborted(String),
}
