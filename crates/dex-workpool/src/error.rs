#[derive(Debug, thiserror::Error)]
pub enum WorkpoolError {
    #[error("host error: {0}")]
    Host(#[from] dex_host::HostError),

    #[error("work item {0} not found")]
    NotFound(dex_types::WorkId),

    #[error("invalid pool configuration: {0}")]
    InvalidConfig(#[from] dex_types::GlobalsError),

    #[error("stale main-loop invocation: expected generation {expected}, found {actual}")]
    StaleGeneration { expected: u64, actual: u64 },
}
