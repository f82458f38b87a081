#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("host error: {0}")]
    Host(#[from] dex_host::HostError),

    #[error("workpool error: {0}")]
    Workpool(#[from] dex_workpool::WorkpoolError),

    #[error("journal error: {0}")]
    Journal(#[from] dex_journal::JournalError),

    #[error("journal too large: {0}")]
    JournalTooLarge(#[from] dex_journal::JournalSizeError),

    #[error("workflow {0} not found")]
    NotFound(uuid::Uuid),

    #[error("determinism violation replaying step {sequence}: {detail}")]
    DeterminismViolation { sequence: u64, detail: String },

    #[error("stale generation: expected {expected}, found {actual}")]
    StaleGeneration { expected: u64, actual: u64 },

    #[error("event error: {0}")]
    Event(String),

    #[error("workflow handler panicked: {0}")]
    HandlerPanicked(String),
}
