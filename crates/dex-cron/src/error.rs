#[derive(Debug, thiserror::Error)]
pub enum CronError {
    #[error("host error: {0}")]
    Host(#[from] dex_host::HostError),

    #[error("cron job {0} not found")]
    NotFound(uuid::Uuid),

    #[error("interval must be at least {min}ms, got {actual}ms")]
    IntervalTooShort { min: u64, actual: u64 },

    #[error("invalid cron expression {spec:?}: {detail}")]
    InvalidCronSpec { spec: String, detail: String },

    #[error("unknown timezone {0:?}")]
    UnknownTimezone(String),
}
