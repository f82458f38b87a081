#[derive(Debug, thiserror::Error)]
pub enum RetrierError {
    #[error("host error: {0}")]
    Host(#[from] dex_host::HostError),

    #[error("run {0} not found")]
    NotFound(uuid::Uuid),
}
