use thiserror::Error;

/// Failures of the market-data ingestion path.
///
/// Only `Connection` and `Subscription` ever reach a caller; `Persistence`
/// is logged by the consumer loop and the tick is lost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IngestError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("subscription error: {0}")]
    Subscription(String),

    #[error("persistence error: {0}")]
    Persistence(String),

    #[error("pipeline is closed")]
    Closed,
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error("config error: {0}")]
    Config(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Auth(String),

    #[error("{0}")]
    Conflict(String),

    #[error("broker error: {0:#}")]
    Broker(anyhow::Error),

    #[error("storage error: {0:#}")]
    Storage(anyhow::Error),

    #[error(transparent)]
    Ingest(#[from] IngestError),

    #[error("internal error: {0:#}")]
    Internal(anyhow::Error),
}
