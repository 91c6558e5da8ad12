use thiserror::Error;

/// Errors surfaced by a queue store or engine. Most variants are absorbed
/// internally by the engine (see `is_transient`); only disposal, unknown
/// queue, and permanent-store conditions ever reach a caller.
#[derive(Debug, Error)]
pub enum QueueError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[cfg(feature = "mongo")]
    #[error("mongo error: {0}")]
    Mongo(#[from] mongodb::error::Error),

    #[cfg(feature = "broker")]
    #[error("broker error: {0}")]
    Broker(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("identity error: {0}")]
    Identity(#[from] bus_common::BusCommonError),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("queue is already disposed")]
    Disposed,

    #[error("queue is faulted: {0}")]
    Faulted(String),
}

impl QueueError {
    /// Transient errors are retried at the engine/store boundary with
    /// bounded backoff; permanent errors flip the queue to `Faulted` and
    /// are surfaced to the enqueue caller.
    pub fn is_transient(&self) -> bool {
        match self {
            #[cfg(any(feature = "sqlite", feature = "postgres"))]
            QueueError::Database(e) => !matches!(e, sqlx::Error::Configuration(_) | sqlx::Error::ColumnNotFound(_)),
            #[cfg(feature = "mongo")]
            QueueError::Mongo(_) => true,
            #[cfg(feature = "broker")]
            QueueError::Broker(_) => true,
            QueueError::Serialization(_) => false,
            QueueError::Identity(_) => false,
            QueueError::NotFound(_) => false,
            QueueError::Disposed => false,
            QueueError::Faulted(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, QueueError>;
