use thiserror::Error;

/// Errors shared by the envelope and identity layer. Crate-specific errors
/// (`bus_queue::QueueError`, `bus_journal::JournalError`, ...) wrap this one
/// where a queue/journal/subscription operation touches identity or
/// serialization.
#[derive(Debug, Error)]
pub enum BusCommonError {
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("identity error: {0}")]
    Identity(String),
}
