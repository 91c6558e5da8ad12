use thiserror::Error;

#[derive(Debug, Error)]
pub enum BusError {
    #[error("queue '{name}' already exists with different listener or options")]
    QueueAlreadyExists { name: String },

    #[error("queue '{0}' not found")]
    QueueNotFound(String),

    #[error(transparent)]
    Queue(#[from] bus_queue::QueueError),

    #[error(transparent)]
    Journal(#[from] bus_journal::JournalError),

    #[error(transparent)]
    Subscription(#[from] bus_subscriptions::SubscriptionError),

    #[error("transport error: {0}")]
    Transport(String),
}

pub type Result<T> = std::result::Result<T, BusError>;
