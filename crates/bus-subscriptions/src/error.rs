use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[cfg(any(feature = "sqlite", feature = "postgres"))]
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("invalid subscription: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, SubscriptionError>;
