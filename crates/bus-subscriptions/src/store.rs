use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};

use crate::error::Result;

/// Subscription tracking store (C8): persist `(topic, subscriberEndpoint,
/// expiresAt)` associations and enumerate live subscribers. Shared by
/// `subscribe`/`unsubscribe` callers and readers — a successful write must
/// be visible to a subsequent read.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Upsert on `(topic, subscriber)`; refreshes expiry on an existing row.
    async fn subscribe(&self, topic: &str, subscriber: &str, ttl: Option<Duration>) -> Result<()>;

    async fn unsubscribe(&self, topic: &str, subscriber: &str) -> Result<()>;

    /// Live subscribers of `topic` as of `now`; expired rows are excluded.
    async fn get_subscribers(&self, topic: &str, now: DateTime<Utc>) -> Result<Vec<String>>;
}
