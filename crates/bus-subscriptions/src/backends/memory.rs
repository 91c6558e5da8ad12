//! In-process subscription directory for `is_durable = false` deployments
//! and for tests: a `DashMap` keyed by topic, same concurrent-registry shape
//! used for the queueing service registry.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;

use crate::error::Result;
use crate::model::Subscription;
use crate::store::SubscriptionStore;

#[derive(Default)]
pub struct InMemorySubscriptionStore {
    subscriptions: DashMap<(String, String), Subscription>,
}

impl InMemorySubscriptionStore {
    pub fn new() -> Self {
        InMemorySubscriptionStore { subscriptions: DashMap::new() }
    }
}

#[async_trait]
impl SubscriptionStore for InMemorySubscriptionStore {
    async fn subscribe(&self, topic: &str, subscriber: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + d);
        self.subscriptions.insert(
            (topic.to_string(), subscriber.to_string()),
            Subscription { topic: topic.to_string(), subscriber: subscriber.to_string(), expires_at },
        );
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscriber: &str) -> Result<()> {
        self.subscriptions.remove(&(topic.to_string(), subscriber.to_string()));
        Ok(())
    }

    async fn get_subscribers(&self, topic: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        Ok(self
            .subscriptions
            .iter()
            .filter(|entry| entry.key().0 == topic && !entry.value().is_expired(now))
            .map(|entry| entry.key().1.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribe_then_get_subscribers_returns_it() {
        let store = InMemorySubscriptionStore::new();
        store.subscribe("orders.created", "svc-a", None).await.unwrap();
        let subs = store.get_subscribers("orders.created", Utc::now()).await.unwrap();
        assert_eq!(subs, vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn resubscribe_refreshes_expiry_instead_of_duplicating() {
        let store = InMemorySubscriptionStore::new();
        store.subscribe("orders.created", "svc-a", Some(Duration::seconds(-10))).await.unwrap();
        assert!(store.get_subscribers("orders.created", Utc::now()).await.unwrap().is_empty());

        store.subscribe("orders.created", "svc-a", None).await.unwrap();
        let subs = store.get_subscribers("orders.created", Utc::now()).await.unwrap();
        assert_eq!(subs, vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn expired_subscription_excluded_from_results() {
        let store = InMemorySubscriptionStore::new();
        store.subscribe("orders.created", "svc-a", Some(Duration::seconds(-1))).await.unwrap();
        let subs = store.get_subscribers("orders.created", Utc::now()).await.unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_subscriber() {
        let store = InMemorySubscriptionStore::new();
        store.subscribe("orders.created", "svc-a", None).await.unwrap();
        store.unsubscribe("orders.created", "svc-a").await.unwrap();
        assert!(store.get_subscribers("orders.created", Utc::now()).await.unwrap().is_empty());
    }
}
