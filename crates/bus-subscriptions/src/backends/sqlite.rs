//! Embedded SQL subscription directory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tracing::info;

use crate::error::Result;
use crate::store::SubscriptionStore;

pub struct SqliteSubscriptionStore {
    pool: SqlitePool,
}

impl SqliteSubscriptionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::create_schema(&pool).await?;
        Ok(SqliteSubscriptionStore { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        SqliteSubscriptionStore { pool }
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pb_subscriptions (
                topic_name TEXT NOT NULL,
                subscriber TEXT NOT NULL,
                expires_at TEXT,
                PRIMARY KEY (topic_name, subscriber)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_subscriptions_topic_name ON pb_subscriptions (topic_name)")
            .execute(pool)
            .await?;

        info!("sqlite subscriptions schema initialized");
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for SqliteSubscriptionStore {
    async fn subscribe(&self, topic: &str, subscriber: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| (Utc::now() + d).to_rfc3339());
        sqlx::query(
            r#"
            INSERT INTO pb_subscriptions (topic_name, subscriber, expires_at)
            VALUES (?, ?, ?)
            ON CONFLICT (topic_name, subscriber) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(topic)
        .bind(subscriber)
        .bind(&expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscriber: &str) -> Result<()> {
        sqlx::query("DELETE FROM pb_subscriptions WHERE topic_name = ? AND subscriber = ?")
            .bind(topic)
            .bind(subscriber)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_subscribers(&self, topic: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT subscriber, expires_at FROM pb_subscriptions WHERE topic_name = ?",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        let mut subscribers = Vec::new();
        for row in rows {
            let subscriber: String = row.try_get("subscriber")?;
            let expires_at: Option<String> = row.try_get("expires_at")?;
            let expired = expires_at
                .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
                .is_some_and(|exp| exp.with_timezone(&Utc) < now);
            if !expired {
                subscribers.push(subscriber);
            }
        }
        Ok(subscribers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteSubscriptionStore {
        SqliteSubscriptionStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn subscribe_then_get_subscribers_round_trips() {
        let store = test_store().await;
        store.subscribe("orders.created", "svc-a", None).await.unwrap();
        let subs = store.get_subscribers("orders.created", Utc::now()).await.unwrap();
        assert_eq!(subs, vec!["svc-a".to_string()]);
    }

    #[tokio::test]
    async fn resubscribe_upserts_rather_than_duplicates() {
        let store = test_store().await;
        store.subscribe("orders.created", "svc-a", Some(Duration::seconds(3600))).await.unwrap();
        store.subscribe("orders.created", "svc-a", None).await.unwrap();
        let subs = store.get_subscribers("orders.created", Utc::now()).await.unwrap();
        assert_eq!(subs.len(), 1);
    }

    #[tokio::test]
    async fn expired_subscription_excluded() {
        let store = test_store().await;
        store.subscribe("orders.created", "svc-a", Some(Duration::seconds(-5))).await.unwrap();
        let subs = store.get_subscribers("orders.created", Utc::now()).await.unwrap();
        assert!(subs.is_empty());
    }

    #[tokio::test]
    async fn unsubscribe_removes_row() {
        let store = test_store().await;
        store.subscribe("orders.created", "svc-a", None).await.unwrap();
        store.unsubscribe("orders.created", "svc-a").await.unwrap();
        assert!(store.get_subscribers("orders.created", Utc::now()).await.unwrap().is_empty());
    }
}
