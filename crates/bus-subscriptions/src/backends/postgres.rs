//! Remote SQL subscription directory.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tracing::info;

use crate::error::Result;
use crate::store::SubscriptionStore;

pub struct PostgresSubscriptionStore {
    pool: PgPool,
}

impl PostgresSubscriptionStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Self::create_schema(&pool).await?;
        Ok(PostgresSubscriptionStore { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        PostgresSubscriptionStore { pool }
    }

    async fn create_schema(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pb_subscriptions (
                topic_name TEXT NOT NULL,
                subscriber TEXT NOT NULL,
                expires_at TIMESTAMPTZ,
                PRIMARY KEY (topic_name, subscriber)
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_subscriptions_topic_name ON pb_subscriptions (topic_name)")
            .execute(pool)
            .await?;

        info!("postgres subscriptions schema initialized");
        Ok(())
    }
}

#[async_trait]
impl SubscriptionStore for PostgresSubscriptionStore {
    async fn subscribe(&self, topic: &str, subscriber: &str, ttl: Option<Duration>) -> Result<()> {
        let expires_at = ttl.map(|d| Utc::now() + d);
        sqlx::query(
            r#"
            INSERT INTO pb_subscriptions (topic_name, subscriber, expires_at)
            VALUES ($1, $2, $3)
            ON CONFLICT (topic_name, subscriber) DO UPDATE SET expires_at = excluded.expires_at
            "#,
        )
        .bind(topic)
        .bind(subscriber)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str, subscriber: &str) -> Result<()> {
        sqlx::query("DELETE FROM pb_subscriptions WHERE topic_name = $1 AND subscriber = $2")
            .bind(topic)
            .bind(subscriber)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_subscribers(&self, topic: &str, now: DateTime<Utc>) -> Result<Vec<String>> {
        let rows = sqlx::query(
            "SELECT subscriber, expires_at FROM pb_subscriptions WHERE topic_name = $1",
        )
        .bind(topic)
        .fetch_all(&self.pool)
        .await?;

        let mut subscribers = Vec::new();
        for row in rows {
            let subscriber: String = row.try_get("subscriber")?;
            let expires_at: Option<DateTime<Utc>> = row.try_get("expires_at")?;
            let expired = expires_at.is_some_and(|exp| exp < now);
            if !expired {
                subscribers.push(subscriber);
            }
        }
        Ok(subscribers)
    }
}
