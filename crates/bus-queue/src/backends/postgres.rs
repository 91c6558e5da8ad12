//! Remote SQL queue store over `sqlx::Postgres`.

use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{Headers, IdentitySerializer, Message, MessageId, Principal};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::model::{MessageState, QueuedMessage};
use crate::store::QueueStore;

/// `PB_QueuedMessages` realized over `sqlx::Postgres`, DDL emitted
/// idempotently on first use (dialect adapted from the SQLite backend's
/// `AUTOINCREMENT` to Postgres's `BIGSERIAL`).
pub struct PostgresQueueStore {
    pool: PgPool,
    queue_name: String,
    identity: Arc<dyn IdentitySerializer>,
}

impl PostgresQueueStore {
    pub async fn connect(database_url: &str, queue_name: impl Into<String>, identity: Arc<dyn IdentitySerializer>) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Self::create_schema(&pool).await?;
        Ok(PostgresQueueStore { pool, queue_name: queue_name.into(), identity })
    }

    pub fn with_pool(pool: PgPool, queue_name: impl Into<String>, identity: Arc<dyn IdentitySerializer>) -> Self {
        PostgresQueueStore { pool, queue_name: queue_name.into(), identity }
    }

    async fn create_schema(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pb_queued_messages (
                id BIGSERIAL PRIMARY KEY,
                message_id TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                message_name TEXT,
                origination TEXT,
                destination TEXT,
                reply_to TEXT,
                expires TIMESTAMPTZ,
                content_type TEXT,
                sender_principal TEXT,
                headers TEXT NOT NULL,
                message_content BYTEA NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                acknowledged TIMESTAMPTZ,
                abandoned TIMESTAMPTZ
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_queued_messages_queue_name ON pb_queued_messages (queue_name)")
            .execute(pool)
            .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_pb_queued_messages_message_id ON pb_queued_messages (message_id)")
            .execute(pool)
            .await?;

        info!("postgres queue schema initialized");
        Ok(())
    }

    async fn row_to_record(&self, row: &sqlx::postgres::PgRow) -> Result<QueuedMessage> {
        let id: i64 = row.try_get("id")?;
        let message_id: String = row.try_get("message_id")?;
        let headers_json: String = row.try_get("headers")?;
        let content: Vec<u8> = row.try_get("message_content")?;
        let attempts: i32 = row.try_get("attempts")?;
        let acknowledged: Option<DateTime<Utc>> = row.try_get("acknowledged")?;
        let abandoned: Option<DateTime<Utc>> = row.try_get("abandoned")?;
        let sender_principal: Option<String> = row.try_get("sender_principal")?;

        let headers: Headers = serde_json::from_str(&headers_json)?;
        let uuid = Uuid::parse_str(&message_id).map_err(|e| QueueError::NotFound(e.to_string()))?;
        let message = Message { id: MessageId(uuid), headers, content };

        let principal = self.restore_principal(sender_principal).await?;

        let state = if acknowledged.is_some() {
            MessageState::Acknowledged
        } else if abandoned.is_some() {
            MessageState::Abandoned
        } else {
            MessageState::Pending
        };

        Ok(QueuedMessage {
            record_id: Some(id.to_string()),
            queue_name: self.queue_name.clone(),
            message,
            principal,
            state,
            attempts: attempts as u32,
            acknowledged_at: acknowledged,
            abandoned_at: abandoned,
        })
    }

    async fn tokenize_principal(&self, principal: &Option<Principal>, headers: &mut Headers) -> Result<Option<String>> {
        let Some(principal) = principal else { return Ok(None) };
        let token = self.identity.serialize(principal).await?;
        headers.set_security_token(token.clone());
        Ok(Some(token))
    }

    async fn restore_principal(&self, token: Option<String>) -> Result<Option<Principal>> {
        match token {
            Some(token) => Ok(Some(self.identity.deserialize(&token).await?)),
            None => Ok(None),
        }
    }
}

#[async_trait]
impl QueueStore for PostgresQueueStore {
    async fn select_pending(&self, _cancel: &CancellationToken) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM pb_queued_messages WHERE queue_name = $1 AND acknowledged IS NULL AND abandoned IS NULL",
        )
        .bind(&self.queue_name)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.row_to_record(row).await?);
        }
        Ok(records)
    }

    async fn select_dead(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM pb_queued_messages WHERE queue_name = $1 AND abandoned IS NOT NULL AND abandoned BETWEEN $2 AND $3",
        )
        .bind(&self.queue_name)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;

        let mut records = Vec::with_capacity(rows.len());
        for row in &rows {
            records.push(self.row_to_record(row).await?);
        }
        Ok(records)
    }

    async fn insert(
        &self,
        message: Message,
        principal: Option<Principal>,
        _cancel: &CancellationToken,
    ) -> Result<QueuedMessage> {
        let mut message = message;
        let sender_principal = self.tokenize_principal(&principal, &mut message.headers).await?;
        let headers_json = serde_json::to_string(&message.headers)?;

        let row = sqlx::query(
            r#"
            INSERT INTO pb_queued_messages
                (message_id, queue_name, message_name, origination, destination, reply_to,
                 expires, content_type, sender_principal, headers, message_content, attempts)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, 0)
            RETURNING id
            "#,
        )
        .bind(message.id.to_string())
        .bind(&self.queue_name)
        .bind(message.message_name())
        .bind(message.origination())
        .bind(message.destination())
        .bind(message.reply_to())
        .bind(message.expires())
        .bind(message.content_type())
        .bind(&sender_principal)
        .bind(&headers_json)
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;

        Ok(QueuedMessage {
            record_id: Some(id.to_string()),
            queue_name: self.queue_name.clone(),
            message,
            principal,
            state: MessageState::Pending,
            attempts: 0,
            acknowledged_at: None,
            abandoned_at: None,
        })
    }

    async fn update(&self, record: &QueuedMessage, _cancel: &CancellationToken) -> Result<()> {
        let id = record
            .record_id
            .as_ref()
            .ok_or_else(|| QueueError::NotFound("record has no backend id".to_string()))?;
        let id: i64 = id.parse().map_err(|_| QueueError::NotFound(id.clone()))?;

        sqlx::query("UPDATE pb_queued_messages SET attempts = $1, acknowledged = $2, abandoned = $3 WHERE id = $4")
            .bind(record.attempts as i32)
            .bind(record.acknowledged_at)
            .bind(record.abandoned_at)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}
