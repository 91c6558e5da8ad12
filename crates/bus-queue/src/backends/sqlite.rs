//! Embedded file-backed queue store (single SQLite file per base directory).

use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{Headers, IdentitySerializer, Message, MessageId, Principal};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::model::{MessageState, QueuedMessage};
use crate::store::QueueStore;

/// `PB_QueuedMessages` realized over `sqlx::Sqlite`. One table shared by
/// every queue in the database file, scoped by the `queue_name` column.
pub struct SqliteQueueStore {
    pool: SqlitePool,
    queue_name: String,
    identity: Arc<dyn IdentitySerializer>,
}

impl SqliteQueueStore {
    /// Opens (creating if absent) the SQLite file at `database_url` and
    /// idempotently creates the schema.
    pub async fn connect(database_url: &str, queue_name: impl Into<String>, identity: Arc<dyn IdentitySerializer>) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::create_schema(&pool).await?;
        Ok(SqliteQueueStore { pool, queue_name: queue_name.into(), identity })
    }

    /// Shares an already-initialized pool (e.g. one database file backing
    /// several queues) without re-running schema creation.
    pub fn with_pool(pool: SqlitePool, queue_name: impl Into<String>, identity: Arc<dyn IdentitySerializer>) -> Self {
        SqliteQueueStore { pool, queue_name: queue_name.into(), identity }
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pb_queued_messages (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                queue_name TEXT NOT NULL,
                message_name TEXT,
                origination TEXT,
                destination TEXT,
                reply_to TEXT,
                expires TEXT,
                content_type TEXT,
                sender_principal TEXT,
                headers TEXT NOT NULL,
                message_content BLOB NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                acknowledged TEXT,
                abandoned TEXT
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

        info!("sqlite queue schema initialized");
        Ok(())
    }

    async fn row_to_record(&self, row: &sqlx::sqlite::SqliteRow) -> Result<QueuedMessage> {
        let id: i64 = row.try_get("id")?;
        let message_id: String = row.try_get("message_id")?;
        let headers_json: String = row.try_get("headers")?;
        let content: Vec<u8> = row.try_get("message_content")?;
        let attempts: i64 = row.try_get("attempts")?;
        let acknowledged: Option<String> = row.try_get("acknowledged")?;
        let abandoned: Option<String> = row.try_get("abandoned")?;
        let sender_principal: Option<String> = row.try_get("sender_principal")?;

        let headers: Headers = serde_json::from_str(&headers_json)?;
        let uuid = Uuid::parse_str(&message_id).map_err(|e| QueueError::NotFound(e.to_string()))?;
        let message = Message { id: MessageId(uuid), headers, content };

        let principal = self.restore_principal(sender_principal).await?;

        let acknowledged_at = acknowledged.and_then(|s| parse_timestamp(&s));
        let abandoned_at = abandoned.and_then(|s| parse_timestamp(&s));
        let state = if acknowledged_at.is_some() {
            MessageState::Acknowledged
        } else if abandoned_at.is_some() {
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
            acknowledged_at,
            abandoned_at,
        })
    }

    /// Serializes `principal` into the opaque token stored in
    /// `sender_principal`, and stamps the same token onto the message's
    /// `SecurityToken` header so a listener can read it off `context.headers`
    /// without a second round trip through this store.
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

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s).ok().map(|dt| dt.with_timezone(&Utc))
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn select_pending(&self, _cancel: &CancellationToken) -> Result<Vec<QueuedMessage>> {
        let rows = sqlx::query(
            "SELECT * FROM pb_queued_messages WHERE queue_name = ? AND acknowledged IS NULL AND abandoned IS NULL",
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
            "SELECT * FROM pb_queued_messages WHERE queue_name = ? AND abandoned IS NOT NULL AND abandoned BETWEEN ? AND ?",
        )
        .bind(&self.queue_name)
        .bind(from.to_rfc3339())
        .bind(to.to_rfc3339())
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

        let result = sqlx::query(
            r#"
            INSERT INTO pb_queued_messages
                (message_id, queue_name, message_name, origination, destination, reply_to,
                 expires, content_type, sender_principal, headers, message_content, attempts)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 0)
            "#,
        )
        .bind(message.id.to_string())
        .bind(&self.queue_name)
        .bind(message.message_name())
        .bind(message.origination())
        .bind(message.destination())
        .bind(message.reply_to())
        .bind(message.expires().map(|e| e.to_rfc3339()))
        .bind(message.content_type())
        .bind(&sender_principal)
        .bind(&headers_json)
        .bind(&message.content)
        .execute(&self.pool)
        .await?;

        Ok(QueuedMessage {
            record_id: Some(result.last_insert_rowid().to_string()),
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

        sqlx::query("UPDATE pb_queued_messages SET attempts = ?, acknowledged = ?, abandoned = ? WHERE id = ?")
            .bind(record.attempts as i64)
            .bind(record.acknowledged_at.map(|t| t.to_rfc3339()))
            .bind(record.abandoned_at.map(|t| t.to_rfc3339()))
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_common::{JwtIdentitySerializer, Message};

    fn test_identity() -> Arc<dyn IdentitySerializer> {
        Arc::new(JwtIdentitySerializer::new(b"test-secret"))
    }

    async fn test_store() -> SqliteQueueStore {
        SqliteQueueStore::connect("sqlite::memory:", "test-queue", test_identity()).await.unwrap()
    }

    #[tokio::test]
    async fn insert_then_select_pending_round_trips() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        let message = Message::new(b"hello".to_vec());
        let inserted = store.insert(message, None, &cancel).await.unwrap();
        assert!(inserted.record_id.is_some());

        let pending = store.select_pending(&cancel).await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].message.content, b"hello");
    }

    #[tokio::test]
    async fn update_to_abandoned_removes_from_pending_and_appears_dead() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        let message = Message::new(b"hello".to_vec());
        let mut record = store.insert(message, None, &cancel).await.unwrap();

        record.state = MessageState::Abandoned;
        record.attempts = 3;
        record.abandoned_at = Some(Utc::now());
        store.update(&record, &cancel).await.unwrap();

        assert!(store.select_pending(&cancel).await.unwrap().is_empty());
        let dead = store
            .select_dead(Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1), &cancel)
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
        assert_eq!(dead[0].attempts, 3);
    }

    #[tokio::test]
    async fn principal_claims_round_trip_through_the_identity_serializer() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        let message = Message::new(b"hi".to_vec());
        let principal = Principal::new().with_claim("name", "test@example.com").with_claim("role", "staff");
        let inserted = store.insert(message, Some(principal), &cancel).await.unwrap();
        assert!(inserted.message.headers.security_token().is_some());

        let pending = store.select_pending(&cancel).await.unwrap();
        let restored = pending[0].principal.as_ref().unwrap();
        assert!(restored.has_claim("name", "test@example.com"));
        assert!(restored.has_claim("role", "staff"));
        assert_eq!(inserted.queue_name, "test-queue");
    }
}
