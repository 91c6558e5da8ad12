//! Remote SQL journal store for multi-node deployments.

use async_trait::async_trait;
use bus_common::{Headers, Message, MessageId};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPool;
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{JournalError, Result};
use crate::model::{Category, JournalEntry, JournalFilter};
use crate::store::JournalStore;

pub struct PostgresJournalStore {
    pool: PgPool,
}

impl PostgresJournalStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Self::create_schema(&pool).await?;
        Ok(PostgresJournalStore { pool })
    }

    pub fn with_pool(pool: PgPool) -> Self {
        PostgresJournalStore { pool }
    }

    async fn create_schema(pool: &PgPool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pb_message_journal (
                id BIGSERIAL PRIMARY KEY,
                message_id TEXT NOT NULL,
                timestamp TIMESTAMPTZ NOT NULL,
                category TEXT NOT NULL,
                topic_name TEXT,
                message_name TEXT,
                origination TEXT,
                destination TEXT,
                reply_to TEXT,
                related_to TEXT,
                content_type TEXT,
                headers TEXT NOT NULL,
                message_content BYTEA NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        for (name, column) in [
            ("idx_pb_message_journal_message_id", "message_id"),
            ("idx_pb_message_journal_timestamp", "timestamp"),
            ("idx_pb_message_journal_category", "category"),
            ("idx_pb_message_journal_topic_name", "topic_name"),
            ("idx_pb_message_journal_related_to", "related_to"),
            ("idx_pb_message_journal_origination", "origination"),
            ("idx_pb_message_journal_destination", "destination"),
        ] {
            sqlx::query(&format!("CREATE INDEX IF NOT EXISTS {name} ON pb_message_journal ({column})"))
                .execute(pool)
                .await?;
        }

        info!("postgres journal schema initialized");
        Ok(())
    }

    fn row_to_entry(row: &sqlx::postgres::PgRow) -> Result<JournalEntry> {
        let id: i64 = row.try_get("id")?;
        let message_id: String = row.try_get("message_id")?;
        let timestamp: DateTime<Utc> = row.try_get("timestamp")?;
        let category: String = row.try_get("category")?;
        let topic_name: Option<String> = row.try_get("topic_name")?;
        let headers_json: String = row.try_get("headers")?;
        let content: Vec<u8> = row.try_get("message_content")?;

        let headers: Headers = serde_json::from_str(&headers_json)?;
        let uuid = Uuid::parse_str(&message_id).map_err(|e| JournalError::InvalidCursor(e.to_string()))?;
        let message = Message { id: MessageId(uuid), headers, content };
        let category = Category::from_str(&category).ok_or_else(|| JournalError::InvalidCursor(category.clone()))?;

        Ok(JournalEntry { position: id.to_string(), timestamp, category, topic: topic_name, message })
    }
}

#[async_trait]
impl JournalStore for PostgresJournalStore {
    async fn append(
        &self,
        category: Category,
        topic: Option<String>,
        message: Message,
        _cancel: &CancellationToken,
    ) -> Result<JournalEntry> {
        let headers_json = serde_json::to_string(&message.headers)?;
        let timestamp = Utc::now();

        let row = sqlx::query(
            r#"
            INSERT INTO pb_message_journal
                (message_id, timestamp, category, topic_name, message_name, origination, destination,
                 reply_to, related_to, content_type, headers, message_content)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            RETURNING id
            "#,
        )
        .bind(message.id.to_string())
        .bind(timestamp)
        .bind(category.as_str())
        .bind(&topic)
        .bind(message.message_name())
        .bind(message.origination())
        .bind(message.destination())
        .bind(message.reply_to())
        .bind(message.related_to())
        .bind(message.content_type())
        .bind(&headers_json)
        .bind(&message.content)
        .fetch_one(&self.pool)
        .await?;

        let id: i64 = row.try_get("id")?;
        Ok(JournalEntry { position: id.to_string(), timestamp, category, topic, message })
    }

    async fn read(
        &self,
        after: Option<String>,
        filter: JournalFilter,
        _cancel: &CancellationToken,
    ) -> Result<(Vec<JournalEntry>, Option<String>)> {
        let after_id: i64 = match &after {
            Some(cursor) => cursor.parse().map_err(|_| JournalError::InvalidCursor(cursor.clone()))?,
            None => 0,
        };

        let rows = sqlx::query("SELECT * FROM pb_message_journal WHERE id > $1 ORDER BY id ASC")
            .bind(after_id)
            .fetch_all(&self.pool)
            .await?;

        let mut entries = Vec::new();
        let mut last_seen = after;
        for row in &rows {
            let entry = Self::row_to_entry(row)?;
            last_seen = Some(entry.position.clone());
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }

        Ok((entries, last_seen))
    }
}
