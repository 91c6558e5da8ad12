//! Embedded file-backed journal store.

use async_trait::async_trait;
use bus_common::{Headers, Message, MessageId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::SqlitePool;
use sqlx::Row;
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{JournalError, Result};
use crate::model::{Category, JournalEntry, JournalFilter};
use crate::store::JournalStore;

/// `PB_MessageJournal` realized over `sqlx::Sqlite`.
pub struct SqliteJournalStore {
    pool: SqlitePool,
}

impl SqliteJournalStore {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = SqlitePool::connect(database_url).await?;
        Self::create_schema(&pool).await?;
        Ok(SqliteJournalStore { pool })
    }

    pub fn with_pool(pool: SqlitePool) -> Self {
        SqliteJournalStore { pool }
    }

    async fn create_schema(pool: &SqlitePool) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS pb_message_journal (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                message_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                category TEXT NOT NULL,
                topic_name TEXT,
                message_name TEXT,
                origination TEXT,
                destination TEXT,
                reply_to TEXT,
                related_to TEXT,
                content_type TEXT,
                headers TEXT NOT NULL,
                message_content BLOB NOT NULL
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

        info!("sqlite journal schema initialized");
        Ok(())
    }

    fn row_to_entry(row: &sqlx::sqlite::SqliteRow) -> Result<JournalEntry> {
        let id: i64 = row.try_get("id")?;
        let message_id: String = row.try_get("message_id")?;
        let timestamp: String = row.try_get("timestamp")?;
        let category: String = row.try_get("category")?;
        let topic_name: Option<String> = row.try_get("topic_name")?;
        let headers_json: String = row.try_get("headers")?;
        let content: Vec<u8> = row.try_get("message_content")?;

        let headers: Headers = serde_json::from_str(&headers_json)?;
        let uuid = Uuid::parse_str(&message_id).map_err(|e| JournalError::InvalidCursor(e.to_string()))?;
        let message = Message { id: MessageId(uuid), headers, content };
        let timestamp = DateTime::parse_from_rfc3339(&timestamp)
            .map_err(|e| JournalError::InvalidCursor(e.to_string()))?
            .with_timezone(&Utc);
        let category = Category::from_str(&category).ok_or_else(|| JournalError::InvalidCursor(category.clone()))?;

        Ok(JournalEntry { position: id.to_string(), timestamp, category, topic: topic_name, message })
    }
}

#[async_trait]
impl JournalStore for SqliteJournalStore {
    async fn append(
        &self,
        category: Category,
        topic: Option<String>,
        message: Message,
        _cancel: &CancellationToken,
    ) -> Result<JournalEntry> {
        let headers_json = serde_json::to_string(&message.headers)?;
        let timestamp = Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO pb_message_journal
                (message_id, timestamp, category, topic_name, message_name, origination, destination,
                 reply_to, related_to, content_type, headers, message_content)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(message.id.to_string())
        .bind(timestamp.to_rfc3339())
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
        .execute(&self.pool)
        .await?;

        Ok(JournalEntry { position: result.last_insert_rowid().to_string(), timestamp, category, topic, message })
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

        let rows = sqlx::query("SELECT * FROM pb_message_journal WHERE id > ? ORDER BY id ASC")
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

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> SqliteJournalStore {
        SqliteJournalStore::connect("sqlite::memory:").await.unwrap()
    }

    #[tokio::test]
    async fn append_then_read_returns_entry_and_advances_cursor() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        let entry = store
            .append(Category::Sent, None, Message::new(b"hi".to_vec()), &cancel)
            .await
            .unwrap();

        let (entries, next) = store.read(None, JournalFilter::default(), &cancel).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].position, entry.position);
        assert_eq!(next, Some(entry.position));
    }

    #[tokio::test]
    async fn reader_at_cursor_only_sees_a_prefix() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        let first = store.append(Category::Sent, None, Message::new(b"one".to_vec()), &cancel).await.unwrap();
        store.append(Category::Received, None, Message::new(b"two".to_vec()), &cancel).await.unwrap();

        let (entries, _) = store.read(None, JournalFilter::default(), &cancel).await.unwrap();
        assert_eq!(entries.len(), 2);

        let (entries_after_first, _) = store
            .read(Some(first.position), JournalFilter::default(), &cancel)
            .await
            .unwrap();
        assert_eq!(entries_after_first.len(), 1);
        assert_eq!(entries_after_first[0].message.content, b"two");
    }

    #[tokio::test]
    async fn filter_by_category_excludes_other_categories() {
        let store = test_store().await;
        let cancel = CancellationToken::new();
        store.append(Category::Sent, None, Message::new(b"one".to_vec()), &cancel).await.unwrap();
        store.append(Category::Published, Some("topic-a".to_string()), Message::new(b"two".to_vec()), &cancel).await.unwrap();

        let filter = JournalFilter { categories: Some(vec![Category::Published]), ..Default::default() };
        let (entries, _) = store.read(None, filter, &cancel).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].topic.as_deref(), Some("topic-a"));
    }
}
