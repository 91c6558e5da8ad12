//! Document-store journal: one collection holding every category.

use async_trait::async_trait;
use bus_common::{Headers, Message, MessageId};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{JournalError, Result};
use crate::model::{Category, JournalEntry, JournalFilter};
use crate::store::JournalStore;

const COLLECTION_NAME: &str = "pb_message_journal";

pub struct MongoJournalStore {
    database: Database,
}

impl MongoJournalStore {
    pub fn new(client: Client, db_name: &str) -> Self {
        MongoJournalStore { database: client.database(db_name) }
    }

    fn collection(&self) -> Collection<Document> {
        self.database.collection(COLLECTION_NAME)
    }

    pub async fn init_schema(&self) -> Result<()> {
        let indexes = [
            ("idx_message_id", doc! { "message_id": 1 }),
            ("idx_category", doc! { "category": 1 }),
            ("idx_topic_name", doc! { "topic_name": 1 }),
            ("idx_related_to", doc! { "related_to": 1 }),
            ("idx_origination", doc! { "origination": 1 }),
            ("idx_destination", doc! { "destination": 1 }),
        ];
        let models = indexes.into_iter().map(|(name, keys)| {
            IndexModel::builder()
                .keys(keys)
                .options(IndexOptions::builder().name(name.to_string()).build())
                .build()
        });
        self.collection().create_indexes(models).await?;
        info!("initialized mongo journal indexes");
        Ok(())
    }

    fn parse_doc(&self, doc: &Document) -> Result<JournalEntry> {
        let id = doc.get_object_id("_id").map_err(mongo_err)?;
        let message_id = doc.get_str("message_id").map_err(mongo_err)?;
        let timestamp_millis = doc.get_i64("timestamp").map_err(mongo_err)?;
        let category = doc.get_str("category").map_err(mongo_err)?;
        let topic_name = doc.get_str("topic_name").ok().map(str::to_string);
        let headers_json = doc.get_str("headers").map_err(mongo_err)?;
        let content = doc.get_binary_generic("content").map_err(mongo_err)?.to_vec();

        let headers: Headers = serde_json::from_str(headers_json)?;
        let uuid = Uuid::parse_str(message_id).map_err(|e| JournalError::InvalidCursor(e.to_string()))?;
        let message = Message { id: MessageId(uuid), headers, content };
        let timestamp = DateTime::from_timestamp_millis(timestamp_millis)
            .ok_or_else(|| JournalError::InvalidCursor("out of range timestamp".to_string()))?;
        let category = Category::from_str(category).ok_or_else(|| JournalError::InvalidCursor(category.to_string()))?;

        Ok(JournalEntry { position: id.to_hex(), timestamp, category, topic: topic_name, message })
    }
}

fn mongo_err(e: mongodb::bson::document::ValueAccessError) -> JournalError {
    JournalError::InvalidCursor(e.to_string())
}

#[async_trait]
impl JournalStore for MongoJournalStore {
    async fn append(
        &self,
        category: Category,
        topic: Option<String>,
        message: Message,
        _cancel: &CancellationToken,
    ) -> Result<JournalEntry> {
        let headers_json = serde_json::to_string(&message.headers)?;
        let timestamp = Utc::now();

        let mut document = doc! {
            "message_id": message.id.to_string(),
            "timestamp": timestamp.timestamp_millis(),
            "category": category.as_str(),
            "message_name": message.message_name(),
            "origination": message.origination(),
            "destination": message.destination(),
            "reply_to": message.reply_to(),
            "related_to": message.related_to(),
            "content_type": message.content_type(),
            "headers": headers_json,
            "content": mongodb::bson::Binary { subtype: mongodb::bson::spec::BinarySubtype::Generic, bytes: message.content.clone() },
        };
        if let Some(topic) = &topic {
            document.insert("topic_name", topic.as_str());
        }

        let result = self.collection().insert_one(document).await?;
        let position = result.inserted_id.as_object_id().map(ObjectId::to_hex).unwrap_or_default();

        Ok(JournalEntry { position, timestamp, category, topic, message })
    }

    async fn read(
        &self,
        after: Option<String>,
        filter: JournalFilter,
        _cancel: &CancellationToken,
    ) -> Result<(Vec<JournalEntry>, Option<String>)> {
        let mongo_filter = match &after {
            Some(cursor) => {
                let object_id = ObjectId::parse_str(cursor).map_err(|_| JournalError::InvalidCursor(cursor.clone()))?;
                doc! { "_id": { "$gt": object_id } }
            }
            None => doc! {},
        };
        let find_options = FindOptions::builder().sort(doc! { "_id": 1 }).build();
        let mut cursor = self.collection().find(mongo_filter).with_options(find_options).await?;

        let mut entries = Vec::new();
        let mut last_seen = after;
        while let Some(doc) = cursor.try_next().await? {
            let entry = self.parse_doc(&doc)?;
            last_seen = Some(entry.position.clone());
            if filter.matches(&entry) {
                entries.push(entry);
            }
        }

        Ok((entries, last_seen))
    }
}
