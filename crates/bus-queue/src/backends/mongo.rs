//! Document-store queue backend: a collection per queue.

use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{Headers, IdentitySerializer, Message, MessageId, Principal};
use chrono::{DateTime, Utc};
use futures::stream::TryStreamExt;
use mongodb::bson::{doc, oid::ObjectId, Document};
use mongodb::options::{FindOptions, IndexOptions};
use mongodb::{Client, Collection, Database, IndexModel};
use tokio_util::sync::CancellationToken;
use tracing::info;
use uuid::Uuid;

use crate::error::{QueueError, Result};
use crate::model::{MessageState, QueuedMessage};
use crate::store::QueueStore;

pub struct MongoQueueStore {
    database: Database,
    queue_name: String,
    identity: Arc<dyn IdentitySerializer>,
}

impl MongoQueueStore {
    pub fn new(client: Client, db_name: &str, queue_name: impl Into<String>, identity: Arc<dyn IdentitySerializer>) -> Self {
        MongoQueueStore { database: client.database(db_name), queue_name: queue_name.into(), identity }
    }

    fn collection(&self) -> Collection<Document> {
        self.database.collection(&self.collection_name())
    }

    fn collection_name(&self) -> String {
        format!("queue_{}", self.queue_name)
    }

    pub async fn init_schema(&self) -> Result<()> {
        let collection = self.collection();
        let pending_index = IndexModel::builder()
            .keys(doc! { "acknowledged": 1, "abandoned": 1 })
            .options(IndexOptions::builder().name("idx_pending".to_string()).build())
            .build();
        let abandoned_index = IndexModel::builder()
            .keys(doc! { "abandoned": 1 })
            .options(IndexOptions::builder().name("idx_abandoned".to_string()).build())
            .build();
        collection.create_indexes([pending_index, abandoned_index]).await?;
        info!(collection = %self.collection_name(), "initialized mongo queue indexes");
        Ok(())
    }

    async fn parse_doc(&self, doc: &Document) -> Result<QueuedMessage> {
        let record_id = doc.get_object_id("_id").ok().map(|id| id.to_hex());
        let message_id = doc.get_str("message_id").map_err(mongo_err)?;
        let headers_json = doc.get_str("headers").map_err(mongo_err)?;
        let content = doc.get_binary_generic("content").map_err(mongo_err)?.to_vec();
        let attempts = doc.get_i32("attempts").unwrap_or(0);
        let acknowledged = doc.get_i64("acknowledged").ok().and_then(DateTime::from_timestamp_millis);
        let abandoned = doc.get_i64("abandoned").ok().and_then(DateTime::from_timestamp_millis);
        let sender_principal = doc.get_str("sender_principal").ok().map(str::to_string);

        let headers: Headers = serde_json::from_str(headers_json)?;
        let uuid = Uuid::parse_str(message_id).map_err(|e| QueueError::NotFound(e.to_string()))?;
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
            record_id,
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

fn mongo_err(e: mongodb::bson::document::ValueAccessError) -> QueueError {
    QueueError::NotFound(e.to_string())
}

#[async_trait]
impl QueueStore for MongoQueueStore {
    async fn select_pending(&self, _cancel: &CancellationToken) -> Result<Vec<QueuedMessage>> {
        let filter = doc! { "acknowledged": null, "abandoned": null };
        let mut cursor = self.collection().find(filter).await?;
        let mut records = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            records.push(self.parse_doc(&doc).await?);
        }
        Ok(records)
    }

    async fn select_dead(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        _cancel: &CancellationToken,
    ) -> Result<Vec<QueuedMessage>> {
        let filter = doc! {
            "abandoned": { "$gte": from.timestamp_millis(), "$lte": to.timestamp_millis() },
        };
        let find_options = FindOptions::builder().sort(doc! { "abandoned": 1 }).build();
        let mut cursor = self.collection().find(filter).with_options(find_options).await?;
        let mut records = Vec::new();
        while let Some(doc) = cursor.try_next().await? {
            records.push(self.parse_doc(&doc).await?);
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

        let mut document = doc! {
            "message_id": message.id.to_string(),
            "headers": headers_json,
            "content": mongodb::bson::Binary { subtype: mongodb::bson::spec::BinarySubtype::Generic, bytes: message.content.clone() },
            "attempts": 0,
            "acknowledged": null,
            "abandoned": null,
        };
        if let Some(sp) = &sender_principal {
            document.insert("sender_principal", sp.as_str());
        }

        let result = self.collection().insert_one(document).await?;
        let record_id = result.inserted_id.as_object_id().map(ObjectId::to_hex);

        Ok(QueuedMessage {
            record_id,
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
        let object_id = ObjectId::parse_str(id).map_err(|e| QueueError::NotFound(e.to_string()))?;

        let update = doc! {
            "$set": {
                "attempts": record.attempts as i32,
                "acknowledged": record.acknowledged_at.map(|t| t.timestamp_millis()),
                "abandoned": record.abandoned_at.map(|t| t.timestamp_millis()),
            }
        };
        self.collection().update_one(doc! { "_id": object_id }, update).await?;
        Ok(())
    }
}
