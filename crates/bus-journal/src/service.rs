//! Thin façade (C7) over a `JournalStore`: writes journal entries and
//! supports time/category enumeration. Carries no dispatch logic of its
//! own — it is called by the queue engine and the publish path.

use std::sync::Arc;

use bus_common::Message;
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::{Category, JournalEntry, JournalFilter};
use crate::store::JournalStore;

pub struct JournalingService<S: JournalStore> {
    store: Arc<S>,
    cancel: CancellationToken,
}

impl<S: JournalStore> JournalingService<S> {
    pub fn new(store: Arc<S>) -> Self {
        JournalingService { store, cancel: CancellationToken::new() }
    }

    pub async fn journal_sent(&self, message: Message) -> Result<JournalEntry> {
        let topic = message.topic().map(str::to_string);
        self.store.append(Category::Sent, topic, message, &self.cancel).await
    }

    pub async fn journal_received(&self, message: Message) -> Result<JournalEntry> {
        let topic = message.topic().map(str::to_string);
        self.store.append(Category::Received, topic, message, &self.cancel).await
    }

    pub async fn journal_published(&self, topic: impl Into<String>, message: Message) -> Result<JournalEntry> {
        self.store.append(Category::Published, Some(topic.into()), message, &self.cancel).await
    }

    pub async fn read(
        &self,
        after: Option<String>,
        filter: JournalFilter,
    ) -> Result<(Vec<JournalEntry>, Option<String>)> {
        self.store.read(after, filter, &self.cancel).await
    }
}
