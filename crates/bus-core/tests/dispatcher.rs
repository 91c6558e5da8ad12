use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{IdentitySerializer, JwtIdentitySerializer, Message};
use bus_core::{on_inbound, on_outbound, publish, InboundRouter, OutboundSender, QueueingService};
use bus_journal::backends::sqlite::SqliteJournalStore;
use bus_journal::JournalingService;
use bus_queue::backends::sqlite::SqliteQueueStore;
use bus_queue::{DispatchContext, QueueListener, QueueOptions};
use bus_subscriptions::backends::memory::InMemorySubscriptionStore;
use bus_subscriptions::SubscriptionStore;

struct StaticRouter;

impl InboundRouter for StaticRouter {
    fn route(&self, _message: &Message) -> String {
        "inbox".to_string()
    }
}

struct NoopListener;

#[async_trait]
impl QueueListener for NoopListener {
    async fn receive(&self, _message: &Message, context: &DispatchContext) -> anyhow::Result<()> {
        context.acknowledge();
        Ok(())
    }
}

fn test_identity() -> Arc<dyn IdentitySerializer> {
    Arc::new(JwtIdentitySerializer::new(b"test-secret"))
}

struct RecordingSender {
    sent: std::sync::Mutex<Vec<String>>,
}

#[async_trait]
impl OutboundSender for RecordingSender {
    async fn send(&self, subscriber: &str, _message: &Message) -> anyhow::Result<()> {
        self.sent.lock().unwrap().push(subscriber.to_string());
        Ok(())
    }
}

#[tokio::test]
async fn on_inbound_journals_then_enqueues_on_routed_queue() {
    let journal_store = Arc::new(SqliteJournalStore::connect("sqlite::memory:").await.unwrap());
    let journal = JournalingService::new(journal_store);

    let queueing = QueueingService::new();
    let store = Arc::new(SqliteQueueStore::connect("sqlite::memory:", "inbox", test_identity()).await.unwrap());
    queueing
        .create_queue("inbox", store, Arc::new(NoopListener), QueueOptions::default())
        .await
        .unwrap();

    let router = StaticRouter;
    on_inbound(&journal, &queueing, &router, Message::new(b"payload".to_vec()), None)
        .await
        .unwrap();

    let (entries, _) = journal.read(None, Default::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, bus_journal::Category::Received);
}

#[tokio::test]
async fn publish_journals_and_delivers_to_every_live_subscriber() {
    let journal_store = Arc::new(SqliteJournalStore::connect("sqlite::memory:").await.unwrap());
    let journal = JournalingService::new(journal_store);

    let subscriptions = InMemorySubscriptionStore::new();
    subscriptions.subscribe("orders.created", "svc-a", None).await.unwrap();
    subscriptions.subscribe("orders.created", "svc-b", None).await.unwrap();

    let sender = RecordingSender { sent: std::sync::Mutex::new(Vec::new()) };

    let outcome = publish(&journal, &subscriptions, &sender, "orders.created", Message::new(b"order".to_vec()))
        .await
        .unwrap();

    assert_eq!(outcome.delivered.len(), 2);
    assert!(outcome.failed.is_empty());

    let (entries, _) = journal.read(None, Default::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, bus_journal::Category::Published);
    assert_eq!(entries[0].topic.as_deref(), Some("orders.created"));
}

#[tokio::test]
async fn on_outbound_journals_as_sent_then_hands_off_to_the_transport() {
    let journal_store = Arc::new(SqliteJournalStore::connect("sqlite::memory:").await.unwrap());
    let journal = JournalingService::new(journal_store);
    let sender = RecordingSender { sent: std::sync::Mutex::new(Vec::new()) };

    on_outbound(&journal, &sender, "svc-a", Message::new(b"reply".to_vec())).await.unwrap();

    assert_eq!(sender.sent.lock().unwrap().as_slice(), ["svc-a"]);

    let (entries, _) = journal.read(None, Default::default()).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].category, bus_journal::Category::Sent);
}
