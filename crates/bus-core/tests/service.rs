use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{IdentitySerializer, JwtIdentitySerializer, Message};
use bus_core::{BusError, QueueingService};
use bus_queue::backends::sqlite::SqliteQueueStore;
use bus_queue::{DispatchContext, QueueListener, QueueOptions};

fn test_identity() -> Arc<dyn IdentitySerializer> {
    Arc::new(JwtIdentitySerializer::new(b"test-secret"))
}

struct CountingListener {
    count: Arc<AtomicUsize>,
}

#[async_trait]
impl QueueListener for CountingListener {
    async fn receive(&self, _message: &Message, context: &DispatchContext) -> anyhow::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        context.acknowledge();
        Ok(())
    }
}

#[tokio::test]
async fn create_enqueue_and_dispatch_round_trips() {
    let service = QueueingService::new();
    let store = Arc::new(SqliteQueueStore::connect("sqlite::memory:", "orders", test_identity()).await.unwrap());
    let count = Arc::new(AtomicUsize::new(0));
    let listener = Arc::new(CountingListener { count: count.clone() });

    service
        .create_queue("orders", store, listener, QueueOptions::default())
        .await
        .unwrap();

    service.enqueue("orders", Message::new(b"hello".to_vec()), None).await.unwrap();

    tokio::time::sleep(std::time::Duration::from_millis(50)).await;
    assert_eq!(count.load(Ordering::SeqCst), 1);

    let metrics = service.metrics("orders").unwrap();
    assert_eq!(metrics.total_acknowledged, 1);

    service.dispose_queue("orders").await.unwrap();
}

#[tokio::test]
async fn recreating_queue_with_different_options_is_rejected() {
    let service = QueueingService::new();
    let store = Arc::new(SqliteQueueStore::connect("sqlite::memory:", "orders", test_identity()).await.unwrap());
    let listener = Arc::new(CountingListener { count: Arc::new(AtomicUsize::new(0)) });

    service
        .create_queue("orders", store.clone(), listener.clone(), QueueOptions::default())
        .await
        .unwrap();

    let different_options = QueueOptions { max_attempts: 99, ..QueueOptions::default() };
    let result = service.create_queue("orders", store, listener, different_options).await;

    assert!(matches!(result, Err(BusError::QueueAlreadyExists { name }) if name == "orders"));
}

#[tokio::test]
async fn recreating_queue_with_same_listener_and_options_is_idempotent() {
    let service = QueueingService::new();
    let store = Arc::new(SqliteQueueStore::connect("sqlite::memory:", "orders", test_identity()).await.unwrap());
    let listener = Arc::new(CountingListener { count: Arc::new(AtomicUsize::new(0)) });

    service
        .create_queue("orders", store.clone(), listener.clone(), QueueOptions::default())
        .await
        .unwrap();
    service
        .create_queue("orders", store, listener, QueueOptions::default())
        .await
        .unwrap();

    assert_eq!(service.queue_names(), vec!["orders".to_string()]);
}

#[tokio::test]
async fn enqueue_on_unknown_queue_fails() {
    let service = QueueingService::new();
    let result = service.enqueue("missing", Message::new(b"x".to_vec()), None).await;
    assert!(matches!(result, Err(BusError::QueueNotFound(name)) if name == "missing"));
}
