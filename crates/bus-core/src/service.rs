//! Queueing service (C5): registry of queues by name, backed by a
//! `DashMap<String, Arc<dyn ErasedEngine>>` the same way the teacher's
//! process-pool manager indexes pools by code.

use std::sync::Arc;

use bus_common::{Message, Principal};
use bus_queue::{QueueEngine, QueueListener, QueueMetrics, QueueOptions, QueuedMessage, QueueStore};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use crate::error::{BusError, Result};
use crate::registry::RegisteredQueue;

#[derive(Default)]
pub struct QueueingService {
    queues: DashMap<String, RegisteredQueue>,
}

impl QueueingService {
    pub fn new() -> Self {
        QueueingService { queues: DashMap::new() }
    }

    /// Creates and initializes a queue under `name`, backed by `store`.
    /// Idempotent when called again with the same listener and options;
    /// rejected if either differs, per this service's stricter duplicate
    /// policy.
    pub async fn create_queue<S: QueueStore + 'static>(
        &self,
        name: impl Into<String>,
        store: Arc<S>,
        listener: Arc<dyn QueueListener>,
        options: QueueOptions,
    ) -> Result<()> {
        let name = name.into();

        if let Some(existing) = self.queues.get(&name) {
            return if existing.matches(&listener, &options) {
                Ok(())
            } else {
                Err(BusError::QueueAlreadyExists { name })
            };
        }

        let engine = QueueEngine::new(name.clone(), store, listener.clone(), options);
        engine.init().await?;
        info!(queue = %name, "queue created and initialized");
        self.queues.insert(name, RegisteredQueue { engine: Arc::new(engine), listener });
        Ok(())
    }

    pub async fn enqueue(&self, queue: &str, message: Message, principal: Option<Principal>) -> Result<QueuedMessage> {
        let entry = self.queues.get(queue).ok_or_else(|| BusError::QueueNotFound(queue.to_string()))?;
        let engine = entry.engine.clone();
        drop(entry);
        Ok(engine.enqueue(message, principal).await?)
    }

    pub fn metrics(&self, queue: &str) -> Option<QueueMetrics> {
        self.queues.get(queue).map(|entry| entry.engine.metrics())
    }

    /// Disposes a single named queue; the service-wide, zero-argument
    /// `dispose` is the counterpart a host calls on shutdown.
    pub async fn dispose_queue(&self, queue: &str) -> Result<()> {
        let (_, entry) = self.queues.remove(queue).ok_or_else(|| BusError::QueueNotFound(queue.to_string()))?;
        entry.engine.dispose().await;
        Ok(())
    }

    /// Disposes every registered queue.
    pub async fn dispose(&self) {
        let names: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
        for name in names {
            if let Some((_, entry)) = self.queues.remove(&name) {
                entry.engine.dispose().await;
            }
        }
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }
}

/// Convenience wrapper exposed alongside `QueueingService` for dead-letter
/// inspection, since `recover_once`/`select_dead`/`redrive` require the
/// concrete storage type and can't pass through the erased registry.
pub struct QueueHandle<S: QueueStore + 'static> {
    pub engine: QueueEngine<S>,
}

impl<S: QueueStore + 'static> QueueHandle<S> {
    pub fn new(engine: QueueEngine<S>) -> Self {
        QueueHandle { engine }
    }

    pub async fn select_dead(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> bus_queue::Result<Vec<QueuedMessage>> {
        self.engine.select_dead(from, to).await
    }

    pub async fn redrive(&self, record: QueuedMessage) -> bus_queue::Result<()> {
        self.engine.redrive(record).await
    }

    pub async fn recover_once(&self) -> bus_queue::Result<usize> {
        self.engine.recover_once().await
    }
}
