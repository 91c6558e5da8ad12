//! Type erasure for `QueueEngine<S>` so queues with different storage
//! backends can share one registry.

use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{Message, Principal};
use bus_queue::{QueueEngine, QueueMetrics, QueueOptions, QueuedMessage, QueueStore};

#[async_trait]
pub(crate) trait ErasedEngine: Send + Sync {
    async fn enqueue(&self, message: Message, principal: Option<Principal>) -> bus_queue::Result<QueuedMessage>;
    async fn dispose(&self);
    fn metrics(&self) -> QueueMetrics;
    fn options(&self) -> &QueueOptions;
}

#[async_trait]
impl<S: QueueStore + 'static> ErasedEngine for QueueEngine<S> {
    async fn enqueue(&self, message: Message, principal: Option<Principal>) -> bus_queue::Result<QueuedMessage> {
        QueueEngine::enqueue(self, message, principal).await
    }

    async fn dispose(&self) {
        QueueEngine::dispose(self).await
    }

    fn metrics(&self) -> QueueMetrics {
        QueueEngine::metrics(self)
    }

    fn options(&self) -> &QueueOptions {
        QueueEngine::options(self)
    }
}

/// A registered queue: the erased engine plus the identity of the listener
/// it was created with, so a later `create_queue` call under the same name
/// can detect a mismatched registration.
pub(crate) struct RegisteredQueue {
    pub engine: Arc<dyn ErasedEngine>,
    pub listener: Arc<dyn bus_queue::QueueListener>,
}

impl RegisteredQueue {
    pub fn matches(&self, listener: &Arc<dyn bus_queue::QueueListener>, options: &QueueOptions) -> bool {
        Arc::ptr_eq(&self.listener, listener) && self.engine.options() == options
    }
}
