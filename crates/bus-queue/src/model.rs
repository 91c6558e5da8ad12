use std::time::Duration;

use bus_common::{Message, Principal};
use chrono::{DateTime, Utc};

/// Terminal states are `Acknowledged` and `Abandoned`; a record in a
/// terminal state is never redispatched.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageState {
    Pending,
    Acknowledged,
    Abandoned,
}

/// A message sitting in a queue, with its dispatch state.
#[derive(Debug, Clone)]
pub struct QueuedMessage {
    /// Backend-assigned identifier; absent until the store has persisted
    /// the initial insert.
    pub record_id: Option<String>,
    pub queue_name: String,
    pub message: Message,
    pub principal: Option<Principal>,
    pub state: MessageState,
    pub attempts: u32,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub abandoned_at: Option<DateTime<Utc>>,
}

impl QueuedMessage {
    pub fn pending(queue_name: impl Into<String>, message: Message, principal: Option<Principal>) -> Self {
        QueuedMessage {
            record_id: None,
            queue_name: queue_name.into(),
            message,
            principal,
            state: MessageState::Pending,
            attempts: 0,
            acknowledged_at: None,
            abandoned_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self.state, MessageState::Acknowledged | MessageState::Abandoned)
    }
}

/// Per-queue dispatch configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueOptions {
    /// Dispatch parallelism; must be >= 1.
    pub concurrency_limit: usize,
    /// Must be >= 1.
    pub max_attempts: u32,
    /// Delay applied between attempts, cancellable by dispose.
    pub retry_delay: Duration,
    pub auto_acknowledge: bool,
    /// Non-durable queues may live in memory only.
    pub is_durable: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        QueueOptions {
            concurrency_limit: 4,
            max_attempts: 5,
            retry_delay: Duration::from_secs(5),
            auto_acknowledge: false,
            is_durable: true,
        }
    }
}

/// Point-in-time operational counters for one queue, grounded on the
/// teacher's per-backend `QueueMetrics` shape.
#[derive(Debug, Clone, Default)]
pub struct QueueMetrics {
    pub queue_name: String,
    pub pending_messages: u64,
    pub in_flight_messages: u64,
    pub total_acknowledged: u64,
    pub total_abandoned: u64,
}
