use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use bus_common::{Headers, Message, Principal};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::model::QueuedMessage;

/// Backend contract for a queue store (C3). Implementations must be safe
/// under concurrent calls from a single engine instance; cross-instance
/// sharing of the same physical store is not required.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// All non-terminal records for this queue, in any order.
    async fn select_pending(&self, cancel: &CancellationToken) -> Result<Vec<QueuedMessage>>;

    /// Terminal `Abandoned` records with `abandoned_at` in `[from, to]`.
    async fn select_dead(
        &self,
        from: DateTime<Utc>,
        to: DateTime<Utc>,
        cancel: &CancellationToken,
    ) -> Result<Vec<QueuedMessage>>;

    /// Appends a pending record and returns the materialized record,
    /// including any backend-assigned id.
    async fn insert(
        &self,
        message: Message,
        principal: Option<Principal>,
        cancel: &CancellationToken,
    ) -> Result<QueuedMessage>;

    /// Overwrites the mutable fields (`state`, `attempts`, `acknowledged_at`,
    /// `abandoned_at`) of the given record.
    async fn update(&self, record: &QueuedMessage, cancel: &CancellationToken) -> Result<()>;

    /// Whether `insert`'s returned record should be scheduled for dispatch
    /// immediately. True for every store that owns its own pending table
    /// (SQL, Mongo): `insert` and `select_pending` see the same records, so
    /// either path is a valid way to discover one. False for a store backed
    /// by an external broker, where the broker itself is the only pending
    /// list and `insert`'s return value is just an echo of what was
    /// published — scheduling it locally as well as letting
    /// `select_pending`/`recover_once` pull it back out would dispatch the
    /// same delivery twice.
    fn schedules_on_insert(&self) -> bool {
        true
    }
}

/// The context a listener receives alongside a message: the restored
/// principal, the message's own headers, and an explicit acknowledgement
/// gate. Ambient identity during listener invocation is a context value
/// rather than a thread-local, so hosts without ambient-principal idioms
/// still get it.
pub struct DispatchContext {
    acknowledged: AtomicBool,
    pub principal: Option<Principal>,
    pub headers: Headers,
}

impl DispatchContext {
    pub fn new(principal: Option<Principal>, headers: Headers) -> Self {
        DispatchContext {
            acknowledged: AtomicBool::new(false),
            principal,
            headers,
        }
    }

    /// Explicit acknowledgement; a second call is a no-op.
    pub fn acknowledge(&self) {
        self.acknowledged.store(true, Ordering::SeqCst);
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged.load(Ordering::SeqCst)
    }
}

/// The in-process receiver registered when a queue is created.
#[async_trait]
pub trait QueueListener: Send + Sync {
    /// A listener exception (an `Err` return) is treated as a
    /// non-acknowledgement: it is logged and counts against `max_attempts`.
    /// It is never propagated to the engine's caller.
    async fn receive(&self, message: &Message, context: &DispatchContext) -> anyhow::Result<()>;
}
