//! The queue engine (C4): ownership of a single named queue — enqueue,
//! bounded-concurrency dispatch, retry, dead-letter, and recovery on start.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use bus_common::{Message, Principal};
use chrono::{DateTime, Utc};
use dashmap::DashSet;
use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{QueueError, Result};
use crate::model::{MessageState, QueueMetrics, QueueOptions, QueuedMessage};
use crate::store::{DispatchContext, QueueListener, QueueStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum QueueState {
    Active,
    Faulted,
    Disposed,
}

struct EngineInner<S: QueueStore> {
    name: String,
    store: Arc<S>,
    listener: Arc<dyn QueueListener>,
    options: QueueOptions,
    semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
    state: Mutex<QueueState>,
    initialized: AtomicBool,
    tasks: Mutex<JoinSet<()>>,
    total_acknowledged: AtomicU64,
    total_abandoned: AtomicU64,
    /// Scheduled but not yet picked up by a worker (waiting behind the
    /// concurrency limit, or loaded by `init`/`recover_once` and not yet
    /// run). Incremented in `schedule`, decremented once a worker acquires
    /// its permit in `run_attempt`.
    pending: AtomicU64,
    /// Record ids currently owned by a worker, so a recovery scan never
    /// double-schedules a message a worker already holds.
    in_flight: DashSet<String>,
}

/// Owns a single named queue. Parameterized over a small storage interface
/// (`QueueStore`) rather than a class hierarchy of backends — backends are
/// values implementing that interface.
pub struct QueueEngine<S: QueueStore + 'static> {
    inner: Arc<EngineInner<S>>,
}

impl<S: QueueStore + 'static> Clone for QueueEngine<S> {
    fn clone(&self) -> Self {
        QueueEngine { inner: self.inner.clone() }
    }
}

impl<S: QueueStore + 'static> QueueEngine<S> {
    pub fn new(name: impl Into<String>, store: Arc<S>, listener: Arc<dyn QueueListener>, options: QueueOptions) -> Self {
        let concurrency_limit = options.concurrency_limit.max(1);
        let inner = EngineInner {
            name: name.into(),
            store,
            listener,
            options,
            semaphore: Arc::new(Semaphore::new(concurrency_limit)),
            cancel: CancellationToken::new(),
            state: Mutex::new(QueueState::Active),
            initialized: AtomicBool::new(false),
            tasks: Mutex::new(JoinSet::new()),
            total_acknowledged: AtomicU64::new(0),
            total_abandoned: AtomicU64::new(0),
            pending: AtomicU64::new(0),
            in_flight: DashSet::new(),
        };
        QueueEngine { inner: Arc::new(inner) }
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn options(&self) -> &QueueOptions {
        &self.inner.options
    }

    /// Idempotent. Reads `select_pending` once and schedules each returned
    /// record for dispatch. Enqueues racing with `init` are safe: both paths
    /// funnel through `schedule`.
    pub async fn init(&self) -> Result<()> {
        if self.inner.initialized.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        let pending = self.inner.store.select_pending(&self.inner.cancel).await?;
        info!(queue = %self.inner.name, count = pending.len(), "loaded pending messages on init");
        for record in pending {
            self.schedule(record);
        }
        Ok(())
    }

    /// Appends a pending record to the store, then schedules it for
    /// dispatch unless the store says dispatch only happens by consuming
    /// its own pending list (see `QueueStore::schedules_on_insert`). Fails
    /// if the engine is disposed or faulted.
    pub async fn enqueue(&self, message: Message, principal: Option<Principal>) -> Result<QueuedMessage> {
        {
            let state = *self.inner.state.lock();
            match state {
                QueueState::Disposed => return Err(QueueError::Disposed),
                QueueState::Faulted => return Err(QueueError::Faulted(self.inner.name.clone())),
                QueueState::Active => {}
            }
        }

        if message.is_expired(Utc::now()) {
            debug!(queue = %self.inner.name, message_id = %message.id, "enqueued message is already expired");
        }

        let record = match self.inner.store.insert(message, principal, &self.inner.cancel).await {
            Ok(record) => record,
            Err(e) => {
                if !e.is_transient() {
                    *self.inner.state.lock() = QueueState::Faulted;
                }
                return Err(e);
            }
        };
        if self.inner.store.schedules_on_insert() {
            self.schedule(record.clone());
        }
        Ok(record)
    }

    /// Moves an `Abandoned` record back to `Pending` with `attempts` reset
    /// to zero, and schedules it.
    pub async fn redrive(&self, mut record: QueuedMessage) -> Result<()> {
        record.state = MessageState::Pending;
        record.attempts = 0;
        record.acknowledged_at = None;
        record.abandoned_at = None;
        self.inner.store.update(&record, &self.inner.cancel).await?;
        self.schedule(record);
        Ok(())
    }

    /// Re-scans `select_pending` and schedules any record not already owned
    /// by an in-flight worker. A belt-and-suspenders complement to `init`'s
    /// one-shot load, for a long-lived process that may have missed a
    /// `schedule` call (e.g. a worker panicked before persisting its
    /// in-flight marker during a store outage).
    pub async fn recover_once(&self) -> Result<usize> {
        let pending = self.inner.store.select_pending(&self.inner.cancel).await?;
        let mut recovered = 0;
        for record in pending {
            let already_in_flight = record
                .record_id
                .as_ref()
                .is_some_and(|id| self.inner.in_flight.contains(id));
            if already_in_flight {
                continue;
            }
            self.schedule(record);
            recovered += 1;
        }
        Ok(recovered)
    }

    /// Dead records with `abandoned_at` in `[from, to]`.
    pub async fn select_dead(&self, from: DateTime<Utc>, to: DateTime<Utc>) -> Result<Vec<QueuedMessage>> {
        self.inner.store.select_dead(from, to, &self.inner.cancel).await
    }

    /// Cancels the dispatch loop; workers observe it at their next
    /// suspension point and exit without starting new attempts. Drains
    /// already-spawned workers before returning.
    pub async fn dispose(&self) {
        {
            let mut state = self.inner.state.lock();
            if *state == QueueState::Disposed {
                return;
            }
            *state = QueueState::Disposed;
        }
        self.inner.cancel.cancel();
        let mut tasks = {
            let mut guard = self.inner.tasks.lock();
            std::mem::replace(&mut *guard, JoinSet::new())
        };
        while tasks.join_next().await.is_some() {}
        info!(queue = %self.inner.name, "queue engine disposed");
    }

    pub fn metrics(&self) -> QueueMetrics {
        QueueMetrics {
            queue_name: self.inner.name.clone(),
            pending_messages: self.inner.pending.load(Ordering::Relaxed),
            in_flight_messages: (self.inner.options.concurrency_limit
                - self.inner.semaphore.available_permits()) as u64,
            total_acknowledged: self.inner.total_acknowledged.load(Ordering::Relaxed),
            total_abandoned: self.inner.total_abandoned.load(Ordering::Relaxed),
        }
    }

    fn schedule(&self, record: QueuedMessage) {
        if let Some(id) = &record.record_id {
            self.inner.in_flight.insert(id.clone());
        }
        self.inner.pending.fetch_add(1, Ordering::Relaxed);
        let inner = self.inner.clone();
        let mut tasks = self.inner.tasks.lock();
        tasks.spawn(async move {
            run_attempt(inner, record).await;
        });
    }
}

/// Removes a record's id from the in-flight set no matter which of
/// `run_attempt`'s several return points is taken.
struct InFlightGuard<S: QueueStore + 'static> {
    inner: Arc<EngineInner<S>>,
    record_id: Option<String>,
}

impl<S: QueueStore + 'static> Drop for InFlightGuard<S> {
    fn drop(&mut self) {
        if let Some(id) = &self.record_id {
            self.inner.in_flight.remove(id);
        }
    }
}

/// How many times a failed store write is retried (with `retry_delay`
/// backoff) before the attempt gives up and leaves the record for the next
/// `init`/`recover_once` pass to pick back up.
const PERSIST_RETRY_LIMIT: u32 = 3;

/// Persists `record`, retrying transient store errors with backoff up to
/// `PERSIST_RETRY_LIMIT` times. A non-transient error faults the queue
/// immediately, matching `enqueue`'s fault policy. Returns whether the
/// write ultimately succeeded.
async fn persist<S: QueueStore + 'static>(inner: &Arc<EngineInner<S>>, record: &QueuedMessage) -> bool {
    let mut attempt = 0;
    loop {
        match inner.store.update(record, &inner.cancel).await {
            Ok(()) => return true,
            Err(e) if !e.is_transient() => {
                *inner.state.lock() = QueueState::Faulted;
                warn!(queue = %inner.name, message_id = %record.message.id, error = %e, "store write failed permanently, queue faulted");
                return false;
            }
            Err(e) if attempt < PERSIST_RETRY_LIMIT => {
                attempt += 1;
                warn!(queue = %inner.name, message_id = %record.message.id, attempt, error = %e, "transient store write failure, retrying");
                tokio::select! {
                    _ = tokio::time::sleep(inner.options.retry_delay) => {}
                    _ = inner.cancel.cancelled() => return false,
                }
            }
            Err(e) => {
                warn!(queue = %inner.name, message_id = %record.message.id, error = %e, "store write failed after exhausting retries, leaving for next init");
                return false;
            }
        }
    }
}

async fn run_attempt<S: QueueStore + 'static>(inner: Arc<EngineInner<S>>, mut record: QueuedMessage) {
    let permit = match inner.semaphore.clone().acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };
    inner.pending.fetch_sub(1, Ordering::Relaxed);
    let _guard = InFlightGuard { inner: inner.clone(), record_id: record.record_id.clone() };

    loop {
        if inner.cancel.is_cancelled() {
            return;
        }

        if record.message.is_expired(Utc::now()) {
            record.state = MessageState::Acknowledged;
            record.acknowledged_at = Some(Utc::now());
            persist(&inner, &record).await;
            inner.total_acknowledged.fetch_add(1, Ordering::Relaxed);
            debug!(queue = %inner.name, message_id = %record.message.id, "acknowledged expired message on pickup");
            return;
        }

        record.attempts += 1;
        if !persist(&inner, &record).await {
            return;
        }

        let context = DispatchContext::new(record.principal.clone(), record.message.headers.clone());
        let invocation = tokio::select! {
            result = inner.listener.receive(&record.message, &context) => Some(result),
            _ = inner.cancel.cancelled() => None,
        };

        let Some(listener_result) = invocation else {
            return;
        };

        if let Err(e) = &listener_result {
            warn!(queue = %inner.name, message_id = %record.message.id, attempt = record.attempts, error = %e, "listener raised an error");
        }

        let acknowledged = context.is_acknowledged()
            || (inner.options.auto_acknowledge && listener_result.is_ok());

        if acknowledged {
            record.state = MessageState::Acknowledged;
            record.acknowledged_at = Some(Utc::now());
            persist(&inner, &record).await;
            inner.total_acknowledged.fetch_add(1, Ordering::Relaxed);
            return;
        }

        if record.attempts >= inner.options.max_attempts {
            record.state = MessageState::Abandoned;
            record.abandoned_at = Some(Utc::now());
            persist(&inner, &record).await;
            inner.total_abandoned.fetch_add(1, Ordering::Relaxed);
            info!(queue = %inner.name, message_id = %record.message.id, attempts = record.attempts, "message abandoned after exhausting max_attempts");
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(inner.options.retry_delay) => {}
            _ = inner.cancel.cancelled() => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::AtomicU32;
    use std::time::Duration as StdDuration;
    use tokio::sync::Mutex as AsyncMutex;

    /// A minimal in-memory store: enough to exercise the engine's state
    /// machine without pulling in a real backend.
    #[derive(Default)]
    struct MemoryStore {
        records: AsyncMutex<std::collections::HashMap<String, QueuedMessage>>,
        next_id: AtomicU64,
    }

    #[async_trait]
    impl QueueStore for MemoryStore {
        async fn select_pending(&self, _cancel: &CancellationToken) -> Result<Vec<QueuedMessage>> {
            let records = self.records.lock().await;
            Ok(records.values().filter(|r| !r.is_terminal()).cloned().collect())
        }

        async fn select_dead(&self, from: DateTime<Utc>, to: DateTime<Utc>, _cancel: &CancellationToken) -> Result<Vec<QueuedMessage>> {
            let records = self.records.lock().await;
            Ok(records
                .values()
                .filter(|r| r.abandoned_at.is_some_and(|t| t >= from && t <= to))
                .cloned()
                .collect())
        }

        async fn insert(&self, message: Message, principal: Option<Principal>, _cancel: &CancellationToken) -> Result<QueuedMessage> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst).to_string();
            let record = QueuedMessage {
                record_id: Some(id.clone()),
                queue_name: "test".to_string(),
                message,
                principal,
                state: MessageState::Pending,
                attempts: 0,
                acknowledged_at: None,
                abandoned_at: None,
            };
            self.records.lock().await.insert(id, record.clone());
            Ok(record)
        }

        async fn update(&self, record: &QueuedMessage, _cancel: &CancellationToken) -> Result<()> {
            if let Some(id) = &record.record_id {
                self.records.lock().await.insert(id.clone(), record.clone());
            }
            Ok(())
        }
    }

    struct CountingListener {
        calls: AtomicU32,
        explicit_ack: bool,
        fail: bool,
    }

    #[async_trait]
    impl QueueListener for CountingListener {
        async fn receive(&self, _message: &Message, context: &DispatchContext) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.explicit_ack {
                context.acknowledge();
            }
            if self.fail {
                anyhow::bail!("listener failure");
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn explicit_acknowledgement_stops_redispatch() {
        let store = Arc::new(MemoryStore::default());
        let listener = Arc::new(CountingListener { calls: AtomicU32::new(0), explicit_ack: true, fail: false });
        let engine = QueueEngine::new("q", store, listener.clone(), QueueOptions::default());

        engine.enqueue(Message::new(b"hi".to_vec()), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dead_letters_after_max_attempts() {
        let store = Arc::new(MemoryStore::default());
        let listener = Arc::new(CountingListener { calls: AtomicU32::new(0), explicit_ack: false, fail: true });
        let options = QueueOptions { max_attempts: 1, ..Default::default() };
        let engine = QueueEngine::new("q", store, listener.clone(), options);

        engine.enqueue(Message::new(b"hi".to_vec()), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        let dead = engine
            .select_dead(Utc::now() - chrono::Duration::minutes(1), Utc::now() + chrono::Duration::minutes(1))
            .await
            .unwrap();
        assert_eq!(dead.len(), 1);
    }

    #[tokio::test]
    async fn retries_then_dies_at_exactly_max_attempts() {
        let store = Arc::new(MemoryStore::default());
        let listener = Arc::new(CountingListener { calls: AtomicU32::new(0), explicit_ack: false, fail: true });
        let options = QueueOptions { max_attempts: 2, retry_delay: StdDuration::from_millis(50), ..Default::default() };
        let engine = QueueEngine::new("q", store, listener.clone(), options);

        engine.enqueue(Message::new(b"hi".to_vec()), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(300)).await;

        assert_eq!(listener.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn auto_acknowledge_withheld_on_listener_error() {
        let store = Arc::new(MemoryStore::default());
        let listener = Arc::new(CountingListener { calls: AtomicU32::new(0), explicit_ack: false, fail: true });
        let options = QueueOptions { auto_acknowledge: true, max_attempts: 50, retry_delay: StdDuration::from_secs(60), ..Default::default() };
        let engine = QueueEngine::new("q", store, listener.clone(), options);

        let record = engine.enqueue(Message::new(b"hi".to_vec()), None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
        assert!(record.record_id.is_some());
    }

    #[tokio::test]
    async fn expired_message_is_acknowledged_without_invoking_listener() {
        let store = Arc::new(MemoryStore::default());
        let listener = Arc::new(CountingListener { calls: AtomicU32::new(0), explicit_ack: false, fail: false });
        let engine = QueueEngine::new("q", store, listener.clone(), QueueOptions::default());

        let mut headers = bus_common::Headers::new();
        headers.set_expires(Utc::now() - chrono::Duration::seconds(5));
        let message = Message::with_headers(b"hi".to_vec(), headers);
        engine.enqueue(message, None).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn init_reschedules_a_record_inserted_directly_into_the_store() {
        let store = Arc::new(MemoryStore::default());
        let cancel = CancellationToken::new();
        store.insert(Message::new(b"hi".to_vec()), None, &cancel).await.unwrap();

        let listener = Arc::new(CountingListener { calls: AtomicU32::new(0), explicit_ack: true, fail: false });
        let engine = QueueEngine::new("q", store, listener.clone(), QueueOptions::default());
        engine.init().await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(100)).await;

        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn concurrency_limit_bounds_in_flight_messages() {
        struct SlowListener {
            in_flight: Arc<AtomicU32>,
            max_observed: Arc<AtomicU32>,
        }

        #[async_trait]
        impl QueueListener for SlowListener {
            async fn receive(&self, _message: &Message, context: &DispatchContext) -> anyhow::Result<()> {
                let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                self.max_observed.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(StdDuration::from_millis(50)).await;
                self.in_flight.fetch_sub(1, Ordering::SeqCst);
                context.acknowledge();
                Ok(())
            }
        }

        let store = Arc::new(MemoryStore::default());
        let in_flight = Arc::new(AtomicU32::new(0));
        let max_observed = Arc::new(AtomicU32::new(0));
        let listener = Arc::new(SlowListener { in_flight: in_flight.clone(), max_observed: max_observed.clone() });
        let options = QueueOptions { concurrency_limit: 2, ..Default::default() };
        let engine = QueueEngine::new("q", store, listener, options);

        for _ in 0..6 {
            engine.enqueue(Message::new(b"hi".to_vec()), None).await.unwrap();
        }
        tokio::time::sleep(StdDuration::from_millis(400)).await;

        assert!(max_observed.load(Ordering::SeqCst) <= 2);
    }
}
