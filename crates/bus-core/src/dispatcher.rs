//! Dispatcher glue (C9): wires inbound transport to the queueing service,
//! and wires publish to subscription tracking + enqueue. No transport code
//! lives here — a host's transport adapter implements `InboundRouter`/
//! `OutboundSender` and hands this module already-deserialized messages.

use std::sync::Arc;

use async_trait::async_trait;
use bus_common::{Message, Principal};
use bus_journal::JournalStore;
use bus_subscriptions::SubscriptionStore;
use chrono::Duration;
use tracing::{debug, warn};

use crate::error::{BusError, Result};
use crate::service::QueueingService;

/// Resolves which queue an inbound message should land on. A host's
/// transport adapter (HTTP server, broker consumer) implements this to
/// express its own routing policy (e.g. `Destination` header -> queue name).
pub trait InboundRouter: Send + Sync {
    fn route(&self, message: &Message) -> String;
}

/// Delivers a message to a remote bus over whatever transport a host wires
/// up (HTTP client, broker producer). `publish` calls this once per live
/// subscriber.
#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send(&self, subscriber: &str, message: &Message) -> anyhow::Result<()>;
}

/// `Transport -> Dispatcher -> Queueing.enqueue(queue, msg, principal)`,
/// journaling the message as `Received` first.
pub async fn on_inbound<J: JournalStore>(
    journal: &bus_journal::JournalingService<J>,
    queueing: &QueueingService,
    router: &dyn InboundRouter,
    message: Message,
    principal: Option<Principal>,
) -> Result<()> {
    journal.journal_received(message.clone()).await?;
    let queue = router.route(&message);
    debug!(queue = %queue, message_id = %message.id, "routing inbound message");
    queueing.enqueue(&queue, message, principal).await?;
    Ok(())
}

/// `Dispatcher -> Transport`: a direct, single-destination outbound send
/// (as opposed to `publish`'s topic fan-out), journaled as `Sent` before
/// handing off to the transport.
pub async fn on_outbound<J: JournalStore>(
    journal: &bus_journal::JournalingService<J>,
    sender: &dyn OutboundSender,
    destination: &str,
    message: Message,
) -> Result<()> {
    journal.journal_sent(message.clone()).await?;
    debug!(destination = %destination, message_id = %message.id, "sending outbound message");
    sender.send(destination, &message).await.map_err(|e| BusError::Transport(e.to_string()))?;
    Ok(())
}

/// `Publish(topic, msg) -> Journal(Published) -> ListSubscribers(topic) ->`
/// for each subscriber, outbound send. A send failure for one subscriber
/// does not stop delivery to the others; failures are logged and returned
/// as a tally rather than aborting the publish.
pub async fn publish<J: JournalStore, Sub: SubscriptionStore>(
    journal: &bus_journal::JournalingService<J>,
    subscriptions: &Sub,
    sender: &dyn OutboundSender,
    topic: impl Into<String>,
    message: Message,
) -> Result<PublishOutcome> {
    let topic = topic.into();
    journal.journal_published(topic.clone(), message.clone()).await?;

    let subscribers = subscriptions.get_subscribers(&topic, chrono::Utc::now()).await?;
    let mut delivered = Vec::new();
    let mut failed = Vec::new();

    for subscriber in subscribers {
        match sender.send(&subscriber, &message).await {
            Ok(()) => delivered.push(subscriber),
            Err(e) => {
                warn!(topic = %topic, subscriber = %subscriber, error = %e, "failed to deliver published message");
                failed.push(subscriber);
            }
        }
    }

    Ok(PublishOutcome { delivered, failed })
}

/// Subscribes `subscriber` to `topic`, optionally expiring after `ttl`.
pub async fn subscribe<Sub: SubscriptionStore>(
    subscriptions: &Arc<Sub>,
    topic: &str,
    subscriber: &str,
    ttl: Option<Duration>,
) -> Result<()> {
    subscriptions.subscribe(topic, subscriber, ttl).await?;
    Ok(())
}

#[derive(Debug, Clone, Default)]
pub struct PublishOutcome {
    pub delivered: Vec<String>,
    pub failed: Vec<String>,
}
