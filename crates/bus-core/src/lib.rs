//! Composition root: the queueing service registry (C5) and dispatcher
//! glue (C9) binding `bus-queue`, `bus-journal`, and `bus-subscriptions`
//! behind the programmatic surface a transport host calls into.

mod registry;

pub mod dispatcher;
pub mod error;
pub mod service;

pub use dispatcher::{on_inbound, on_outbound, publish, subscribe, InboundRouter, OutboundSender, PublishOutcome};
pub use error::{BusError, Result};
pub use service::{QueueHandle, QueueingService};
