//! Durable queue store contract (C3) and the backend-neutral queue engine
//! (C4): ownership of a single named queue, bounded-concurrency dispatch,
//! retry, dead-letter, and crash recovery.

pub mod backends;
pub mod engine;
pub mod error;
pub mod model;
pub mod recovery;
pub mod store;

pub use engine::QueueEngine;
pub use error::{QueueError, Result};
pub use model::{MessageState, QueueMetrics, QueueOptions, QueuedMessage};
pub use store::{DispatchContext, QueueListener, QueueStore};
