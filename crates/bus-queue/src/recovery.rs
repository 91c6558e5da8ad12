//! Background crash-recovery task: periodically re-scans a queue's pending
//! records as a complement to `QueueEngine::init`'s one-shot load.

use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::engine::QueueEngine;
use crate::store::QueueStore;

#[derive(Debug, Clone)]
pub struct RecoveryConfig {
    /// How often to re-scan for missed pending records. Default: 60s.
    pub check_interval: Duration,
    pub enabled: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        RecoveryConfig { check_interval: Duration::from_secs(60), enabled: true }
    }
}

/// Runs `QueueEngine::recover_once` on an interval until `cancel` fires.
pub struct RecoveryTask<S: QueueStore + 'static> {
    engine: QueueEngine<S>,
    config: RecoveryConfig,
    cancel: CancellationToken,
}

impl<S: QueueStore + 'static> RecoveryTask<S> {
    pub fn new(engine: QueueEngine<S>, config: RecoveryConfig, cancel: CancellationToken) -> Self {
        RecoveryTask { engine, config, cancel }
    }

    pub async fn run(self: Arc<Self>) {
        if !self.config.enabled {
            info!(queue = %self.engine.name(), "queue recovery task is disabled");
            return;
        }

        info!(queue = %self.engine.name(), interval = ?self.config.check_interval, "starting queue recovery task");
        let mut ticker = interval(self.config.check_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => self.recover_once().await,
                _ = self.cancel.cancelled() => return,
            }
        }
    }

    async fn recover_once(&self) {
        debug!(queue = %self.engine.name(), "checking for missed pending messages");
        match self.engine.recover_once().await {
            Ok(count) if count > 0 => {
                info!(queue = %self.engine.name(), count, "recovered pending messages missed by init");
            }
            Ok(_) => {}
            Err(e) => {
                error!(queue = %self.engine.name(), error = %e, "failed to recover pending messages");
            }
        }
    }
}
