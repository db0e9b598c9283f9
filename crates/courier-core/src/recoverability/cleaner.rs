//! Periodic clearing of in-memory failure counters.
//!
//! Counters for messages that stop arriving (consumed by another instance,
//! purged, expired) would otherwise stay in memory forever.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Failure storage that can be wiped in one go.
pub trait ClearFailures: Send + Sync {
    fn clear_failures(&self);
}

/// Clears every registered failure storage on a fixed interval.
pub struct FailureStorageCleaner {
    interval: Duration,
    storages: Vec<Arc<dyn ClearFailures>>,
}

impl FailureStorageCleaner {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            storages: Vec::new(),
        }
    }

    pub fn register(&mut self, storage: Arc<dyn ClearFailures>) -> &mut Self {
        self.storages.push(storage);
        self
    }

    /// Spawn the cleaning loop. The first clear happens one interval from now.
    pub fn start(self) -> CleanerHandle {
        let cancel = CancellationToken::new();
        let token = cancel.clone();
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval_at(Instant::now() + self.interval, self.interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        for storage in &self.storages {
                            storage.clear_failures();
                        }
                        debug!(storages = self.storages.len(), "cleared failure counters");
                    }
                }
            }
        });
        CleanerHandle { cancel, task }
    }
}

/// Running cleaner; stopping waits for the loop to exit.
pub struct CleanerHandle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl CleanerHandle {
    pub async fn stop(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            warn!(error = %e, "failure storage cleaner ended abnormally");
        }
    }
}

impl std::fmt::Debug for FailureStorageCleaner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FailureStorageCleaner")
            .field("interval", &self.interval)
            .field("storages", &self.storages.len())
            .finish()
    }
}
