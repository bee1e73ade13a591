use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::clock::Clock;
use super::repository::{NotificationRepository, RepositoryError};

/// Periodically removes notifications whose retention window has passed.
///
/// Reads already hide expired rows, so the reaper only reclaims storage.
pub struct ExpiryReaper {
    repository: Arc<dyn NotificationRepository>,
    clock: Arc<dyn Clock>,
    interval: Duration,
}

impl ExpiryReaper {
    pub fn new(
        repository: Arc<dyn NotificationRepository>,
        clock: Arc<dyn Clock>,
        interval: Duration,
    ) -> Self {
        Self {
            repository,
            clock,
            interval,
        }
    }

    /// One pass. Returns the number of rows deleted.
    pub fn sweep(&self) -> Result<usize, RepositoryError> {
        let now = self.clock.now();
        let removed = self.repository.delete_expired(now)?;
        if removed > 0 {
            info!(removed, at = %now, "expired notifications reaped");
        } else {
            debug!(at = %now, "reaper pass found nothing to remove");
        }
        Ok(removed)
    }

    /// Run `sweep` on the configured interval until the handle is shut down.
    ///
    /// A failed pass is logged and retried on the next tick.
    pub fn spawn(self: Arc<Self>) -> ReaperHandle {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let interval = self.interval;

        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(err) = self.sweep() {
                            warn!(error = %err, "reaper pass failed");
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            debug!("reaper stopped");
                            break;
                        }
                    }
                }
            }
        });

        info!(interval_secs = interval.as_secs(), "expiry reaper started");
        ReaperHandle { shutdown_tx, task }
    }
}

/// Owner of a running reaper loop.
pub struct ReaperHandle {
    shutdown_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl ReaperHandle {
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        if let Err(err) = self.task.await {
            warn!(error = %err, "reaper task ended abnormally");
        }
    }
}
