//! Background sync triggers.
//!
//! # Responsibilities
//! - Follow configuration changes written by other surfaces
//! - Periodically check the backend for drift
//!
//! Both feed the sync queue; neither touches the backend directly.

use std::time::Duration;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::RetryConfig;
use crate::engine::{JobOutcome, SyncError, SyncHandle};
use crate::resilience::backoff::retry_delay;
use crate::store::ExternalChanges;

/// Applies configurations written by other surfaces.
pub struct ChangeFollower {
    changes: ExternalChanges,
    sync: SyncHandle,
    retries: RetryConfig,
}

impl ChangeFollower {
    pub fn new(changes: ExternalChanges, sync: SyncHandle, retries: RetryConfig) -> Self {
        Self {
            changes,
            sync,
            retries,
        }
    }

    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Change follower starting");
        loop {
            tokio::select! {
                changed = self.changes.next() => match changed {
                    Some(config) => {
                        tracing::debug!(status = ?config.status(), "Following external configuration");
                    }
                    None => {
                        tracing::info!("Store change stream closed, follower exiting");
                        break;
                    }
                },
                _ = shutdown.recv() => {
                    tracing::info!("Change follower received shutdown signal, exiting loop");
                    break;
                }
            }

            if let Err(e) = apply_with_retry(&self.sync, &self.retries).await {
                tracing::error!(error = %e, "Giving up on externally changed configuration");
            }
        }
    }
}

/// Apply the current configuration, retrying retryable failures with backoff.
///
/// Every attempt installs whatever is current when it runs.
pub async fn apply_with_retry(sync: &SyncHandle, retries: &RetryConfig) -> Result<JobOutcome, SyncError> {
    let mut attempt = 0;
    loop {
        match sync.apply().await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if retries.enabled && e.is_retryable() && attempt < retries.max_attempts => {
                attempt += 1;
                let delay = retry_delay(retries, attempt);
                tracing::warn!(error = %e, attempt, delay_ms = delay.as_millis() as u64, "Sync failed, retrying");
                time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Periodic drift check against the working copy.
pub struct Reconciler {
    sync: SyncHandle,
    interval: Duration,
}

impl Reconciler {
    pub fn new(sync: SyncHandle, interval: Duration) -> Self {
        Self { sync, interval }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            tracing::info!("Periodic reconcile disabled");
            return;
        }

        tracing::info!(interval_secs = self.interval.as_secs(), "Reconciler starting");

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        // First tick completes immediately; startup already ran a full pass.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match self.sync.reconcile().await {
                        Ok(JobOutcome::Synced(report)) => {
                            tracing::info!(state = ?report.state, "Reconcile repaired backend drift");
                        }
                        Ok(_) => {}
                        Err(e) => tracing::warn!(error = %e, "Reconcile failed"),
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Reconciler received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}
