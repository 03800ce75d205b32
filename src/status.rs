//! Status fan-out to observing surfaces.
//!
//! # Responsibilities
//! - Keep a registry of observers (open panels, WebSocket clients)
//! - Deliver each status to every observer without blocking
//!
//! # Design Decisions
//! - Best-effort: closed observers are pruned, full ones skipped
//! - No ordering between observers, no retry
//! - A subscription unregisters itself when dropped

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::observability::metrics;
use crate::rules::SyncStatus;

/// Buffered statuses per observer before deliveries are skipped.
pub const OBSERVER_BUFFER: usize = 16;

/// Registry of status observers.
#[derive(Clone, Default)]
pub struct StatusFanout {
    observers: Arc<DashMap<Uuid, mpsc::Sender<SyncStatus>>>,
}

impl StatusFanout {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new observer.
    pub fn subscribe(&self) -> StatusSubscription {
        let (tx, rx) = mpsc::channel(OBSERVER_BUFFER);
        let id = Uuid::new_v4();
        self.observers.insert(id, tx);
        tracing::debug!(observer = %id, "Status observer registered");
        StatusSubscription {
            id,
            rx,
            observers: self.observers.clone(),
        }
    }

    pub fn observer_count(&self) -> usize {
        self.observers.len()
    }

    /// Deliver `status` to every reachable observer.
    ///
    /// Returns how many observers received it.
    pub fn notify(&self, status: SyncStatus) -> usize {
        let mut delivered = 0;
        let mut closed = Vec::new();

        for entry in self.observers.iter() {
            match entry.value().try_send(status.clone()) {
                Ok(()) => delivered += 1,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::debug!(observer = %entry.key(), "Observer lagging, skipping status");
                }
                Err(mpsc::error::TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }

        for id in closed {
            self.observers.remove(&id);
            tracing::debug!(observer = %id, "Pruned closed status observer");
        }

        metrics::record_notifications(delivered);
        delivered
    }
}

/// Receiving end of one observer registration.
pub struct StatusSubscription {
    id: Uuid,
    rx: mpsc::Receiver<SyncStatus>,
    observers: Arc<DashMap<Uuid, mpsc::Sender<SyncStatus>>>,
}

impl StatusSubscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Wait for the next status. `None` once unregistered.
    pub async fn recv(&mut self) -> Option<SyncStatus> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<SyncStatus> {
        self.rx.try_recv().ok()
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.observers.remove(&self.id);
    }
}
