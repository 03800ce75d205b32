//! Serialized sync pipeline.
//!
//! # Data Flow
//! ```text
//! message API ─┐
//! store change ├─→ SyncHandle ─→ mpsc queue ─→ SyncWorker (owns SyncEngine)
//! startup      │                                  → drain queue
//! reconcile ───┘                                  → coalesce batch
//!                                                 → read ConfigSource, run pass
//!                                                 → reply to every waiter
//! ```
//!
//! # Design Decisions
//! - At most one pass in flight
//! - Jobs carry no configuration; each pass reads the current one when it
//!   starts, so a job queued or retried late never installs an older state
//! - Consecutive config jobs in a batch collapse into one; an apply absorbs
//!   a reconcile
//! - Clear jobs keep their position relative to config jobs
//! - Every waiter of a collapsed job gets the outcome of the pass that ran

use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};

use crate::engine::sync::{SyncEngine, SyncError, SyncReport};
use crate::rules::HeaderConfig;

/// Where the worker reads the configuration to install.
pub trait ConfigSource: Send + Sync {
    fn current(&self) -> HeaderConfig;
}

/// Work accepted by the sync worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncJob {
    /// Run a full pass for the current configuration.
    Apply,
    /// Run a pass only if the backend drifted from the current configuration.
    Reconcile,
    /// Remove every installed rule.
    ClearAll,
}

impl SyncJob {
    fn kind(&self) -> &'static str {
        match self {
            SyncJob::Apply => "apply",
            SyncJob::Reconcile => "reconcile",
            SyncJob::ClearAll => "clear_all",
        }
    }

    /// Collapse `self` followed by `next` into one job, if they are compatible.
    fn merge(&self, next: &SyncJob) -> Option<SyncJob> {
        match (self, next) {
            (SyncJob::ClearAll, SyncJob::ClearAll) => Some(SyncJob::ClearAll),
            (SyncJob::Reconcile, SyncJob::Reconcile) => Some(SyncJob::Reconcile),
            (SyncJob::Apply | SyncJob::Reconcile, SyncJob::Apply)
            | (SyncJob::Apply, SyncJob::Reconcile) => Some(SyncJob::Apply),
            _ => None,
        }
    }
}

/// Outcome of a job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// A pass ran.
    Synced(SyncReport),
    /// Reconcile found nothing to do.
    Unchanged,
    /// Clear removed this many rule ids.
    Cleared(usize),
}

type Reply = oneshot::Sender<Result<JobOutcome, SyncError>>;

struct Envelope {
    job: SyncJob,
    reply: Reply,
}

struct Pending {
    job: SyncJob,
    waiters: Vec<Reply>,
}

/// Cloneable entry point into the sync queue.
#[derive(Clone)]
pub struct SyncHandle {
    tx: mpsc::Sender<Envelope>,
}

impl SyncHandle {
    /// Run a job and wait for its outcome.
    pub async fn run(&self, job: SyncJob) -> Result<JobOutcome, SyncError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(Envelope { job, reply })
            .await
            .map_err(|_| SyncError::WorkerStopped)?;
        rx.await.map_err(|_| SyncError::WorkerStopped)?
    }

    /// Install the current configuration.
    pub async fn apply(&self) -> Result<JobOutcome, SyncError> {
        self.run(SyncJob::Apply).await
    }

    pub async fn clear_all(&self) -> Result<JobOutcome, SyncError> {
        self.run(SyncJob::ClearAll).await
    }

    pub async fn reconcile(&self) -> Result<JobOutcome, SyncError> {
        self.run(SyncJob::Reconcile).await
    }

    /// True once the worker has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Single consumer of the sync queue.
pub struct SyncWorker {
    engine: SyncEngine,
    source: Arc<dyn ConfigSource>,
    rx: mpsc::Receiver<Envelope>,
}

impl SyncWorker {
    /// Create a worker and the handle feeding it.
    pub fn new(
        engine: SyncEngine,
        source: Arc<dyn ConfigSource>,
        capacity: usize,
    ) -> (Self, SyncHandle) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { engine, source, rx }, SyncHandle { tx })
    }

    /// Process jobs until every handle is dropped or shutdown fires.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        tracing::info!("Sync worker starting");
        loop {
            tokio::select! {
                received = self.rx.recv() => {
                    let Some(first) = received else {
                        tracing::info!("All sync handles dropped, worker exiting");
                        break;
                    };
                    let mut batch = vec![first];
                    while let Ok(next) = self.rx.try_recv() {
                        batch.push(next);
                    }
                    self.process(batch).await;
                }
                _ = shutdown.recv() => {
                    tracing::info!("Sync worker received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }

    async fn process(&mut self, batch: Vec<Envelope>) {
        let received = batch.len();
        let pending = coalesce(batch);
        if pending.len() < received {
            tracing::debug!(received, running = pending.len(), "Coalesced queued sync jobs");
        }

        for Pending { job, waiters } in pending {
            tracing::debug!(job = job.kind(), waiters = waiters.len(), "Running sync job");
            let result = self.execute(job).await;
            for waiter in waiters {
                let _ = waiter.send(result.clone());
            }
        }
    }

    async fn execute(&mut self, job: SyncJob) -> Result<JobOutcome, SyncError> {
        match job {
            SyncJob::Apply => {
                let config = self.source.current();
                self.engine.synchronize(&config).await.map(JobOutcome::Synced)
            }
            SyncJob::Reconcile => Ok(match self.engine.reconcile(&self.source.current()).await? {
                Some(report) => JobOutcome::Synced(report),
                None => JobOutcome::Unchanged,
            }),
            SyncJob::ClearAll => self.engine.clear_all().await.map(JobOutcome::Cleared),
        }
    }
}

fn coalesce(batch: Vec<Envelope>) -> Vec<Pending> {
    let mut pending: Vec<Pending> = Vec::new();
    for Envelope { job, reply } in batch {
        if let Some(last) = pending.last_mut() {
            if let Some(merged) = last.job.merge(&job) {
                last.job = merged;
                last.waiters.push(reply);
                continue;
            }
        }
        pending.push(Pending {
            job,
            waiters: vec![reply],
        });
    }
    pending
}

impl JobOutcome {
    /// The pass report, when a pass ran.
    pub fn report(&self) -> Option<&SyncReport> {
        match self {
            JobOutcome::Synced(report) => Some(report),
            _ => None,
        }
    }
}
