//! Rule synchronization state machine.
//!
//! # States
//! - Empty: no rule installed
//! - Installed(id): exactly one compiled rule installed
//!
//! # State Transitions
//! ```text
//! any → Empty:          config inactive; every installed id removed in one call
//! any → Installed(new): config active; one atomic replace removes every
//!                       installed id and adds the new rule
//! failure:              state unchanged, error returned to the caller
//! ```
//!
//! Backend state is read before every mutation. The backend outlives this
//! process and may hold stray rules from an earlier run, so each pass
//! reconciles backend reality with the desired configuration.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

use crate::engine::backend::{BackendError, TrafficBackend};
use crate::engine::ids::RuleIdGenerator;
use crate::observability::metrics;
use crate::resilience::timeouts::{with_deadline, DeadlineError};
use crate::rules::{compile, CompiledRule, HeaderConfig, RuleId, SyncStatus};
use crate::status::StatusFanout;

/// Errors from a synchronization pass.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyncError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("backend call timed out after {0:?}")]
    Timeout(Duration),

    #[error("no unused rule id found after {0} attempts")]
    IdSpaceExhausted(u32),

    #[error("sync worker is not running")]
    WorkerStopped,
}

impl SyncError {
    /// True if a later attempt may succeed without any change in input.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Backend(BackendError::Rejected(_)) => false,
            SyncError::WorkerStopped => false,
            _ => true,
        }
    }

    /// Short label for metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            SyncError::Backend(BackendError::Unavailable(_)) => "unavailable",
            SyncError::Backend(BackendError::IdInUse(_)) => "id_in_use",
            SyncError::Backend(BackendError::Rejected(_)) => "rejected",
            SyncError::Timeout(_) => "timeout",
            SyncError::IdSpaceExhausted(_) => "id_exhausted",
            SyncError::WorkerStopped => "worker_stopped",
        }
    }
}

impl From<DeadlineError<BackendError>> for SyncError {
    fn from(err: DeadlineError<BackendError>) -> Self {
        match err {
            DeadlineError::Elapsed(limit) => SyncError::Timeout(limit),
            DeadlineError::Inner(e) => SyncError::Backend(e),
        }
    }
}

/// The engine's single slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Installed(RuleId),
}

/// Result of a successful pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub state: SlotState,
    pub status: SyncStatus,
    /// Rule ids removed from the backend by this pass.
    pub removed: usize,
    /// Observers the status reached.
    pub notified: usize,
}

/// Engine tuning.
#[derive(Debug, Clone)]
pub struct SyncSettings {
    /// Upper bound for each backend call.
    pub backend_timeout: Duration,
    /// Fresh ids tried before giving up on a pass.
    pub max_id_attempts: u32,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            backend_timeout: Duration::from_secs(5),
            max_id_attempts: 8,
        }
    }
}

/// Converts configuration snapshots into installed backend rules.
///
/// Owns the identity of the installed rule. Not shareable: drive it from a
/// single task (see [`SyncWorker`](crate::engine::worker::SyncWorker)).
pub struct SyncEngine {
    backend: Arc<dyn TrafficBackend>,
    fanout: StatusFanout,
    ids: RuleIdGenerator,
    settings: SyncSettings,
    installed: Option<CompiledRule>,
}

impl SyncEngine {
    pub fn new(backend: Arc<dyn TrafficBackend>, fanout: StatusFanout, settings: SyncSettings) -> Self {
        Self {
            backend,
            fanout,
            ids: RuleIdGenerator::new(),
            settings,
            installed: None,
        }
    }

    /// Replace the id source (deterministic ids in tests).
    pub fn with_id_generator(mut self, ids: RuleIdGenerator) -> Self {
        self.ids = ids;
        self
    }

    pub fn state(&self) -> SlotState {
        match &self.installed {
            Some(rule) => SlotState::Installed(rule.id),
            None => SlotState::Empty,
        }
    }

    /// The rule this engine last installed.
    pub fn installed_rule(&self) -> Option<&CompiledRule> {
        self.installed.as_ref()
    }

    /// Make the backend reflect `config`.
    pub async fn synchronize(&mut self, config: &HeaderConfig) -> Result<SyncReport, SyncError> {
        let started = Instant::now();
        let result = self.swap(config).await;
        match &result {
            Ok(report) => {
                let outcome = match report.state {
                    SlotState::Empty => "cleared",
                    SlotState::Installed(_) => "installed",
                };
                tracing::info!(
                    state = ?report.state,
                    rule_count = report.status.rule_count,
                    removed = report.removed,
                    notified = report.notified,
                    "Rules synchronized"
                );
                metrics::record_sync_pass(outcome, started);
                metrics::record_installed_headers(report.status.rule_count);
            }
            Err(e) => {
                tracing::error!(error = %e, state = ?self.state(), "Rule synchronization failed");
                metrics::record_sync_failure(e.reason());
                metrics::record_sync_pass("failed", started);
            }
        }
        result
    }

    async fn swap(&mut self, config: &HeaderConfig) -> Result<SyncReport, SyncError> {
        let installed_ids = self.list_installed().await?;

        let Some(template) = compile(config, RuleId(0)) else {
            if !installed_ids.is_empty() {
                self.replace(&installed_ids, Vec::new()).await?;
            }
            self.installed = None;
            return Ok(self.finish(config, installed_ids.len()));
        };

        let mut taken = installed_ids.clone();
        for attempt in 1..=self.settings.max_id_attempts {
            let Some(id) = self.ids.next_id(&taken) else {
                break;
            };
            let rule = CompiledRule { id, ..template.clone() };

            match self.replace(&installed_ids, vec![rule.clone()]).await {
                Ok(()) => {
                    self.installed = Some(rule);
                    return Ok(self.finish(config, installed_ids.len()));
                }
                Err(SyncError::Backend(BackendError::IdInUse(used))) => {
                    tracing::debug!(rule_id = %used, attempt, "Rule id collision, retrying with a new id");
                    metrics::record_id_collision();
                    taken.insert(used);
                    taken.insert(id);
                }
                Err(e) => return Err(e),
            }
        }

        Err(SyncError::IdSpaceExhausted(self.settings.max_id_attempts))
    }

    /// Remove every installed rule regardless of configuration.
    ///
    /// Returns how many ids were removed.
    pub async fn clear_all(&mut self) -> Result<usize, SyncError> {
        let result = async {
            let installed_ids = self.list_installed().await?;
            if !installed_ids.is_empty() {
                self.replace(&installed_ids, Vec::new()).await?;
            }
            Ok::<_, SyncError>(installed_ids.len())
        }
        .await;

        match result {
            Ok(removed) => {
                self.installed = None;
                tracing::info!(removed, "Cleared all rules");
                metrics::record_installed_headers(0);
                Ok(removed)
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to clear rules");
                metrics::record_sync_failure(e.reason());
                Err(e)
            }
        }
    }

    /// Run a pass only if the backend has drifted from what `config` needs.
    ///
    /// Returns `None` when the backend already matches.
    pub async fn reconcile(&mut self, config: &HeaderConfig) -> Result<Option<SyncReport>, SyncError> {
        let installed_ids = self.list_installed().await?;

        let consistent = match (&self.installed, compile(config, RuleId(0))) {
            (None, None) => installed_ids.is_empty(),
            (Some(current), Some(wanted)) => {
                let wanted = CompiledRule { id: current.id, ..wanted };
                wanted == *current
                    && installed_ids.len() == 1
                    && installed_ids.contains(&current.id)
            }
            _ => false,
        };

        if consistent {
            tracing::debug!(state = ?self.state(), "Backend matches configuration");
            return Ok(None);
        }

        tracing::info!(
            state = ?self.state(),
            backend_rules = installed_ids.len(),
            "Backend drifted from configuration, resynchronizing"
        );
        self.synchronize(config).await.map(Some)
    }

    fn finish(&self, config: &HeaderConfig, removed: usize) -> SyncReport {
        let status = config.status();
        let notified = self.fanout.notify(status.clone());
        SyncReport {
            state: self.state(),
            status,
            removed,
            notified,
        }
    }

    async fn list_installed(&self) -> Result<BTreeSet<RuleId>, SyncError> {
        let ids = with_deadline(self.settings.backend_timeout, self.backend.list_installed_rule_ids()).await?;
        Ok(ids)
    }

    async fn replace(&self, remove: &BTreeSet<RuleId>, add: Vec<CompiledRule>) -> Result<(), SyncError> {
        with_deadline(self.settings.backend_timeout, self.backend.atomic_replace(remove, add)).await?;
        Ok(())
    }
}
