//! Startup orchestration.
//!
//! # Responsibilities
//! - Open storage and build every subsystem in dependency order
//! - Start the sync worker, reading from the config store, before anything
//!   can enqueue
//! - Bootstrap: clear stray rules, load state, run the first pass
//! - Start background triggers
//!
//! # Design Decisions
//! - Only storage errors are fatal; a failed first pass leaves the service
//!   running with no headers applied until the next successful pass

use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;

use crate::api::{AppState, HeaderService};
use crate::config::{ServiceConfig, StorageConfig, StorageKind};
use crate::engine::{InMemoryRuleTable, SyncEngine, SyncHandle, SyncWorker, TrafficBackend};
use crate::lifecycle::Shutdown;
use crate::rules::HeaderConfig;
use crate::status::StatusFanout;
use crate::store::{ConfigStore, FileKvStore, KvStore, MemoryKvStore, ProfileStore, StoreError};
use crate::triggers::{ChangeFollower, Reconciler};

/// How long background tasks get to finish after shutdown.
const TASK_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("failed to open storage: {0}")]
    Storage(#[from] StoreError),

    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },
}

/// Open the configured key-value store.
pub fn open_storage(config: &StorageConfig) -> Result<Arc<dyn KvStore>, StoreError> {
    match config.kind {
        StorageKind::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on exit");
            Ok(Arc::new(MemoryKvStore::new()))
        }
        StorageKind::File => {
            let store = FileKvStore::open(&config.path)?;
            let store = if config.watch {
                store.watch(Duration::from_millis(config.poll_interval_ms))?
            } else {
                store
            };
            Ok(Arc::new(store))
        }
    }
}

/// The assembled, running service.
pub struct HeaderSync {
    pub config_store: Arc<ConfigStore>,
    pub profiles: Arc<ProfileStore>,
    pub table: Arc<InMemoryRuleTable>,
    pub fanout: StatusFanout,
    pub sync: SyncHandle,
    pub service: Arc<HeaderService>,
    api_key: Option<Arc<str>>,
    tasks: Vec<JoinHandle<()>>,
}

impl HeaderSync {
    /// Start with the in-process rule table as traffic backend.
    pub async fn start(config: &ServiceConfig, kv: Arc<dyn KvStore>, shutdown: &Shutdown) -> Self {
        let table = Arc::new(InMemoryRuleTable::with_max_rules(config.sync.max_rules));
        Self::start_with_backend(config, kv, table.clone(), table, shutdown).await
    }

    /// Start with `backend` in front of `table`.
    pub async fn start_with_backend(
        config: &ServiceConfig,
        kv: Arc<dyn KvStore>,
        backend: Arc<dyn TrafficBackend>,
        table: Arc<InMemoryRuleTable>,
        shutdown: &Shutdown,
    ) -> Self {
        let config_store = Arc::new(ConfigStore::new(kv.clone(), config.storage.key.clone()));
        let profiles = Arc::new(ProfileStore::new(kv, config.storage.profiles_key.clone()));
        let changes = config_store.external_changes();

        let fanout = StatusFanout::new();
        let engine = SyncEngine::new(backend, fanout.clone(), config.sync.settings());
        let (worker, sync) = SyncWorker::new(engine, config_store.clone(), config.sync.queue_capacity);

        let mut tasks = Vec::new();
        tasks.push(tokio::spawn(worker.run(shutdown.subscribe())));

        bootstrap(&config_store, &profiles, &sync).await;

        let follower = ChangeFollower::new(changes, sync.clone(), config.retries.clone());
        tasks.push(tokio::spawn(follower.run(shutdown.subscribe())));

        let reconciler = Reconciler::new(
            sync.clone(),
            Duration::from_secs(config.sync.reconcile_interval_secs),
        );
        tasks.push(tokio::spawn(reconciler.run(shutdown.subscribe())));

        let service = Arc::new(HeaderService::new(
            config_store.clone(),
            profiles.clone(),
            sync.clone(),
        ));

        Self {
            config_store,
            profiles,
            table,
            fanout,
            sync,
            service,
            api_key: config.api.api_key.as_deref().map(Arc::from),
            tasks,
        }
    }

    /// State for the API router.
    pub fn app_state(&self) -> AppState {
        AppState {
            service: self.service.clone(),
            table: self.table.clone(),
            fanout: self.fanout.clone(),
            api_key: self.api_key.clone(),
        }
    }

    /// Wait for background tasks after shutdown was triggered.
    pub async fn join(self) {
        for task in self.tasks {
            match tokio::time::timeout(TASK_DRAIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::error!(error = %e, "Background task failed"),
                Err(_) => tracing::warn!("Background task did not stop in time"),
            }
        }
    }
}

/// Clear stray rules, load persisted state, and run the first pass.
pub async fn bootstrap(store: &ConfigStore, profiles: &ProfileStore, sync: &SyncHandle) -> HeaderConfig {
    match sync.clear_all().await {
        Ok(outcome) => tracing::info!(outcome = ?outcome, "Cleared rules left by earlier runs"),
        Err(e) => tracing::error!(error = %e, "Failed to clear rules at startup"),
    }

    profiles.load().await;
    let config = store.load().await;

    match sync.apply().await {
        Ok(_) => tracing::info!(status = ?config.status(), "Initial sync complete"),
        Err(e) => tracing::error!(error = %e, "Initial sync failed; headers not applied"),
    }
    config
}
