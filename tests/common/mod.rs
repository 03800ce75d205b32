//! Shared utilities for integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use header_sync::config::{ServiceConfig, StorageKind};
use header_sync::engine::{BackendError, InMemoryRuleTable, TrafficBackend};
use header_sync::lifecycle::{HeaderSync, Shutdown};
use header_sync::rules::{compile, CompiledRule, HeaderConfig, HeaderEntry, RuleId, ALL_URLS};
use header_sync::store::{KvStore, MemoryKvStore};
use std::collections::BTreeSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;

/// Rule table wrapper with programmable failures.
pub struct FaultyBackend {
    pub table: Arc<InMemoryRuleTable>,
    /// Every call fails with `Unavailable` while set.
    pub unavailable: AtomicBool,
    /// Number of upcoming replace calls that fail with `Unavailable`.
    pub fail_next_replaces: AtomicU32,
    /// Number of upcoming replace calls answered with `IdInUse`.
    pub collide_next_replaces: AtomicU32,
    /// Delay before every call, in milliseconds.
    pub delay_ms: AtomicU64,
    pub replace_calls: AtomicU32,
    pub list_calls: AtomicU32,
}

impl FaultyBackend {
    pub fn new(table: Arc<InMemoryRuleTable>) -> Arc<Self> {
        Arc::new(Self {
            table,
            unavailable: AtomicBool::new(false),
            fail_next_replaces: AtomicU32::new(0),
            collide_next_replaces: AtomicU32::new(0),
            delay_ms: AtomicU64::new(0),
            replace_calls: AtomicU32::new(0),
            list_calls: AtomicU32::new(0),
        })
    }

    async fn before_call(&self) -> Result<(), BackendError> {
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(BackendError::Unavailable("injected outage".into()));
        }
        Ok(())
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl TrafficBackend for FaultyBackend {
    async fn list_installed_rule_ids(&self) -> Result<BTreeSet<RuleId>, BackendError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        self.table.list_installed_rule_ids().await
    }

    async fn atomic_replace(
        &self,
        remove_ids: &BTreeSet<RuleId>,
        add_rules: Vec<CompiledRule>,
    ) -> Result<(), BackendError> {
        self.replace_calls.fetch_add(1, Ordering::SeqCst);
        self.before_call().await?;
        if take_one(&self.fail_next_replaces) {
            return Err(BackendError::Unavailable("injected replace failure".into()));
        }
        if let Some(rule) = add_rules.first() {
            if take_one(&self.collide_next_replaces) {
                return Err(BackendError::IdInUse(rule.id));
            }
        }
        self.table.atomic_replace(remove_ids, add_rules).await
    }
}

pub fn header(name: &str, value: &str) -> HeaderEntry {
    HeaderEntry::new(name, value)
}

pub fn config(enabled: bool, headers: Vec<HeaderEntry>) -> HeaderConfig {
    HeaderConfig {
        headers,
        enabled,
        url_pattern: ALL_URLS.to_string(),
    }
}

/// Install a rule directly, as a previous run would have left it.
pub async fn install_stray(table: &InMemoryRuleTable, id: u32) {
    let rule = compile(&config(true, vec![header("X-Stray", "old")]), RuleId(id))
        .expect("active config compiles");
    table
        .atomic_replace(&BTreeSet::new(), vec![rule])
        .await
        .expect("stray rule installs");
}

/// Service config for tests: in-memory storage, no reconcile ticker, fast retries.
pub fn test_service_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.storage.kind = StorageKind::Memory;
    config.storage.watch = false;
    config.sync.reconcile_interval_secs = 0;
    config.sync.backend_timeout_ms = 500;
    config.retries.base_delay_ms = 10;
    config.retries.max_delay_ms = 50;
    config.api.bind_address = "127.0.0.1:0".to_string();
    config
}

pub struct TestService {
    pub app: HeaderSync,
    pub backend: Arc<FaultyBackend>,
    pub kv: Arc<MemoryKvStore>,
    pub shutdown: Shutdown,
}

/// Start the service over a fresh memory store and faulty backend.
pub async fn start_service(config: &ServiceConfig) -> TestService {
    let kv = Arc::new(MemoryKvStore::new());
    let table = Arc::new(InMemoryRuleTable::new());
    start_service_with(config, kv, table).await
}

pub async fn start_service_with(
    config: &ServiceConfig,
    kv: Arc<MemoryKvStore>,
    table: Arc<InMemoryRuleTable>,
) -> TestService {
    let backend = FaultyBackend::new(table.clone());
    let shutdown = Shutdown::new();
    let kv_store: Arc<dyn KvStore> = kv.clone();
    let app = HeaderSync::start_with_backend(config, kv_store, backend.clone(), table, &shutdown).await;
    TestService {
        app,
        backend,
        kv,
        shutdown,
    }
}

/// Serve the message API on an ephemeral port.
pub async fn start_api(service: &TestService, config: &ServiceConfig) -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let server = header_sync::api::ApiServer::new(&config.api, service.app.app_state());
    let rx = service.shutdown.subscribe();
    tokio::spawn(async move {
        let _ = server.run(listener, rx).await;
    });
    addr
}

/// Poll `check` until it holds or `timeout` passes.
pub async fn eventually<F>(timeout: Duration, mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if check() {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

pub fn client() -> reqwest::Client {
    reqwest::Client::builder()
        .pool_max_idle_per_host(0)
        .no_proxy()
        .build()
        .unwrap()
}
