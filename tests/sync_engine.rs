//! Sync engine behaviour against a programmable backend.

use header_sync::engine::{
    BackendError, InMemoryRuleTable, JobOutcome, RuleIdGenerator, SlotState, SyncEngine, SyncError,
    SyncSettings, SyncWorker,
};
use header_sync::lifecycle::Shutdown;
use header_sync::rules::{HeaderDirective, HeaderEntry, HeaderOperation, ResourceType, RuleId};
use header_sync::status::StatusFanout;
use header_sync::store::{ConfigStore, MemoryKvStore, CONFIG_KEY};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{config, eventually, header, install_stray, FaultyBackend};

fn engine(backend: Arc<FaultyBackend>, fanout: StatusFanout) -> SyncEngine {
    SyncEngine::new(backend, fanout, SyncSettings::default()).with_id_generator(RuleIdGenerator::with_seed(11))
}

fn setup() -> (Arc<InMemoryRuleTable>, Arc<FaultyBackend>, SyncEngine) {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    let engine = engine(backend.clone(), StatusFanout::new());
    (table, backend, engine)
}

#[tokio::test]
async fn test_single_header_installs_one_rule() {
    let (table, _backend, mut engine) = setup();

    let report = engine
        .synchronize(&config(true, vec![header("X-Test", "test-value")]))
        .await
        .unwrap();

    let rules = table.rules();
    assert_eq!(rules.len(), 1);
    let rule = &rules[0];
    assert_eq!(report.state, SlotState::Installed(rule.id));
    assert_eq!(rule.priority, 1);
    assert_eq!(rule.condition.url_filter, "*");
    assert_eq!(rule.condition.resource_types, ResourceType::ALL.to_vec());
    assert_eq!(
        rule.action.request_headers(),
        &[HeaderDirective {
            header: "X-Test".into(),
            operation: HeaderOperation::Set,
            value: Some("test-value".into()),
        }]
    );
    assert!(report.status.enabled);
    assert_eq!(report.status.rule_count, 1);
}

#[tokio::test]
async fn test_disabled_config_installs_nothing() {
    let (table, _backend, mut engine) = setup();

    engine
        .synchronize(&config(true, vec![header("X-Test", "1")]))
        .await
        .unwrap();
    let report = engine
        .synchronize(&config(false, vec![header("X-Test", "1")]))
        .await
        .unwrap();

    assert!(table.is_empty());
    assert_eq!(report.state, SlotState::Empty);
    assert!(!report.status.enabled);
    assert_eq!(report.status.rule_count, 0);
}

#[tokio::test]
async fn test_blank_names_are_filtered() {
    let (table, _backend, mut engine) = setup();
    let headers = vec![
        header("", "x"),
        header("   ", "y"),
        header("X-Valid", "v"),
        HeaderEntry {
            enabled: false,
            ..header("X-Off", "z")
        },
        header("X-Blank-Value", "  "),
    ];

    let report = engine.synchronize(&config(true, headers)).await.unwrap();

    let rules = table.rules();
    assert_eq!(rules.len(), 1);
    let names: Vec<_> = rules[0]
        .action
        .request_headers()
        .iter()
        .map(|d| d.header.as_str())
        .collect();
    assert_eq!(names, vec!["X-Valid"]);
    assert_eq!(report.status.rule_count, 1);
}

#[tokio::test]
async fn test_only_invalid_headers_clears() {
    let (table, _backend, mut engine) = setup();
    install_stray(&table, 42).await;

    let report = engine
        .synchronize(&config(true, vec![header(" ", "x")]))
        .await
        .unwrap();

    assert!(table.is_empty());
    assert_eq!(report.state, SlotState::Empty);
    assert_eq!(report.removed, 1);
}

#[tokio::test]
async fn test_repeated_sync_is_idempotent() {
    let (table, _backend, mut engine) = setup();
    let active = config(true, vec![header("A", "1"), header("B", "2")]);

    engine.synchronize(&active).await.unwrap();
    let first = table.rules();
    engine.synchronize(&active).await.unwrap();
    engine.synchronize(&active).await.unwrap();
    let last = table.rules();

    assert_eq!(last.len(), 1);
    assert_eq!(first[0].action, last[0].action);
    assert_eq!(first[0].condition, last[0].condition);
}

#[tokio::test]
async fn test_stray_rules_are_removed() {
    let (table, backend, mut engine) = setup();
    for id in [5, 17, 999, 500_000] {
        install_stray(&table, id).await;
    }

    let report = engine
        .synchronize(&config(true, vec![header("X-New", "1")]))
        .await
        .unwrap();

    let rules = table.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].action.request_headers()[0].header, "X-New");
    assert_eq!(report.removed, 4);
    // Removal and install happen in the same call.
    assert_eq!(backend.replace_calls.load(Ordering::SeqCst), 1);

    for id in [7, 8] {
        install_stray(&table, id).await;
    }
    engine.synchronize(&config(false, vec![])).await.unwrap();
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_id_collision_retries_with_new_id() {
    let (table, backend, mut engine) = setup();
    backend.collide_next_replaces.store(2, Ordering::SeqCst);

    let report = engine
        .synchronize(&config(true, vec![header("X-Test", "1")]))
        .await
        .unwrap();

    assert_eq!(backend.replace_calls.load(Ordering::SeqCst), 3);
    assert_eq!(table.len(), 1);
    assert_eq!(report.state, SlotState::Installed(table.rules()[0].id));
}

#[tokio::test]
async fn test_id_attempts_are_bounded() {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    let mut engine = SyncEngine::new(
        backend.clone(),
        StatusFanout::new(),
        SyncSettings {
            max_id_attempts: 3,
            ..SyncSettings::default()
        },
    );
    backend.collide_next_replaces.store(100, Ordering::SeqCst);

    let err = engine
        .synchronize(&config(true, vec![header("X-Test", "1")]))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::IdSpaceExhausted(3));
    assert_eq!(backend.replace_calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.state(), SlotState::Empty);
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_failure_leaves_state_unchanged() {
    let (table, backend, mut engine) = setup();
    engine
        .synchronize(&config(true, vec![header("X-Keep", "1")]))
        .await
        .unwrap();
    let before_state = engine.state();
    let before_rules = table.rules();

    backend.fail_next_replaces.store(1, Ordering::SeqCst);
    let err = engine
        .synchronize(&config(true, vec![header("X-New", "2")]))
        .await
        .unwrap_err();

    assert!(matches!(err, SyncError::Backend(BackendError::Unavailable(_))));
    assert!(err.is_retryable());
    assert_eq!(engine.state(), before_state);
    assert_eq!(table.rules(), before_rules);

    backend.unavailable.store(true, Ordering::SeqCst);
    assert!(engine.clear_all().await.is_err());
    assert_eq!(engine.state(), before_state);
    assert_eq!(table.len(), 1);
}

#[tokio::test]
async fn test_slow_backend_times_out() {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    backend.delay_ms.store(300, Ordering::SeqCst);
    let mut engine = SyncEngine::new(
        backend,
        StatusFanout::new(),
        SyncSettings {
            backend_timeout: Duration::from_millis(50),
            ..SyncSettings::default()
        },
    );

    let err = engine
        .synchronize(&config(true, vec![header("X-Test", "1")]))
        .await
        .unwrap_err();

    assert_eq!(err, SyncError::Timeout(Duration::from_millis(50)));
    assert!(table.is_empty());
}

#[tokio::test]
async fn test_successful_pass_notifies_observers() {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table);
    let fanout = StatusFanout::new();
    let mut observer = fanout.subscribe();
    let mut engine = engine(backend.clone(), fanout);

    let report = engine
        .synchronize(&config(true, vec![header("A", "1"), header("B", "2")]))
        .await
        .unwrap();
    assert_eq!(report.notified, 1);
    let status = observer.recv().await.unwrap();
    assert!(status.enabled);
    assert_eq!(status.rule_count, 2);
    assert_eq!(status.url_pattern, "<all_urls>");

    backend.unavailable.store(true, Ordering::SeqCst);
    assert!(engine.synchronize(&config(false, vec![])).await.is_err());
    assert!(observer.try_recv().is_none());
}

#[tokio::test]
async fn test_reconcile_repairs_drift_only() {
    let (table, backend, mut engine) = setup();
    let active = config(true, vec![header("X-Test", "1")]);
    engine.synchronize(&active).await.unwrap();
    let replaces = backend.replace_calls.load(Ordering::SeqCst);

    assert_eq!(engine.reconcile(&active).await.unwrap(), None);
    assert_eq!(backend.replace_calls.load(Ordering::SeqCst), replaces);

    install_stray(&table, 3).await;
    let report = engine.reconcile(&active).await.unwrap().unwrap();
    assert!(matches!(report.state, SlotState::Installed(_)));
    assert_eq!(table.len(), 1);
    assert!(!table.rules().iter().any(|r| r.id == RuleId(3)));
}

fn spawn_worker(
    backend: Arc<FaultyBackend>,
    shutdown: &Shutdown,
) -> (Arc<ConfigStore>, header_sync::engine::SyncHandle) {
    let store = Arc::new(ConfigStore::new(Arc::new(MemoryKvStore::new()), CONFIG_KEY));
    let (worker, handle) = SyncWorker::new(engine(backend, StatusFanout::new()), store.clone(), 16);
    tokio::spawn(worker.run(shutdown.subscribe()));
    (store, handle)
}

#[tokio::test]
async fn test_worker_coalesces_queued_jobs() {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    backend.delay_ms.store(50, Ordering::SeqCst);
    let shutdown = Shutdown::new();
    let (store, handle) = spawn_worker(backend.clone(), &shutdown);
    store.save(config(true, vec![header("X-Gen", "4")])).await;

    let (a, b, c, d, e) = tokio::join!(
        handle.apply(),
        handle.apply(),
        handle.reconcile(),
        handle.apply(),
        handle.apply(),
    );
    for outcome in [a, b, c, d, e] {
        assert!(matches!(outcome, Ok(JobOutcome::Synced(_))));
    }

    assert!(backend.replace_calls.load(Ordering::SeqCst) <= 2);
    let rules = table.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].action.request_headers()[0].value.as_deref(), Some("4"));
}

#[tokio::test]
async fn test_queued_job_installs_newest_save() {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    backend.delay_ms.store(100, Ordering::SeqCst);
    let shutdown = Shutdown::new();
    let (store, handle) = spawn_worker(backend.clone(), &shutdown);

    store.save(config(true, vec![header("X-Gen", "old")])).await;
    let running = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.apply().await })
    };
    assert!(eventually(Duration::from_secs(2), || backend.list_calls.load(Ordering::SeqCst) > 0).await);

    let queued = {
        let handle = handle.clone();
        tokio::spawn(async move { handle.apply().await })
    };
    store.save(config(true, vec![header("X-Gen", "new")])).await;

    running.await.unwrap().unwrap();
    let outcome = queued.await.unwrap().unwrap();
    assert_eq!(outcome.report().unwrap().status.rule_count, 1);
    let rules = table.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].action.request_headers()[0].value.as_deref(), Some("new"));
}

#[tokio::test]
async fn test_worker_runs_clear_in_order() {
    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    let shutdown = Shutdown::new();
    let (store, handle) = spawn_worker(backend, &shutdown);

    store.save(config(true, vec![header("X-Test", "1")])).await;
    handle.apply().await.unwrap();
    assert_eq!(handle.clear_all().await.unwrap(), JobOutcome::Cleared(1));
    assert!(table.is_empty());

    shutdown.trigger();
    assert!(eventually(Duration::from_secs(2), || handle.is_closed()).await);
    assert_eq!(handle.apply().await, Err(SyncError::WorkerStopped));
}
