//! Persistence, restart and cross-surface change propagation.

use header_sync::engine::InMemoryRuleTable;
use header_sync::lifecycle::{HeaderSync, Shutdown};
use header_sync::rules::{HeaderConfig, HeaderEntry};
use header_sync::store::{ConfigStore, FileKvStore, KvStore, MemoryKvStore, StoreError, CONFIG_KEY};
use serde_json::json;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

mod common;
use common::{config, eventually, header, install_stray, start_service, start_service_with, test_service_config, FaultyBackend};

fn has_header(table: &InMemoryRuleTable, name: &str) -> bool {
    table
        .rules()
        .iter()
        .any(|rule| rule.action.request_headers().iter().any(|d| d.header == name))
}

#[tokio::test]
async fn test_state_survives_restart() {
    let service_config = test_service_config();
    let kv = Arc::new(MemoryKvStore::new());

    let first = start_service_with(&service_config, kv.clone(), Arc::new(InMemoryRuleTable::new())).await;
    let reply = first
        .app
        .service
        .handle_value(json!({
            "type": "UPDATE_HEADERS",
            "data": {
                "headers": [
                    {"id": "a", "name": "X-First", "value": "1", "enabled": true},
                    {"id": "b", "name": "X-Off", "value": "2", "enabled": false},
                    {"id": "c", "name": "X-Third", "value": "3", "enabled": true}
                ],
                "enabled": true,
                "urlPattern": "https://api.example.com/*"
            }
        }))
        .await;
    assert!(reply.is_success());
    let saved = first.app.config_store.snapshot();
    first.shutdown.trigger();
    first.app.join().await;

    let table = Arc::new(InMemoryRuleTable::new());
    let second = start_service_with(&service_config, kv, table.clone()).await;
    let restored = second.app.config_store.snapshot();

    assert_eq!(restored, saved);
    let ids: Vec<_> = restored.headers.iter().map(|h| h.id.as_str()).collect();
    assert_eq!(ids, vec!["a", "b", "c"]);
    assert!(!restored.headers[1].enabled);

    let rules = table.rules();
    assert_eq!(rules.len(), 1);
    assert_eq!(rules[0].condition.url_filter, "https://api.example.com/*");
    let names: Vec<_> = rules[0]
        .action
        .request_headers()
        .iter()
        .map(|d| d.header.as_str())
        .collect();
    assert_eq!(names, vec!["X-First", "X-Third"]);

    second.shutdown.trigger();
    second.app.join().await;
}

#[tokio::test]
async fn test_startup_clears_stray_rules() {
    let table = Arc::new(InMemoryRuleTable::new());
    for id in [12, 345, 6789] {
        install_stray(&table, id).await;
    }

    let service = start_service_with(&test_service_config(), Arc::new(MemoryKvStore::new()), table.clone()).await;

    assert!(table.is_empty());
    assert_eq!(service.app.config_store.snapshot(), HeaderConfig::default());
    service.shutdown.trigger();
    service.app.join().await;
}

#[tokio::test]
async fn test_unreadable_record_falls_back_to_default() {
    let kv = Arc::new(MemoryKvStore::new());
    kv.set(CONFIG_KEY, json!("definitely not a config")).await.unwrap();

    let service = start_service_with(&test_service_config(), kv, Arc::new(InMemoryRuleTable::new())).await;

    assert_eq!(service.app.config_store.snapshot(), HeaderConfig::default());
    assert!(service.app.table.is_empty());
    service.shutdown.trigger();
    service.app.join().await;
}

#[tokio::test]
async fn test_external_write_triggers_sync() {
    let service = start_service(&test_service_config()).await;
    let other_surface = ConfigStore::new(service.kv.clone(), CONFIG_KEY);

    other_surface
        .save(config(true, vec![header("X-External", "yes")]))
        .await;

    let table = service.app.table.clone();
    assert!(eventually(Duration::from_secs(2), || has_header(&table, "X-External")).await);
    assert_eq!(table.len(), 1);
    assert_eq!(service.app.config_store.snapshot().headers[0].name, "X-External");

    other_surface.set_enabled(false).await;
    assert!(eventually(Duration::from_secs(2), || table.is_empty()).await);

    service.shutdown.trigger();
    service.app.join().await;
}

#[tokio::test]
async fn test_external_write_retried_after_backend_failure() {
    let service = start_service(&test_service_config()).await;
    service.backend.fail_next_replaces.store(2, Ordering::SeqCst);

    ConfigStore::new(service.kv.clone(), CONFIG_KEY)
        .save(config(true, vec![header("X-Retry", "1")]))
        .await;

    let table = service.app.table.clone();
    assert!(eventually(Duration::from_secs(3), || has_header(&table, "X-Retry")).await);
    assert_eq!(service.backend.fail_next_replaces.load(Ordering::SeqCst), 0);

    service.shutdown.trigger();
    service.app.join().await;
}

#[tokio::test]
async fn test_pending_retry_does_not_undo_newer_edit() {
    let mut service_config = test_service_config();
    service_config.retries.base_delay_ms = 300;
    service_config.retries.max_delay_ms = 300;
    let service = start_service(&service_config).await;
    service.backend.fail_next_replaces.store(1, Ordering::SeqCst);

    ConfigStore::new(service.kv.clone(), CONFIG_KEY)
        .save(config(true, vec![header("X-Old-External", "1")]))
        .await;
    let backend = service.backend.clone();
    assert!(
        eventually(Duration::from_secs(2), || backend.fail_next_replaces.load(Ordering::SeqCst) == 0).await
    );

    let reply = service
        .app
        .service
        .handle_value(json!({
            "type": "UPDATE_HEADERS",
            "data": {
                "headers": [{"name": "X-Newer-Api", "value": "2", "enabled": true}],
                "enabled": true
            }
        }))
        .await;
    assert!(reply.is_success());

    // Let the follower's backoff expire and its retry run.
    tokio::time::sleep(Duration::from_millis(800)).await;

    let table = &service.app.table;
    assert!(has_header(table, "X-Newer-Api"));
    assert!(!has_header(table, "X-Old-External"));
    assert_eq!(table.len(), 1);
    assert_eq!(service.app.config_store.snapshot().headers[0].name, "X-Newer-Api");

    service.shutdown.trigger();
    service.app.join().await;
}

#[tokio::test]
async fn test_own_writes_are_not_resynced() {
    let service = start_service(&test_service_config()).await;

    let reply = service
        .app
        .service
        .handle_value(json!({"type": "ADD_HEADER", "data": {"name": "X-Own", "value": "1"}}))
        .await;
    assert!(reply.is_success());
    let reply = service
        .app
        .service
        .handle_value(json!({"type": "TOGGLE_EXTENSION"}))
        .await;
    assert!(reply.is_success());
    assert!(has_header(&service.app.table, "X-Own"));

    let passes = service.backend.replace_calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(service.backend.replace_calls.load(Ordering::SeqCst), passes);

    service.shutdown.trigger();
    service.app.join().await;
}

#[tokio::test]
async fn test_file_store_shared_between_processes() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("state").join("headers.json");

    let writer: Arc<dyn KvStore> = Arc::new(FileKvStore::open(&path).unwrap());
    let reader = Arc::new(FileKvStore::open(&path).unwrap());

    let saved = ConfigStore::new(writer, CONFIG_KEY)
        .save(HeaderConfig {
            headers: vec![HeaderEntry::new("X-Shared", "v")],
            enabled: true,
            url_pattern: "https://example.com/*".into(),
        })
        .await;

    let mut changes = reader.subscribe();
    assert_eq!(reader.refresh(), 1);
    assert_eq!(changes.recv().await.unwrap().key, CONFIG_KEY);

    let loaded = ConfigStore::new(reader, CONFIG_KEY).load().await;
    assert_eq!(loaded, saved);
}

#[tokio::test]
async fn test_corrupt_state_file_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("headers.json");
    std::fs::write(&path, "{ not json").unwrap();

    assert!(matches!(FileKvStore::open(&path), Err(StoreError::Corrupt(_))));
}

#[tokio::test]
async fn test_watched_file_edit_reaches_backend() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("headers.json");
    let kv: Arc<dyn KvStore> = Arc::new(
        FileKvStore::open(&path)
            .unwrap()
            .watch(Duration::from_millis(50))
            .unwrap(),
    );

    let table = Arc::new(InMemoryRuleTable::new());
    let backend = FaultyBackend::new(table.clone());
    let shutdown = Shutdown::new();
    let app = HeaderSync::start_with_backend(&test_service_config(), kv, backend, table.clone(), &shutdown).await;
    assert!(table.is_empty());

    let document = json!({
        CONFIG_KEY: {
            "headers": [{"id": "f1", "name": "X-From-File", "value": "1", "enabled": true}],
            "enabled": true,
            "urlPattern": "<all_urls>",
            "lastUpdated": 0
        }
    });
    std::fs::write(&path, serde_json::to_vec_pretty(&document).unwrap()).unwrap();

    assert!(eventually(Duration::from_secs(5), || has_header(&table, "X-From-File")).await);
    assert_eq!(app.config_store.snapshot().headers[0].id, "f1");

    shutdown.trigger();
    app.join().await;
}
