//! Header configuration store.
//!
//! # Responsibilities
//! - Load and save the persisted header configuration record
//! - Own the working copy every surface edits
//! - Turn writes by other surfaces into configuration change events
//!
//! # Design Decisions
//! - Loading never fails: missing or unreadable data yields the default
//! - Persistence failures are logged and swallowed; the working copy still
//!   reflects the edit
//! - Own writes are recognized by value and not reported as external

use arc_swap::ArcSwap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::broadcast::{self, error::RecvError};

use crate::engine::ConfigSource;
use crate::observability::metrics;
use crate::rules::{HeaderConfig, HeaderEntry};
use crate::store::kv::{KvChange, KvStore};

/// Own writes remembered for suppression.
const RECENT_WRITES: usize = 8;

/// The record as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PersistedConfig {
    pub headers: Vec<HeaderEntry>,
    pub enabled: bool,
    pub url_pattern: String,
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
}

impl PersistedConfig {
    fn stamp(config: &HeaderConfig) -> Self {
        Self {
            headers: config.headers.clone(),
            enabled: config.enabled,
            url_pattern: config.url_pattern.clone(),
            last_updated: chrono::Utc::now().timestamp_millis(),
        }
    }

    fn into_config(self) -> HeaderConfig {
        HeaderConfig {
            headers: self.headers,
            enabled: self.enabled,
            url_pattern: self.url_pattern,
        }
        .normalized()
    }
}

/// Decode a stored value, falling back to the default.
pub fn decode_config(value: Option<&Value>) -> HeaderConfig {
    let Some(value) = value else {
        return HeaderConfig::default();
    };
    match PersistedConfig::deserialize(value) {
        Ok(persisted) => persisted.into_config(),
        Err(e) => {
            tracing::warn!(error = %e, "Stored header configuration unreadable, using default");
            HeaderConfig::default()
        }
    }
}

/// Partial update of one header entry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderPatch {
    pub name: Option<String>,
    pub value: Option<String>,
    pub enabled: Option<bool>,
}

#[derive(Default)]
struct OwnWrites(Mutex<VecDeque<Value>>);

impl OwnWrites {
    fn remember(&self, value: Value) {
        let mut recent = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        if recent.len() == RECENT_WRITES {
            recent.pop_front();
        }
        recent.push_back(value);
    }

    /// True (and forgotten) if `value` was written by us.
    fn claim(&self, value: Option<&Value>) -> bool {
        let Some(value) = value else {
            return false;
        };
        let mut recent = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        match recent.iter().position(|v| v == value) {
            Some(i) => {
                recent.remove(i);
                true
            }
            None => false,
        }
    }
}

/// Owner of the working header configuration.
pub struct ConfigStore {
    kv: Arc<dyn KvStore>,
    key: String,
    current: Arc<ArcSwap<HeaderConfig>>,
    own_writes: Arc<OwnWrites>,
    edit_lock: tokio::sync::Mutex<()>,
}

impl ConfigStore {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            current: Arc::new(ArcSwap::from_pointee(HeaderConfig::default())),
            own_writes: Arc::new(OwnWrites::default()),
            edit_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read the persisted configuration into the working copy.
    pub async fn load(&self) -> HeaderConfig {
        let config = match self.kv.get(&self.key).await {
            Ok(value) => decode_config(value.as_ref()),
            Err(e) => {
                tracing::error!(error = %e, key = %self.key, "Failed to read header configuration");
                metrics::record_store_error("get");
                HeaderConfig::default()
            }
        };
        tracing::info!(
            headers = config.headers.len(),
            enabled = config.enabled,
            url_pattern = %config.url_pattern,
            "Header configuration loaded"
        );
        self.current.store(Arc::new(config.clone()));
        config
    }

    /// Replace the working copy and the persisted record.
    pub async fn save(&self, config: HeaderConfig) -> HeaderConfig {
        let _guard = self.edit_lock.lock().await;
        self.write(config).await
    }

    /// Current working copy.
    pub fn snapshot(&self) -> HeaderConfig {
        HeaderConfig::clone(&self.current.load())
    }

    /// Configurations written by other surfaces, from now on.
    pub fn external_changes(&self) -> ExternalChanges {
        ExternalChanges {
            rx: self.kv.subscribe(),
            key: self.key.clone(),
            current: self.current.clone(),
            own_writes: self.own_writes.clone(),
        }
    }

    /// Append a new enabled header.
    pub async fn add_header(&self, name: &str, value: &str) -> (HeaderEntry, HeaderConfig) {
        let entry = HeaderEntry::new(name, value);
        let added = entry.clone();
        let config = self.edit(move |config| config.headers.push(added)).await;
        (entry, config)
    }

    /// Apply `patch` to the header `id`. `None` if there is no such header.
    pub async fn update_header(&self, id: &str, patch: HeaderPatch) -> Option<HeaderConfig> {
        self.edit_header(id, move |header| {
            if let Some(name) = patch.name {
                header.name = name;
            }
            if let Some(value) = patch.value {
                header.value = value;
            }
            if let Some(enabled) = patch.enabled {
                header.enabled = enabled;
            }
        })
        .await
    }

    pub async fn toggle_header(&self, id: &str) -> Option<HeaderConfig> {
        self.edit_header(id, |header| header.enabled = !header.enabled).await
    }

    pub async fn remove_header(&self, id: &str) -> Option<HeaderConfig> {
        let _guard = self.edit_lock.lock().await;
        let mut config = self.snapshot();
        let before = config.headers.len();
        config.headers.retain(|h| h.id != id);
        if config.headers.len() == before {
            return None;
        }
        Some(self.write(config).await)
    }

    pub async fn set_enabled(&self, enabled: bool) -> HeaderConfig {
        self.edit(move |config| config.enabled = enabled).await
    }

    pub async fn toggle_enabled(&self) -> HeaderConfig {
        self.edit(|config| config.enabled = !config.enabled).await
    }

    pub async fn set_url_pattern(&self, pattern: &str) -> HeaderConfig {
        let pattern = pattern.to_string();
        self.edit(move |config| config.url_pattern = pattern).await
    }

    /// Back to the default configuration.
    pub async fn reset(&self) -> HeaderConfig {
        self.save(HeaderConfig::default()).await
    }

    async fn edit<F>(&self, apply: F) -> HeaderConfig
    where
        F: FnOnce(&mut HeaderConfig),
    {
        let _guard = self.edit_lock.lock().await;
        let mut config = self.snapshot();
        apply(&mut config);
        self.write(config).await
    }

    async fn edit_header<F>(&self, id: &str, apply: F) -> Option<HeaderConfig>
    where
        F: FnOnce(&mut HeaderEntry),
    {
        let _guard = self.edit_lock.lock().await;
        let mut config = self.snapshot();
        let header = config.headers.iter_mut().find(|h| h.id == id)?;
        apply(header);
        Some(self.write(config).await)
    }

    /// Caller holds `edit_lock`.
    async fn write(&self, config: HeaderConfig) -> HeaderConfig {
        let config = config.normalized();
        self.current.store(Arc::new(config.clone()));

        let value = match serde_json::to_value(PersistedConfig::stamp(&config)) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "Failed to encode header configuration");
                metrics::record_store_error("encode");
                return config;
            }
        };

        self.own_writes.remember(value.clone());
        if let Err(e) = self.kv.set(&self.key, value).await {
            tracing::error!(error = %e, key = %self.key, "Failed to persist header configuration");
            metrics::record_store_error("set");
        }
        config
    }
}

impl ConfigSource for ConfigStore {
    fn current(&self) -> HeaderConfig {
        self.snapshot()
    }
}

/// Stream of configurations written by other surfaces.
pub struct ExternalChanges {
    rx: broadcast::Receiver<KvChange>,
    key: String,
    current: Arc<ArcSwap<HeaderConfig>>,
    own_writes: Arc<OwnWrites>,
}

impl ExternalChanges {
    /// Next external configuration, already adopted as the working copy.
    ///
    /// `None` once the underlying store is gone.
    pub async fn next(&mut self) -> Option<HeaderConfig> {
        loop {
            match self.rx.recv().await {
                Ok(change) if change.key == self.key => {
                    if self.own_writes.claim(change.value.as_ref()) {
                        continue;
                    }
                    let config = decode_config(change.value.as_ref());
                    tracing::info!(
                        headers = config.headers.len(),
                        enabled = config.enabled,
                        "Header configuration changed by another surface"
                    );
                    self.current.store(Arc::new(config.clone()));
                    return Some(config);
                }
                Ok(_) => continue,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(skipped, "Store change stream lagged");
                }
                Err(RecvError::Closed) => return None,
            }
        }
    }
}
