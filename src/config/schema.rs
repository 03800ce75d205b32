//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the service.
//! All types derive Serde traits for deserialization from config files.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::engine::SyncSettings;

/// Root configuration for the header sync service.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Where header configurations and profiles are persisted.
    pub storage: StorageConfig,

    /// Sync engine and worker tuning.
    pub sync: SyncConfig,

    /// Retry policy for passes triggered by external changes.
    pub retries: RetryConfig,

    /// Message API listener.
    pub api: ApiConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Persistence backend selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageKind {
    /// JSON file on disk, shared with other processes.
    File,
    /// Process-local map; lost on exit.
    Memory,
}

/// Storage configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    pub kind: StorageKind,

    /// State file for the `file` backend.
    pub path: PathBuf,

    /// Key of the header configuration record.
    pub key: String,

    /// Key of the profile book record.
    pub profiles_key: String,

    /// Watch the state file for writes by other processes.
    pub watch: bool,

    /// Poll interval for watcher backends that poll, in milliseconds.
    pub poll_interval_ms: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            kind: StorageKind::File,
            path: PathBuf::from("header-sync-state.json"),
            key: crate::store::CONFIG_KEY.to_string(),
            profiles_key: crate::store::PROFILES_KEY.to_string(),
            watch: true,
            poll_interval_ms: 2000,
        }
    }
}

/// Sync engine configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Upper bound for each traffic backend call, in milliseconds.
    pub backend_timeout_ms: u64,

    /// Fresh rule ids tried per pass before giving up.
    pub max_id_attempts: u32,

    /// Jobs buffered in the sync queue.
    pub queue_capacity: usize,

    /// Drift check interval in seconds. 0 disables.
    pub reconcile_interval_secs: u64,

    /// Maximum rules the in-process rule table accepts.
    pub max_rules: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            backend_timeout_ms: 5000,
            max_id_attempts: 8,
            queue_capacity: 64,
            reconcile_interval_secs: 60,
            max_rules: crate::engine::memory::DEFAULT_MAX_RULES,
        }
    }
}

impl SyncConfig {
    pub fn settings(&self) -> SyncSettings {
        SyncSettings {
            backend_timeout: Duration::from_millis(self.backend_timeout_ms),
            max_id_attempts: self.max_id_attempts,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of retry attempts.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub base_delay_ms: u64,

    /// Maximum delay for exponential backoff in milliseconds.
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            base_delay_ms: 100,
            max_delay_ms: 2000,
        }
    }
}

/// Message API configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Serve the message API.
    pub enabled: bool,

    /// Bind address (e.g., "127.0.0.1:8787").
    pub bind_address: String,

    /// Bearer token required on every request when set.
    pub api_key: Option<String>,

    /// Request timeout in seconds.
    pub request_timeout_secs: u64,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            bind_address: "127.0.0.1:8787".to_string(),
            api_key: None,
            request_timeout_secs: 30,
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log line format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
