//! JSON-file key-value store shared between processes.
//!
//! # Responsibilities
//! - Persist all keys as one JSON object
//! - Replace the file atomically (write temp, rename)
//! - Turn writes by other processes into [`KvChange`] events
//!
//! # Design Decisions
//! - The in-memory snapshot is updated before the file, so the watcher's
//!   re-read of our own write finds no difference
//! - Unreadable or half-written files are skipped until the next event

use async_trait::async_trait;
use notify::RecommendedWatcher;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::store::kv::{KvChange, KvStore, StoreError, CHANGE_BUFFER};
use crate::store::watcher::StateFileWatcher;

struct FileState {
    path: PathBuf,
    entries: Mutex<Map<String, Value>>,
    changes: broadcast::Sender<KvChange>,
}

pub struct FileKvStore {
    state: Arc<FileState>,
    write_lock: tokio::sync::Mutex<()>,
    _watcher: Option<RecommendedWatcher>,
}

impl FileKvStore {
    /// Open the store at `path`, creating parent directories.
    ///
    /// A missing file is an empty store; an unparsable one is an error.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let entries = match std::fs::read(&path) {
            Ok(bytes) => parse_entries(&bytes)?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(path = ?path, keys = entries.len(), "Opened state file");

        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Ok(Self {
            state: Arc::new(FileState {
                path,
                entries: Mutex::new(entries),
                changes,
            }),
            write_lock: tokio::sync::Mutex::new(()),
            _watcher: None,
        })
    }

    /// Start watching the file for writes by other processes.
    pub fn watch(mut self, poll_interval: Duration) -> Result<Self, StoreError> {
        let state = self.state.clone();
        let watcher = StateFileWatcher::new(&self.state.path, poll_interval).run(move || {
            state.refresh();
        })?;
        self._watcher = Some(watcher);
        Ok(self)
    }

    pub fn path(&self) -> &Path {
        &self.state.path
    }

    /// Re-read the file and broadcast keys that differ from the snapshot.
    ///
    /// Returns the number of changed keys.
    pub fn refresh(&self) -> usize {
        self.state.refresh()
    }

    async fn persist(&self, key: &str, value: Option<Value>) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock().await;

        let (previous, bytes) = {
            let mut entries = self.state.lock();
            let previous = match &value {
                Some(v) => entries.insert(key.to_string(), v.clone()),
                None => entries.remove(key),
            };
            if previous == value {
                return Ok(());
            }
            (previous, serde_json::to_vec_pretty(&*entries)?)
        };

        if let Err(e) = write_atomic(&self.state.path, &bytes).await {
            let mut entries = self.state.lock();
            match previous {
                Some(v) => entries.insert(key.to_string(), v),
                None => entries.remove(key),
            };
            return Err(e.into());
        }

        let _ = self.state.changes.send(KvChange {
            key: key.to_string(),
            value,
        });
        Ok(())
    }
}

impl FileState {
    fn lock(&self) -> std::sync::MutexGuard<'_, Map<String, Value>> {
        self.entries.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn refresh(&self) -> usize {
        let fresh = match std::fs::read(&self.path) {
            Ok(bytes) => match parse_entries(&bytes) {
                Ok(map) => map,
                Err(e) => {
                    tracing::debug!(error = %e, "State file not parsable yet, skipping");
                    return 0;
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Map::new(),
            Err(e) => {
                tracing::warn!(error = %e, path = ?self.path, "Failed to re-read state file");
                return 0;
            }
        };

        let changes = {
            let mut entries = self.lock();
            let changes = diff(&entries, &fresh);
            *entries = fresh;
            changes
        };

        let count = changes.len();
        for change in changes {
            tracing::debug!(key = %change.key, removed = change.value.is_none(), "External state change");
            let _ = self.changes.send(change);
        }
        count
    }
}

#[async_trait]
impl KvStore for FileKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.state.lock().get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        self.persist(key, Some(value)).await
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.persist(key, None).await
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.state.changes.subscribe()
    }
}

fn parse_entries(bytes: &[u8]) -> Result<Map<String, Value>, serde_json::Error> {
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(Map::new());
    }
    serde_json::from_slice(bytes)
}

fn diff(old: &Map<String, Value>, new: &Map<String, Value>) -> Vec<KvChange> {
    let mut changes: Vec<KvChange> = new
        .iter()
        .filter(|(key, value)| old.get(*key) != Some(*value))
        .map(|(key, value)| KvChange {
            key: key.clone(),
            value: Some(value.clone()),
        })
        .collect();
    changes.extend(
        old.keys()
            .filter(|key| !new.contains_key(*key))
            .map(|key| KvChange {
                key: key.clone(),
                value: None,
            }),
    );
    changes
}

async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    tokio::fs::write(&tmp, bytes).await?;
    tokio::fs::rename(&tmp, path).await
}
