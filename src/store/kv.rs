//! Key-value persistence seam.
//!
//! Every surface reads and writes the same keys. Writes by any writer,
//! this process included, are broadcast to subscribers exactly once.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};
use thiserror::Error;
use tokio::sync::broadcast;

/// Buffered change events per subscriber.
pub const CHANGE_BUFFER: usize = 64;

/// Persistence failure.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("storage I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("stored data is not valid JSON: {0}")]
    Corrupt(#[from] serde_json::Error),

    #[error("failed to watch storage: {0}")]
    Watch(#[from] notify::Error),
}

/// A key written or removed by some surface.
#[derive(Debug, Clone, PartialEq)]
pub struct KvChange {
    pub key: String,
    /// New value; `None` if the key was removed.
    pub value: Option<Value>,
}

#[async_trait]
pub trait KvStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError>;

    async fn remove(&self, key: &str) -> Result<(), StoreError>;

    /// Changes made after this call.
    fn subscribe(&self) -> broadcast::Receiver<KvChange>;
}

/// In-memory store; shared between surfaces of one process.
pub struct MemoryKvStore {
    entries: Mutex<HashMap<String, Value>>,
    changes: broadcast::Sender<KvChange>,
}

impl MemoryKvStore {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_BUFFER);
        Self {
            entries: Mutex::new(HashMap::new()),
            changes,
        }
    }
}

impl Default for MemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        let entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value) -> Result<(), StoreError> {
        let changed = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.insert(key.to_string(), value.clone()).as_ref() != Some(&value)
        };
        if changed {
            let _ = self.changes.send(KvChange {
                key: key.to_string(),
                value: Some(value),
            });
        }
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), StoreError> {
        let removed = {
            let mut entries = self.entries.lock().unwrap_or_else(PoisonError::into_inner);
            entries.remove(key).is_some()
        };
        if removed {
            let _ = self.changes.send(KvChange {
                key: key.to_string(),
                value: None,
            });
        }
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<KvChange> {
        self.changes.subscribe()
    }
}
