//! Profile book persistence.

use std::sync::Arc;

use crate::observability::metrics;
use crate::rules::profile::{NewProfile, ProfilePatch};
use crate::rules::{Profile, ProfileBook};
use crate::store::kv::KvStore;
use crate::store::now_ms;

/// Owner of the persisted profile book.
pub struct ProfileStore {
    kv: Arc<dyn KvStore>,
    key: String,
    book: tokio::sync::Mutex<ProfileBook>,
}

impl ProfileStore {
    pub fn new(kv: Arc<dyn KvStore>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            book: tokio::sync::Mutex::new(ProfileBook::new(now_ms())),
        }
    }

    /// Read the persisted book. Missing, unreadable or empty data yields a
    /// book holding only the default profile.
    pub async fn load(&self) -> ProfileBook {
        let stored = match self.kv.get(&self.key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, key = %self.key, "Failed to read profiles");
                metrics::record_store_error("get");
                None
            }
        };

        let book = stored
            .and_then(|value| match serde_json::from_value::<ProfileBook>(value) {
                Ok(book) => Some(book),
                Err(e) => {
                    tracing::warn!(error = %e, "Stored profiles unreadable, using default");
                    None
                }
            })
            .filter(|book| !book.profiles.is_empty())
            .unwrap_or_else(|| ProfileBook::new(now_ms()));

        tracing::info!(
            profiles = book.profiles.len(),
            active = %book.active_profile,
            "Profiles loaded"
        );
        *self.book.lock().await = book.clone();
        book
    }

    pub async fn list(&self) -> ProfileBook {
        self.book.lock().await.clone()
    }

    /// Create a profile and make it active.
    pub async fn create(&self, input: NewProfile) -> Option<Profile> {
        let mut book = self.book.lock().await;
        let id = book.create(input, now_ms());
        self.persist(&book).await;
        book.get(&id).cloned()
    }

    pub async fn update(&self, id: &str, patch: ProfilePatch) -> Option<Profile> {
        let mut book = self.book.lock().await;
        if !book.update(id, patch, now_ms()) {
            return None;
        }
        self.persist(&book).await;
        book.get(id).cloned()
    }

    /// Delete a profile. Returns the resulting book, `None` if `id` is unknown.
    pub async fn delete(&self, id: &str) -> Option<ProfileBook> {
        let mut book = self.book.lock().await;
        if !book.delete(id) {
            return None;
        }
        self.persist(&book).await;
        Some(book.clone())
    }

    pub async fn set_active(&self, id: &str) -> bool {
        let mut book = self.book.lock().await;
        if !book.set_active(id) {
            return false;
        }
        self.persist(&book).await;
        true
    }

    /// Replace the whole book (import).
    pub async fn replace(&self, replacement: ProfileBook) {
        let mut book = self.book.lock().await;
        *book = replacement;
        self.persist(&book).await;
    }

    async fn persist(&self, book: &ProfileBook) {
        let result = match serde_json::to_value(book) {
            Ok(value) => self.kv.set(&self.key, value).await,
            Err(e) => Err(e.into()),
        };
        if let Err(e) = result {
            tracing::error!(error = %e, key = %self.key, "Failed to persist profiles");
            metrics::record_store_error("set");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::profile::DEFAULT_PROFILE_ID;
    use crate::store::kv::MemoryKvStore;
    use crate::store::PROFILES_KEY;
    use serde_json::json;

    #[tokio::test]
    async fn test_load_empty_has_default_profile() {
        let kv = Arc::new(MemoryKvStore::new());
        kv.set(PROFILES_KEY, json!({"profiles": [], "activeProfile": "x"}))
            .await
            .unwrap();
        let book = ProfileStore::new(kv, PROFILES_KEY).load().await;
        assert_eq!(book.profiles.len(), 1);
        assert_eq!(book.active_profile, DEFAULT_PROFILE_ID);
    }

    #[tokio::test]
    async fn test_changes_survive_reload() {
        let kv = Arc::new(MemoryKvStore::new());
        let store = ProfileStore::new(kv.clone(), PROFILES_KEY);
        store.load().await;
        let created = store
            .create(NewProfile {
                name: "QA".into(),
                enabled: true,
                ..NewProfile::default()
            })
            .await
            .unwrap();
        assert!(store.set_active(DEFAULT_PROFILE_ID).await);

        let reloaded = ProfileStore::new(kv, PROFILES_KEY).load().await;
        assert_eq!(reloaded.profiles.len(), 2);
        assert_eq!(reloaded.active_profile, DEFAULT_PROFILE_ID);
        assert!(reloaded.get(&created.id).is_some());
    }

    #[tokio::test]
    async fn test_delete_unknown_profile() {
        let store = ProfileStore::new(Arc::new(MemoryKvStore::new()), PROFILES_KEY);
        assert!(store.delete("nope").await.is_none());
        assert!(!store.set_active("nope").await);
    }
}
