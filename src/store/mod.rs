//! Persistence subsystem.
//!
//! # Data Flow
//! ```text
//! editing surface / message API
//!     → config_store.rs (working copy, edits, save)
//!     → profiles.rs (profile book)
//!     → kv.rs (KvStore trait)
//!         → file.rs (JSON file, watched via watcher.rs)
//!         → MemoryKvStore
//!
//! write by another process
//!     → watcher.rs → file.rs diff → KvChange
//!     → config_store.rs external_changes()
//!     → sync worker
//! ```
//!
//! export.rs moves the configuration and profiles in and out as one document.

pub mod config_store;
pub mod export;
pub mod file;
pub mod kv;
pub mod profiles;
pub mod watcher;

pub use config_store::{ConfigStore, ExternalChanges, HeaderPatch};
pub use export::{ExportDocument, ImportError};
pub use file::FileKvStore;
pub use kv::{KvChange, KvStore, MemoryKvStore, StoreError};
pub use profiles::ProfileStore;

/// Key of the header configuration record.
pub const CONFIG_KEY: &str = "modheaders-pure-config";

/// Key of the profile book record.
pub const PROFILES_KEY: &str = "modheaders-profiles";

/// Milliseconds since the Unix epoch.
pub(crate) fn now_ms() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}
