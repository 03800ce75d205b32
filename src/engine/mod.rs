//! Rule synchronization engine.
//!
//! # Data Flow
//! ```text
//! HeaderConfig snapshot
//!     → worker.rs (serialized, coalesced queue)
//!     → sync.rs (read backend ids, compile, atomic replace)
//!     → backend.rs (TrafficBackend trait)
//!         → memory.rs (in-process rule table, url_filter.rs matching)
//!     → status fan-out
//! ```
//!
//! # Design Decisions
//! - The backend is the source of truth for installed ids
//! - Exactly one rule per active configuration
//! - ids.rs picks ids that avoid the backend's current set

pub mod backend;
pub mod ids;
pub mod memory;
pub mod sync;
pub mod url_filter;
pub mod worker;

pub use backend::{BackendError, TrafficBackend};
pub use ids::RuleIdGenerator;
pub use memory::InMemoryRuleTable;
pub use sync::{SlotState, SyncEngine, SyncError, SyncReport, SyncSettings};
pub use worker::{ConfigSource, JobOutcome, SyncHandle, SyncJob, SyncWorker};
