//! Header rule synchronization service library.

pub mod api;
pub mod config;
pub mod engine;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod rules;
pub mod status;
pub mod store;
pub mod triggers;

pub use config::schema::ServiceConfig;
pub use engine::{SyncEngine, SyncHandle, TrafficBackend};
pub use lifecycle::{HeaderSync, Shutdown};
pub use rules::{HeaderConfig, HeaderEntry, SyncStatus};
