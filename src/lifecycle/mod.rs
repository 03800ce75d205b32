//! Lifecycle management subsystem.
//!
//! # Data Flow
//! ```text
//! Startup (startup.rs):
//!     Open storage → Start sync worker → Bootstrap → Start triggers → Start API
//!
//! Shutdown (shutdown.rs):
//!     Signal received → Broadcast → Tasks exit their loops → Join
//!
//! Signals (signals.rs):
//!     SIGTERM/SIGINT → Trigger graceful shutdown
//! ```
//!
//! # Design Decisions
//! - Ordered startup: storage first, then engine, then listeners
//! - Shutdown has timeout: tasks that do not stop are abandoned

pub mod shutdown;
pub mod signals;
pub mod startup;

pub use shutdown::Shutdown;
pub use startup::{HeaderSync, StartupError};
