//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Call to traffic backend:
//!     → timeouts.rs (bounded by sync.backend_timeout_ms)
//!     → On retryable failure: backoff.rs (delay before the caller retries)
//! ```
//!
//! # Design Decisions
//! - Every backend call has a deadline
//! - Retries are driven by the caller, never inside a sync pass
//! - Jittered backoff spreads retries from concurrent surfaces

pub mod backoff;
pub mod timeouts;
