//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! Sync engine, store, fan-out, API produce:
//!     → logging.rs (structured log events)
//!     → metrics.rs (counters, gauges, histograms)
//!
//! Consumers:
//!     → stdout (pretty or JSON lines)
//!     → Metrics endpoint (Prometheus scrape)
//! ```
//!
//! # Design Decisions
//! - Structured logging (JSON) for machine parsing
//! - Metrics are no-ops until a recorder is installed

pub mod logging;
pub mod metrics;
