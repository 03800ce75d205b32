//! Message API subsystem.
//!
//! # Data Flow
//! ```text
//! HTTP request
//!     → auth.rs (optional bearer token)
//!     → server.rs (routes)
//!     → messages.rs (parse {type, data})
//!     → dispatch.rs (stores + sync queue)
//!     → Reply
//! ```

pub mod auth;
pub mod dispatch;
pub mod messages;
pub mod server;

pub use dispatch::HeaderService;
pub use messages::{Message, ProtocolError, Reply};
pub use server::{ApiServer, AppState};
