//! Header rule domain types.
//!
//! # Data Flow
//! ```text
//! editing surface
//!     → validators.rs (advisory field checks)
//!     → model.rs (HeaderConfig working copy)
//!     → compiler.rs (HeaderConfig → CompiledRule)
//!
//! profile.rs holds the profile data model (persisted, not compiled)
//! ```

pub mod compiler;
pub mod model;
pub mod profile;
pub mod validators;

pub use compiler::compile;
pub use model::{
    CompiledRule, HeaderConfig, HeaderDirective, HeaderEntry, HeaderOperation, ResourceType,
    RuleAction, RuleCondition, RuleId, SyncStatus, ALL_URLS,
};
pub use profile::{Profile, ProfileBook};
pub use validators::FieldError;
