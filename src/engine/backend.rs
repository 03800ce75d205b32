//! Traffic backend contract.
//!
//! The backend is the declarative rule engine that actually rewrites
//! traffic. It is shared, persistent state: it may hold rules left over
//! from a previous run, so callers read it before every mutation.

use async_trait::async_trait;
use std::collections::BTreeSet;
use thiserror::Error;

use crate::rules::{CompiledRule, RuleId};

/// Errors reported by a traffic backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BackendError {
    /// Backend could not be reached.
    #[error("backend unavailable: {0}")]
    Unavailable(String),

    /// An added rule id is already installed and not being removed.
    #[error("rule id {0} already in use")]
    IdInUse(RuleId),

    /// Request was refused for another reason (malformed rule, quota).
    #[error("backend rejected update: {0}")]
    Rejected(String),
}

/// Declarative rule backend.
#[async_trait]
pub trait TrafficBackend: Send + Sync {
    /// Ids of every rule currently installed.
    async fn list_installed_rule_ids(&self) -> Result<BTreeSet<RuleId>, BackendError>;

    /// Remove `remove_ids` and install `add_rules` in one step.
    ///
    /// Either the whole update applies or none of it does.
    async fn atomic_replace(
        &self,
        remove_ids: &BTreeSet<RuleId>,
        add_rules: Vec<CompiledRule>,
    ) -> Result<(), BackendError>;
}
