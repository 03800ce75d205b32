//! In-process declarative rule table.
//!
//! # Responsibilities
//! - Hold installed rules keyed by id
//! - Apply replace requests atomically (validate everything, then mutate)
//! - Evaluate installed rules against a request URL and resource type
//!
//! # Design Decisions
//! - Removing an id that is not installed is ignored
//! - Adding an id that stays installed fails with `IdInUse`
//! - Higher priority wins per header name; ties go to the lower rule id

use async_trait::async_trait;
use axum::http::{HeaderMap, HeaderName, HeaderValue};
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::{Mutex, MutexGuard};

use crate::engine::backend::{BackendError, TrafficBackend};
use crate::engine::url_filter::UrlFilter;
use crate::rules::{CompiledRule, HeaderDirective, HeaderOperation, ResourceType, RuleId};

/// Default cap on installed rules.
pub const DEFAULT_MAX_RULES: usize = 5000;

/// Rule table used as the traffic backend inside this process.
#[derive(Debug)]
pub struct InMemoryRuleTable {
    rules: Mutex<BTreeMap<RuleId, CompiledRule>>,
    max_rules: usize,
}

impl Default for InMemoryRuleTable {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryRuleTable {
    pub fn new() -> Self {
        Self::with_max_rules(DEFAULT_MAX_RULES)
    }

    pub fn with_max_rules(max_rules: usize) -> Self {
        Self {
            rules: Mutex::new(BTreeMap::new()),
            max_rules,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BTreeMap<RuleId, CompiledRule>> {
        self.rules.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Snapshot of installed rules ordered by id.
    pub fn rules(&self) -> Vec<CompiledRule> {
        self.lock().values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Header directives that apply to a request, one per header name.
    pub fn evaluate(&self, url: &str, resource_type: ResourceType) -> Vec<HeaderDirective> {
        let rules = self.lock();
        let mut matching: Vec<&CompiledRule> = rules
            .values()
            .filter(|r| r.condition.resource_types.contains(&resource_type))
            .filter(|r| UrlFilter::parse(&r.condition.url_filter).matches(url))
            .collect();
        matching.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.id.cmp(&b.id)));

        let mut seen = HashSet::new();
        let mut directives = Vec::new();
        for rule in matching {
            for directive in rule.action.request_headers() {
                if seen.insert(directive.header.to_ascii_lowercase()) {
                    directives.push(directive.clone());
                }
            }
        }
        directives
    }

    /// Apply matching directives to `headers`. Returns how many applied.
    pub fn apply(&self, url: &str, resource_type: ResourceType, headers: &mut HeaderMap) -> usize {
        let mut applied = 0;
        for directive in self.evaluate(url, resource_type) {
            let Ok(name) = HeaderName::from_bytes(directive.header.as_bytes()) else {
                tracing::warn!(header = %directive.header, "Skipping invalid header name");
                continue;
            };
            let value = directive
                .value
                .as_deref()
                .map(HeaderValue::from_str)
                .transpose();
            match (directive.operation, value) {
                (HeaderOperation::Remove, _) => {
                    headers.remove(&name);
                }
                (HeaderOperation::Set, Ok(Some(value))) => {
                    headers.insert(name, value);
                }
                (HeaderOperation::Append, Ok(Some(value))) => {
                    headers.append(name, value);
                }
                _ => {
                    tracing::warn!(header = %directive.header, "Skipping directive with invalid value");
                    continue;
                }
            }
            applied += 1;
        }
        applied
    }
}

#[async_trait]
impl TrafficBackend for InMemoryRuleTable {
    async fn list_installed_rule_ids(&self) -> Result<BTreeSet<RuleId>, BackendError> {
        Ok(self.lock().keys().copied().collect())
    }

    async fn atomic_replace(
        &self,
        remove_ids: &BTreeSet<RuleId>,
        add_rules: Vec<CompiledRule>,
    ) -> Result<(), BackendError> {
        let mut rules = self.lock();

        let mut adding = BTreeSet::new();
        for rule in &add_rules {
            if rule.id.0 == 0 {
                return Err(BackendError::Rejected("rule id must be positive".into()));
            }
            let still_installed = rules.contains_key(&rule.id) && !remove_ids.contains(&rule.id);
            if still_installed || !adding.insert(rule.id) {
                return Err(BackendError::IdInUse(rule.id));
            }
        }

        let remaining = rules.keys().filter(|id| !remove_ids.contains(id)).count();
        if remaining + add_rules.len() > self.max_rules {
            return Err(BackendError::Rejected(format!(
                "rule limit of {} exceeded",
                self.max_rules
            )));
        }

        rules.retain(|id, _| !remove_ids.contains(id));
        for rule in add_rules {
            rules.insert(rule.id, rule);
        }
        Ok(())
    }
}
