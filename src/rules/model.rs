//! Header configuration and compiled rule types.
//!
//! # Data Flow
//! ```text
//! HeaderConfig (user owned, persisted)
//!     → valid_headers() (enabled + non-empty trimmed name/value)
//!     → compiler.rs
//!     → CompiledRule (backend facing, never edited)
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pattern value meaning "match all URLs".
pub const ALL_URLS: &str = "<all_urls>";

/// URL filter installed when the configuration uses [`ALL_URLS`].
pub const MATCH_ALL_FILTER: &str = "*";

/// Priority of the single compiled rule.
pub const RULE_PRIORITY: u32 = 1;

/// One header modification directive.
///
/// Missing fields in persisted data read as empty / disabled.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct HeaderEntry {
    pub id: String,
    pub name: String,
    pub value: String,
    pub enabled: bool,
}

impl HeaderEntry {
    /// Create an enabled entry with a fresh id.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            id: new_entry_id(),
            name: name.into(),
            value: value.into(),
            enabled: true,
        }
    }

    /// True if this entry takes part in compilation.
    pub fn is_valid(&self) -> bool {
        self.enabled && !self.name.trim().is_empty() && !self.value.trim().is_empty()
    }
}

/// Generate a locally unique entry id.
pub fn new_entry_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()
}

/// The configuration snapshot consumed by the sync engine.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default, rename_all = "camelCase")]
pub struct HeaderConfig {
    /// Header directives in insertion order.
    pub headers: Vec<HeaderEntry>,
    /// Master switch.
    pub enabled: bool,
    /// Either [`ALL_URLS`] or a wildcard / URL literal.
    pub url_pattern: String,
}

impl Default for HeaderConfig {
    fn default() -> Self {
        Self {
            headers: Vec::new(),
            enabled: false,
            url_pattern: ALL_URLS.to_string(),
        }
    }
}

impl HeaderConfig {
    /// Entries that are enabled and have a non-empty trimmed name and value.
    pub fn valid_headers(&self) -> impl Iterator<Item = &HeaderEntry> {
        self.headers.iter().filter(|h| h.is_valid())
    }

    pub fn valid_header_count(&self) -> usize {
        self.valid_headers().count()
    }

    /// True if this configuration has an effect on traffic.
    pub fn is_active(&self) -> bool {
        self.enabled && self.valid_headers().next().is_some()
    }

    /// Status derived from this configuration.
    pub fn status(&self) -> SyncStatus {
        SyncStatus {
            enabled: self.enabled,
            rule_count: if self.enabled { self.valid_header_count() } else { 0 },
            url_pattern: self.url_pattern.clone(),
        }
    }

    /// Fill in values that hand-edited or partial input may leave empty.
    pub fn normalized(mut self) -> Self {
        if self.url_pattern.trim().is_empty() {
            self.url_pattern = ALL_URLS.to_string();
        }
        for header in &mut self.headers {
            if header.id.is_empty() {
                header.id = new_entry_id();
            }
        }
        self
    }

    pub fn find_header(&self, id: &str) -> Option<&HeaderEntry> {
        self.headers.iter().find(|h| h.id == id)
    }
}

/// Status broadcast to observers after each successful pass.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    pub enabled: bool,
    pub rule_count: usize,
    pub url_pattern: String,
}

impl Default for SyncStatus {
    fn default() -> Self {
        HeaderConfig::default().status()
    }
}

/// Identifier of an installed backend rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct RuleId(pub u32);

impl From<u32> for RuleId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl From<RuleId> for u32 {
    fn from(id: RuleId) -> Self {
        id.0
    }
}

impl fmt::Display for RuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation applied to a request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderOperation {
    Set,
    Append,
    Remove,
}

/// One header directive inside a compiled rule.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct HeaderDirective {
    pub header: String,
    pub operation: HeaderOperation,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Rule action.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum RuleAction {
    #[serde(rename_all = "camelCase")]
    ModifyHeaders {
        request_headers: Vec<HeaderDirective>,
    },
}

impl RuleAction {
    pub fn request_headers(&self) -> &[HeaderDirective] {
        match self {
            RuleAction::ModifyHeaders { request_headers } => request_headers,
        }
    }
}

/// Resource types a rule condition may scope to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    MainFrame,
    SubFrame,
    Stylesheet,
    Script,
    Image,
    Font,
    Object,
    #[serde(rename = "xmlhttprequest")]
    XmlHttpRequest,
    Ping,
    CspReport,
    Media,
    Websocket,
    Other,
}

impl ResourceType {
    /// Every resource type, in the order compiled rules list them.
    pub const ALL: [ResourceType; 13] = [
        ResourceType::MainFrame,
        ResourceType::SubFrame,
        ResourceType::Stylesheet,
        ResourceType::Script,
        ResourceType::Image,
        ResourceType::Font,
        ResourceType::Object,
        ResourceType::XmlHttpRequest,
        ResourceType::Ping,
        ResourceType::CspReport,
        ResourceType::Media,
        ResourceType::Websocket,
        ResourceType::Other,
    ];
}

/// Rule condition.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RuleCondition {
    pub url_filter: String,
    pub resource_types: Vec<ResourceType>,
}

/// Backend facing rule derived from a [`HeaderConfig`].
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CompiledRule {
    pub id: RuleId,
    pub priority: u32,
    pub action: RuleAction,
    pub condition: RuleCondition,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(name: &str, value: &str, enabled: bool) -> HeaderEntry {
        HeaderEntry {
            enabled,
            ..HeaderEntry::new(name, value)
        }
    }

    #[test]
    fn test_valid_header_filter() {
        let config = HeaderConfig {
            headers: vec![
                entry("X-One", "1", true),
                entry("  ", "x", true),
                entry("X-Two", "   ", true),
                entry("X-Off", "1", false),
                entry("X-Three", "3", true),
            ],
            enabled: true,
            url_pattern: ALL_URLS.into(),
        };

        let names: Vec<_> = config.valid_headers().map(|h| h.name.as_str()).collect();
        assert_eq!(names, vec!["X-One", "X-Three"]);
        assert!(config.is_active());
        assert_eq!(config.status().rule_count, 2);
    }

    #[test]
    fn test_disabled_config_is_inactive() {
        let config = HeaderConfig {
            headers: vec![entry("X-Test", "1", true)],
            enabled: false,
            url_pattern: ALL_URLS.into(),
        };
        assert!(!config.is_active());
        assert_eq!(config.status().rule_count, 0);
        assert!(!config.status().enabled);
    }

    #[test]
    fn test_lenient_deserialize() {
        let config: HeaderConfig =
            serde_json::from_str(r#"{"headers":[{"name":"X-A","value":"b"}]}"#).unwrap();
        assert!(!config.enabled);
        assert_eq!(config.url_pattern, ALL_URLS);
        assert!(!config.headers[0].enabled);

        let config = config.normalized();
        assert!(!config.headers[0].id.is_empty());
    }

    #[test]
    fn test_rule_wire_shape() {
        let rule = CompiledRule {
            id: RuleId(7),
            priority: RULE_PRIORITY,
            action: RuleAction::ModifyHeaders {
                request_headers: vec![HeaderDirective {
                    header: "X-Test".into(),
                    operation: HeaderOperation::Set,
                    value: Some("1".into()),
                }],
            },
            condition: RuleCondition {
                url_filter: "*".into(),
                resource_types: vec![ResourceType::XmlHttpRequest, ResourceType::CspReport],
            },
        };

        let json = serde_json::to_value(&rule).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["action"]["type"], "modifyHeaders");
        assert_eq!(json["action"]["requestHeaders"][0]["operation"], "set");
        assert_eq!(json["condition"]["urlFilter"], "*");
        assert_eq!(json["condition"]["resourceTypes"][0], "xmlhttprequest");
        assert_eq!(json["condition"]["resourceTypes"][1], "csp_report");
    }
}
