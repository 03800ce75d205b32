//! Compile a header configuration into a backend rule.

use crate::rules::model::{
    CompiledRule, HeaderConfig, HeaderDirective, HeaderOperation, ResourceType, RuleAction,
    RuleCondition, RuleId, ALL_URLS, MATCH_ALL_FILTER, RULE_PRIORITY,
};

/// URL filter for a configured pattern.
pub fn url_filter_for(pattern: &str) -> String {
    if pattern == ALL_URLS {
        MATCH_ALL_FILTER.to_string()
    } else {
        pattern.to_string()
    }
}

/// Build the rule for `config` under `id`.
///
/// Returns `None` when the configuration is inactive (master switch off or
/// no valid headers); nothing should be installed in that case.
pub fn compile(config: &HeaderConfig, id: RuleId) -> Option<CompiledRule> {
    if !config.is_active() {
        return None;
    }

    let request_headers = config
        .valid_headers()
        .map(|h| HeaderDirective {
            header: h.name.clone(),
            operation: HeaderOperation::Set,
            value: Some(h.value.clone()),
        })
        .collect();

    Some(CompiledRule {
        id,
        priority: RULE_PRIORITY,
        action: RuleAction::ModifyHeaders { request_headers },
        condition: RuleCondition {
            url_filter: url_filter_for(&config.url_pattern),
            resource_types: ResourceType::ALL.to_vec(),
        },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::model::HeaderEntry;

    #[test]
    fn test_compile_all_urls() {
        let config = HeaderConfig {
            headers: vec![HeaderEntry::new("X-Test", "1")],
            enabled: true,
            url_pattern: ALL_URLS.into(),
        };

        let rule = compile(&config, RuleId(42)).expect("active config compiles");
        assert_eq!(rule.id, RuleId(42));
        assert_eq!(rule.priority, 1);
        assert_eq!(rule.condition.url_filter, "*");
        assert_eq!(rule.condition.resource_types.len(), 13);
        assert_eq!(
            rule.action.request_headers(),
            &[HeaderDirective {
                header: "X-Test".into(),
                operation: HeaderOperation::Set,
                value: Some("1".into()),
            }]
        );
    }

    #[test]
    fn test_compile_keeps_order_and_pattern() {
        let mut skipped = HeaderEntry::new("X-Skip", "1");
        skipped.enabled = false;
        let config = HeaderConfig {
            headers: vec![
                HeaderEntry::new("X-B", "2"),
                skipped,
                HeaderEntry::new("X-A", "1"),
            ],
            enabled: true,
            url_pattern: "https://example.com/*".into(),
        };

        let rule = compile(&config, RuleId(1)).unwrap();
        let names: Vec<_> = rule
            .action
            .request_headers()
            .iter()
            .map(|d| d.header.as_str())
            .collect();
        assert_eq!(names, vec!["X-B", "X-A"]);
        assert_eq!(rule.condition.url_filter, "https://example.com/*");
    }

    #[test]
    fn test_inactive_compiles_to_nothing() {
        let mut config = HeaderConfig {
            headers: vec![HeaderEntry::new("", "x")],
            enabled: true,
            url_pattern: ALL_URLS.into(),
        };
        assert!(compile(&config, RuleId(1)).is_none());

        config.headers = vec![HeaderEntry::new("X-Test", "1")];
        config.enabled = false;
        assert!(compile(&config, RuleId(1)).is_none());
    }
}
