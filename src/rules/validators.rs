//! Input validators for editing surfaces.
//!
//! # Responsibilities
//! - URL pattern syntax (sentinel, single wildcard, absolute URL)
//! - Header name grammar (visible ASCII, non-empty)
//! - Header value grammar (no control characters except tab)
//!
//! These are advisory. The sync engine applies its own valid-header filter
//! regardless, since persisted data may be hand-edited or imported.

use thiserror::Error;
use url::Url;

use crate::rules::model::ALL_URLS;

/// Field-level validation failure, shown next to the offending input.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FieldError {
    #[error("invalid URL pattern: {0}")]
    UrlPattern(String),

    #[error("invalid header name: {0:?}")]
    HeaderName(String),

    #[error("header value for {name:?} contains control characters")]
    HeaderValue { name: String },
}

/// Check a URL pattern. Never panics.
pub fn validate_url_pattern(pattern: &str) -> bool {
    if pattern == ALL_URLS || pattern == "*" {
        return true;
    }

    if pattern.contains('*') {
        let mut parts = pattern.split('*');
        let prefix = parts.next().unwrap_or_default();
        if parts.count() > 1 {
            return false;
        }
        if !prefix.is_empty() && !(prefix.starts_with("http://") || prefix.starts_with("https://")) {
            return false;
        }
        return true;
    }

    Url::parse(pattern).is_ok()
}

/// Check a header name: non-empty and every char in 0x21..=0x7E.
pub fn validate_header_name(name: &str) -> bool {
    if name.trim().is_empty() {
        return false;
    }
    name.chars().all(|c| ('\x21'..='\x7e').contains(&c))
}

/// Check a header value: no control characters other than horizontal tab.
pub fn validate_header_value(value: &str) -> bool {
    !value
        .chars()
        .any(|c| matches!(c, '\x00'..='\x08' | '\x0a'..='\x1f' | '\x7f'))
}

pub fn check_url_pattern(pattern: &str) -> Result<(), FieldError> {
    if validate_url_pattern(pattern) {
        Ok(())
    } else {
        Err(FieldError::UrlPattern(pattern.to_string()))
    }
}

pub fn check_header(name: &str, value: &str) -> Result<(), FieldError> {
    if !validate_header_name(name) {
        return Err(FieldError::HeaderName(name.to_string()));
    }
    if !validate_header_value(value) {
        return Err(FieldError::HeaderValue {
            name: name.to_string(),
        });
    }
    Ok(())
}
