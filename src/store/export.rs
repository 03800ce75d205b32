//! Configuration export and import.
//!
//! Import is all-or-nothing: the document is parsed strictly and checked
//! completely before anything is applied.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::rules::validators::validate_url_pattern;
use crate::rules::{HeaderConfig, HeaderEntry, Profile, ProfileBook};

/// Version written into exports.
pub const EXPORT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum ImportError {
    #[error("invalid export document: {0}")]
    Malformed(#[from] serde_json::Error),

    #[error("unsupported export version {0}")]
    UnsupportedVersion(String),

    #[error("invalid URL pattern: {0}")]
    InvalidUrlPattern(String),

    #[error("active profile {0} is not in the document")]
    UnknownActiveProfile(String),
}

/// A header as exported; every field required on import.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ExportedHeader {
    pub id: String,
    pub name: String,
    pub value: String,
    pub enabled: bool,
}

/// A header configuration as exported; every field required on import.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct ExportedConfig {
    pub headers: Vec<ExportedHeader>,
    pub enabled: bool,
    pub url_pattern: String,
}

impl From<&HeaderConfig> for ExportedConfig {
    fn from(config: &HeaderConfig) -> Self {
        Self {
            headers: config
                .headers
                .iter()
                .map(|h| ExportedHeader {
                    id: h.id.clone(),
                    name: h.name.clone(),
                    value: h.value.clone(),
                    enabled: h.enabled,
                })
                .collect(),
            enabled: config.enabled,
            url_pattern: config.url_pattern.clone(),
        }
    }
}

impl From<ExportedConfig> for HeaderConfig {
    fn from(exported: ExportedConfig) -> Self {
        HeaderConfig {
            headers: exported
                .headers
                .into_iter()
                .map(|h| HeaderEntry {
                    id: h.id,
                    name: h.name,
                    value: h.value,
                    enabled: h.enabled,
                })
                .collect(),
            enabled: exported.enabled,
            url_pattern: exported.url_pattern,
        }
        .normalized()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: String,
    pub export_time: DateTime<Utc>,
    pub config: ExportedConfig,
    pub profiles: Vec<Profile>,
    pub active_profile: String,
}

impl ExportDocument {
    pub fn new(config: &HeaderConfig, book: &ProfileBook) -> Self {
        Self {
            version: EXPORT_VERSION.to_string(),
            export_time: Utc::now(),
            config: config.into(),
            profiles: book.profiles.clone(),
            active_profile: book.active_profile.clone(),
        }
    }

    /// Parse and check a document. Accepts the document itself or a JSON
    /// string containing it.
    pub fn import(value: Value) -> Result<Self, ImportError> {
        let document: ExportDocument = match value {
            Value::String(text) => serde_json::from_str(&text)?,
            other => serde_json::from_value(other)?,
        };
        document.check()?;
        Ok(document)
    }

    fn check(&self) -> Result<(), ImportError> {
        let major = self.version.split('.').next().unwrap_or_default();
        let supported = EXPORT_VERSION.split('.').next().unwrap_or_default();
        if major != supported {
            return Err(ImportError::UnsupportedVersion(self.version.clone()));
        }
        if !validate_url_pattern(&self.config.url_pattern) {
            return Err(ImportError::InvalidUrlPattern(self.config.url_pattern.clone()));
        }
        if !self.profiles.is_empty() && !self.profiles.iter().any(|p| p.id == self.active_profile) {
            return Err(ImportError::UnknownActiveProfile(self.active_profile.clone()));
        }
        Ok(())
    }

    /// Split into what the stores hold. An empty profile list yields the
    /// default book.
    pub fn into_parts(self, now: u64) -> (HeaderConfig, ProfileBook) {
        let book = if self.profiles.is_empty() {
            ProfileBook::new(now)
        } else {
            ProfileBook {
                profiles: self.profiles,
                active_profile: self.active_profile,
            }
        };
        (self.config.into(), book)
    }
}
