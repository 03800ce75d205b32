//! Profiles: named groups of header rules.
//!
//! Profiles are persisted, exported and imported, but the sync engine
//! compiles only the working [`HeaderConfig`](crate::rules::HeaderConfig).

use serde::{Deserialize, Serialize};

use crate::rules::model::{new_entry_id, ALL_URLS};

/// Id of the profile that always exists in an empty book.
pub const DEFAULT_PROFILE_ID: &str = "default";

/// Direction a rule applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RuleType {
    #[default]
    Request,
    Response,
}

/// What a rule header does to the matching header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderAction {
    #[default]
    Set,
    Remove,
    Modify,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct RuleHeader {
    pub id: String,
    pub name: String,
    pub value: String,
    pub enabled: bool,
    pub action: HeaderAction,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderRule {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    #[serde(rename = "type")]
    pub rule_type: RuleType,
    pub url_pattern: String,
    pub headers: Vec<RuleHeader>,
    pub created_at: u64,
    pub updated_at: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Profile {
    pub id: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub rules: Vec<HeaderRule>,
    pub enabled: bool,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Profile {
    /// The profile every empty book starts with.
    pub fn default_profile(now: u64) -> Self {
        Self {
            id: DEFAULT_PROFILE_ID.to_string(),
            name: "Default".to_string(),
            description: Some("Default header modification profile".to_string()),
            rules: Vec::new(),
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Input for creating a profile; id and timestamps are assigned.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct NewProfile {
    pub name: String,
    pub description: Option<String>,
    pub rules: Vec<HeaderRule>,
    pub enabled: bool,
}

/// Partial profile update.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct ProfilePatch {
    pub name: Option<String>,
    pub description: Option<String>,
    pub rules: Option<Vec<HeaderRule>>,
    pub enabled: Option<bool>,
}

/// All profiles plus the active selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileBook {
    pub profiles: Vec<Profile>,
    pub active_profile: String,
}

impl ProfileBook {
    pub fn new(now: u64) -> Self {
        Self {
            profiles: vec![Profile::default_profile(now)],
            active_profile: DEFAULT_PROFILE_ID.to_string(),
        }
    }

    pub fn get(&self, id: &str) -> Option<&Profile> {
        self.profiles.iter().find(|p| p.id == id)
    }

    pub fn active(&self) -> Option<&Profile> {
        self.get(&self.active_profile)
    }

    /// Add a profile and make it active. Returns its id.
    pub fn create(&mut self, input: NewProfile, now: u64) -> String {
        let id = new_entry_id();
        self.profiles.push(Profile {
            id: id.clone(),
            name: input.name,
            description: input.description,
            rules: input.rules,
            enabled: input.enabled,
            created_at: now,
            updated_at: now,
        });
        self.active_profile = id.clone();
        id
    }

    /// Apply a patch. Returns false if no profile has `id`.
    pub fn update(&mut self, id: &str, patch: ProfilePatch, now: u64) -> bool {
        let Some(profile) = self.profiles.iter_mut().find(|p| p.id == id) else {
            return false;
        };
        if let Some(name) = patch.name {
            profile.name = name;
        }
        if let Some(description) = patch.description {
            profile.description = Some(description);
        }
        if let Some(rules) = patch.rules {
            profile.rules = rules;
        }
        if let Some(enabled) = patch.enabled {
            profile.enabled = enabled;
        }
        profile.updated_at = now;
        true
    }

    /// Remove a profile. Deleting the active one activates the first
    /// remaining profile, or the default id when none remain.
    pub fn delete(&mut self, id: &str) -> bool {
        let before = self.profiles.len();
        self.profiles.retain(|p| p.id != id);
        if self.profiles.len() == before {
            return false;
        }
        if self.active_profile == id {
            self.active_profile = self
                .profiles
                .first()
                .map(|p| p.id.clone())
                .unwrap_or_else(|| DEFAULT_PROFILE_ID.to_string());
        }
        true
    }

    /// Select the active profile. Returns false if no profile has `id`.
    pub fn set_active(&mut self, id: &str) -> bool {
        if self.get(id).is_none() {
            return false;
        }
        self.active_profile = id.to_string();
        true
    }
}

/// A fresh request rule matching all URLs.
pub fn new_rule(name: impl Into<String>, now: u64) -> HeaderRule {
    HeaderRule {
        id: new_entry_id(),
        name: name.into(),
        enabled: true,
        rule_type: RuleType::Request,
        url_pattern: ALL_URLS.to_string(),
        headers: Vec::new(),
        created_at: now,
        updated_at: now,
    }
}
