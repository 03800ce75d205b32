//! Cross-surface message protocol.
//!
//! Requests are `{"type": KIND, "data": ...}`. Replies keep the shapes
//! existing panels expect:
//! - `{"success": bool, "error"?: string}` for commands
//! - `{"config": ...}` for `GET_CONFIG`
//! - `{"success": true, "data": ...}` for queries
//! - `{"error": "Unknown message type: KIND"}` for unknown kinds

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::rules::profile::{NewProfile, ProfilePatch};
use crate::rules::HeaderConfig;
use crate::store::HeaderPatch;

#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("message is not an object with a string \"type\"")]
    NotAMessage,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Invalid {kind} data: {reason}")]
    MalformedData { kind: String, reason: String },
}

impl ProtocolError {
    pub fn into_reply(self) -> Reply {
        match self {
            ProtocolError::UnknownType(_) | ProtocolError::NotAMessage => Reply::error(self.to_string()),
            ProtocolError::MalformedData { .. } => Reply::failed(self.to_string()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeaderInput {
    pub name: String,
    pub value: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct HeaderUpdate {
    pub id: String,
    #[serde(flatten)]
    pub patch: HeaderPatch,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Target {
    pub id: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlPatternInput {
    pub url_pattern: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProfileUpdate {
    pub id: String,
    #[serde(flatten)]
    pub patch: ProfilePatch,
}

/// A parsed request.
#[derive(Debug, Clone)]
pub enum Message {
    UpdateHeaders(HeaderConfig),
    GetConfig,
    GetStatus,
    ToggleExtension,
    ClearRules,
    AddHeader(HeaderInput),
    UpdateHeader(HeaderUpdate),
    RemoveHeader(Target),
    ToggleHeader(Target),
    SetUrlPattern(UrlPatternInput),
    ResetConfig,
    ExportConfig,
    ImportConfig(Value),
    ListProfiles,
    CreateProfile(NewProfile),
    UpdateProfile(ProfileUpdate),
    DeleteProfile(Target),
    SetActiveProfile(Target),
}

impl Message {
    /// Parse a raw request.
    pub fn parse(raw: Value) -> Result<Self, ProtocolError> {
        let Value::Object(mut fields) = raw else {
            return Err(ProtocolError::NotAMessage);
        };
        let kind = match fields.remove("type") {
            Some(Value::String(kind)) => kind,
            _ => return Err(ProtocolError::NotAMessage),
        };
        let data = fields.remove("data").unwrap_or(Value::Null);

        let message = match kind.as_str() {
            "UPDATE_HEADERS" => {
                if data.is_null() || data.as_object().is_some_and(|o| o.is_empty()) {
                    return Err(malformed(&kind, "Invalid config data"));
                }
                Message::UpdateHeaders(payload(&kind, data)?)
            }
            "GET_CONFIG" => Message::GetConfig,
            "GET_STATUS" => Message::GetStatus,
            "TOGGLE_EXTENSION" => Message::ToggleExtension,
            "CLEAR_RULES" => Message::ClearRules,
            "ADD_HEADER" => Message::AddHeader(payload(&kind, data)?),
            "UPDATE_HEADER" => Message::UpdateHeader(payload(&kind, data)?),
            "REMOVE_HEADER" => Message::RemoveHeader(payload(&kind, data)?),
            "TOGGLE_HEADER" => Message::ToggleHeader(payload(&kind, data)?),
            "SET_URL_PATTERN" => Message::SetUrlPattern(payload(&kind, data)?),
            "RESET_CONFIG" => Message::ResetConfig,
            "EXPORT_CONFIG" => Message::ExportConfig,
            "IMPORT_CONFIG" => Message::ImportConfig(data),
            "LIST_PROFILES" => Message::ListProfiles,
            "CREATE_PROFILE" => Message::CreateProfile(payload(&kind, data)?),
            "UPDATE_PROFILE" => Message::UpdateProfile(payload(&kind, data)?),
            "DELETE_PROFILE" => Message::DeleteProfile(payload(&kind, data)?),
            "SET_ACTIVE_PROFILE" => Message::SetActiveProfile(payload(&kind, data)?),
            _ => return Err(ProtocolError::UnknownType(kind)),
        };
        Ok(message)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Message::UpdateHeaders(_) => "UPDATE_HEADERS",
            Message::GetConfig => "GET_CONFIG",
            Message::GetStatus => "GET_STATUS",
            Message::ToggleExtension => "TOGGLE_EXTENSION",
            Message::ClearRules => "CLEAR_RULES",
            Message::AddHeader(_) => "ADD_HEADER",
            Message::UpdateHeader(_) => "UPDATE_HEADER",
            Message::RemoveHeader(_) => "REMOVE_HEADER",
            Message::ToggleHeader(_) => "TOGGLE_HEADER",
            Message::SetUrlPattern(_) => "SET_URL_PATTERN",
            Message::ResetConfig => "RESET_CONFIG",
            Message::ExportConfig => "EXPORT_CONFIG",
            Message::ImportConfig(_) => "IMPORT_CONFIG",
            Message::ListProfiles => "LIST_PROFILES",
            Message::CreateProfile(_) => "CREATE_PROFILE",
            Message::UpdateProfile(_) => "UPDATE_PROFILE",
            Message::DeleteProfile(_) => "DELETE_PROFILE",
            Message::SetActiveProfile(_) => "SET_ACTIVE_PROFILE",
        }
    }
}

fn payload<T: for<'de> Deserialize<'de>>(kind: &str, data: Value) -> Result<T, ProtocolError> {
    serde_json::from_value(data).map_err(|e| malformed(kind, e.to_string()))
}

fn malformed(kind: &str, reason: impl Into<String>) -> ProtocolError {
    ProtocolError::MalformedData {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

/// A reply, serialized without a tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Reply {
    Ack {
        success: bool,
        #[serde(skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
    Config {
        config: HeaderConfig,
    },
    Data {
        success: bool,
        data: Value,
    },
    Error {
        error: String,
    },
}

impl Reply {
    pub fn ok() -> Self {
        Reply::Ack {
            success: true,
            error: None,
        }
    }

    pub fn failed(error: impl Into<String>) -> Self {
        Reply::Ack {
            success: false,
            error: Some(error.into()),
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Reply::Error { error: error.into() }
    }

    /// Successful query reply. Unserializable data becomes a failure.
    pub fn data<T: Serialize>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Reply::Data {
                success: true,
                data,
            },
            Err(e) => Reply::failed(e.to_string()),
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(
            self,
            Reply::Ack { success: true, .. } | Reply::Data { success: true, .. } | Reply::Config { .. }
        )
    }
}
