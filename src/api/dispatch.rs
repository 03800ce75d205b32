//! Message handling.
//!
//! # Data Flow
//! ```text
//! raw JSON → Message::parse
//!     → edit: validate → ConfigStore mutation (persist) → SyncHandle::apply
//!       (the worker reads the working copy when the pass starts)
//!     → query: ConfigStore / ProfileStore snapshot
//!     → Reply
//! ```
//!
//! Edits reply only after the sync pass for them finished, so a failed
//! pass reaches the caller as `{success: false, error}`.

use serde_json::Value;
use std::sync::Arc;

use crate::api::messages::{HeaderInput, HeaderUpdate, Message, Reply};
use crate::engine::SyncHandle;
use crate::rules::validators::{check_header, check_url_pattern, validate_header_name, validate_header_value};
use crate::rules::FieldError;
use crate::store::export::ExportDocument;
use crate::store::{now_ms, ConfigStore, ProfileStore};

/// Message API over the stores and the sync queue.
pub struct HeaderService {
    config: Arc<ConfigStore>,
    profiles: Arc<ProfileStore>,
    sync: SyncHandle,
}

impl HeaderService {
    pub fn new(config: Arc<ConfigStore>, profiles: Arc<ProfileStore>, sync: SyncHandle) -> Self {
        Self {
            config,
            profiles,
            sync,
        }
    }

    pub fn config_store(&self) -> &ConfigStore {
        &self.config
    }

    /// Parse and handle a raw request.
    pub async fn handle_value(&self, raw: Value) -> Reply {
        match Message::parse(raw) {
            Ok(message) => self.handle(message).await,
            Err(e) => {
                tracing::warn!(error = %e, "Rejected message");
                e.into_reply()
            }
        }
    }

    pub async fn handle(&self, message: Message) -> Reply {
        let kind = message.kind();
        tracing::debug!(kind, "Handling message");
        let reply = self.dispatch(message).await;
        if !reply.is_success() {
            tracing::warn!(kind, reply = ?reply, "Message failed");
        }
        reply
    }

    async fn dispatch(&self, message: Message) -> Reply {
        match message {
            Message::UpdateHeaders(config) => {
                self.config.save(config).await;
                self.sync_current().await
            }
            Message::GetConfig => Reply::Config {
                config: self.config.snapshot(),
            },
            Message::GetStatus => Reply::data(&self.config.snapshot().status()),
            Message::ToggleExtension => {
                self.config.toggle_enabled().await;
                self.sync_current().await
            }
            Message::ClearRules => match self.sync.clear_all().await {
                Ok(_) => Reply::ok(),
                Err(e) => Reply::failed(e.to_string()),
            },
            Message::AddHeader(input) => self.add_header(input).await,
            Message::UpdateHeader(update) => self.update_header(update).await,
            Message::RemoveHeader(target) => match self.config.remove_header(&target.id).await {
                Some(_) => self.sync_current().await,
                None => header_not_found(&target.id),
            },
            Message::ToggleHeader(target) => match self.config.toggle_header(&target.id).await {
                Some(_) => self.sync_current().await,
                None => header_not_found(&target.id),
            },
            Message::SetUrlPattern(input) => {
                if let Err(e) = check_url_pattern(&input.url_pattern) {
                    return Reply::failed(e.to_string());
                }
                self.config.set_url_pattern(&input.url_pattern).await;
                self.sync_current().await
            }
            Message::ResetConfig => {
                self.config.reset().await;
                self.sync_current().await
            }
            Message::ExportConfig => {
                let book = self.profiles.list().await;
                Reply::data(&ExportDocument::new(&self.config.snapshot(), &book))
            }
            Message::ImportConfig(document) => self.import(document).await,
            Message::ListProfiles => Reply::data(&self.profiles.list().await),
            Message::CreateProfile(input) => {
                if input.name.trim().is_empty() {
                    return Reply::failed("Profile name must not be empty");
                }
                match self.profiles.create(input).await {
                    Some(profile) => Reply::data(&profile),
                    None => Reply::failed("Profile was not created"),
                }
            }
            Message::UpdateProfile(update) => match self.profiles.update(&update.id, update.patch).await {
                Some(profile) => Reply::data(&profile),
                None => profile_not_found(&update.id),
            },
            Message::DeleteProfile(target) => match self.profiles.delete(&target.id).await {
                Some(book) => Reply::data(&book),
                None => profile_not_found(&target.id),
            },
            Message::SetActiveProfile(target) => {
                if self.profiles.set_active(&target.id).await {
                    Reply::ok()
                } else {
                    profile_not_found(&target.id)
                }
            }
        }
    }

    async fn add_header(&self, input: HeaderInput) -> Reply {
        if let Err(e) = check_header(&input.name, &input.value) {
            return Reply::failed(e.to_string());
        }
        let (entry, _) = self.config.add_header(&input.name, &input.value).await;
        match self.sync_current().await {
            Reply::Ack { success: true, .. } => Reply::data(&entry),
            failed => failed,
        }
    }

    async fn update_header(&self, update: HeaderUpdate) -> Reply {
        if let Some(name) = &update.patch.name {
            if !validate_header_name(name) {
                return Reply::failed(FieldError::HeaderName(name.clone()).to_string());
            }
        }
        if let Some(value) = &update.patch.value {
            if !validate_header_value(value) {
                let name = update
                    .patch
                    .name
                    .clone()
                    .or_else(|| self.config.snapshot().find_header(&update.id).map(|h| h.name.clone()))
                    .unwrap_or_default();
                return Reply::failed(FieldError::HeaderValue { name }.to_string());
            }
        }
        match self.config.update_header(&update.id, update.patch).await {
            Some(_) => self.sync_current().await,
            None => header_not_found(&update.id),
        }
    }

    async fn import(&self, document: Value) -> Reply {
        let document = match ExportDocument::import(document) {
            Ok(document) => document,
            Err(e) => return Reply::failed(e.to_string()),
        };
        let (config, book) = document.into_parts(now_ms());
        tracing::info!(
            headers = config.headers.len(),
            profiles = book.profiles.len(),
            "Importing configuration"
        );
        self.profiles.replace(book).await;
        self.config.save(config).await;
        self.sync_current().await
    }

    /// Install the working copy. Runs after the edit was saved, so the pass
    /// covers it (and any edit saved since).
    async fn sync_current(&self) -> Reply {
        match self.sync.apply().await {
            Ok(_) => Reply::ok(),
            Err(e) => Reply::failed(e.to_string()),
        }
    }
}

fn header_not_found(id: &str) -> Reply {
    Reply::failed(format!("Header not found: {id}"))
}

fn profile_not_found(id: &str) -> Reply {
    Reply::failed(format!("Profile not found: {id}"))
}
