//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (timeouts > 0, addresses parse)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ServiceConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::fmt;
use std::net::SocketAddr;

use crate::config::schema::{ServiceConfig, StorageKind};

/// One semantic problem in the service configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

/// Check every semantic constraint, collecting all failures.
pub fn validate_config(config: &ServiceConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if config.storage.kind == StorageKind::File && config.storage.path.as_os_str().is_empty() {
        errors.push(ValidationError::new("storage.path", "must be set for file storage"));
    }
    if config.storage.key.trim().is_empty() {
        errors.push(ValidationError::new("storage.key", "must not be empty"));
    }
    if config.storage.profiles_key.trim().is_empty() {
        errors.push(ValidationError::new("storage.profiles_key", "must not be empty"));
    }
    if config.storage.key == config.storage.profiles_key {
        errors.push(ValidationError::new(
            "storage.profiles_key",
            "must differ from storage.key",
        ));
    }

    if config.sync.backend_timeout_ms == 0 {
        errors.push(ValidationError::new("sync.backend_timeout_ms", "must be greater than 0"));
    }
    if config.sync.max_id_attempts == 0 {
        errors.push(ValidationError::new("sync.max_id_attempts", "must be greater than 0"));
    }
    if config.sync.queue_capacity == 0 {
        errors.push(ValidationError::new("sync.queue_capacity", "must be greater than 0"));
    }
    if config.sync.max_rules == 0 {
        errors.push(ValidationError::new("sync.max_rules", "must be greater than 0"));
    }

    if config.retries.base_delay_ms > config.retries.max_delay_ms {
        errors.push(ValidationError::new(
            "retries.base_delay_ms",
            "must not exceed retries.max_delay_ms",
        ));
    }

    if config.api.enabled && config.api.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::new(
            "api.bind_address",
            format!("'{}' is not a socket address", config.api.bind_address),
        ));
    }
    if matches!(&config.api.api_key, Some(key) if key.trim().is_empty()) {
        errors.push(ValidationError::new("api.api_key", "must not be blank when set"));
    }
    if config.api.request_timeout_secs == 0 {
        errors.push(ValidationError::new("api.request_timeout_secs", "must be greater than 0"));
    }

    if config.observability.metrics_enabled
        && config.observability.metrics_address.parse::<SocketAddr>().is_err()
    {
        errors.push(ValidationError::new(
            "observability.metrics_address",
            format!("'{}' is not a socket address", config.observability.metrics_address),
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
