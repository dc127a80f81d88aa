// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Post-deserialization configuration validation.
//!
//! Figment guarantees the types are right; this pass checks value ranges
//! and cross-field requirements that serde cannot express.

use thiserror::Error;

use crate::model::FerryConfig;

/// A single configuration validation failure.
#[derive(Debug, Error)]
#[error("{key}: {message}")]
pub struct ConfigError {
    /// Dotted config key the error refers to, e.g. `queue.batch_size`.
    pub key: String,
    /// Human-readable description of the problem.
    pub message: String,
}

impl ConfigError {
    fn new(key: &str, message: impl Into<String>) -> Self {
        Self {
            key: key.to_string(),
            message: message.into(),
        }
    }
}

/// Validate a loaded configuration, collecting every failure.
pub fn validate_config(config: &FerryConfig) -> Result<(), Vec<ConfigError>> {
    let mut errors = Vec::new();

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.service.log_level.as_str()) {
        errors.push(ConfigError::new(
            "service.log_level",
            format!(
                "unknown log level {:?}, expected one of {valid_levels:?}",
                config.service.log_level
            ),
        ));
    }

    if config.queue.batch_size == 0 {
        errors.push(ConfigError::new("queue.batch_size", "must be at least 1"));
    }
    if config.queue.poll_limit == 0 {
        errors.push(ConfigError::new("queue.poll_limit", "must be at least 1"));
    }
    if config.queue.max_retries < 1 {
        errors.push(ConfigError::new("queue.max_retries", "must be at least 1"));
    }
    if config.queue.processing_timeout_ms == 0 {
        errors.push(ConfigError::new(
            "queue.processing_timeout_ms",
            "must be greater than zero",
        ));
    }
    if config.queue.retention_days < 1 {
        errors.push(ConfigError::new(
            "queue.retention_days",
            "must be at least 1 day",
        ));
    }
    if config.queue.callback_rate_limit == 0 {
        errors.push(ConfigError::new(
            "queue.callback_rate_limit",
            "must be at least 1",
        ));
    }

    if !(0.0..=1.0).contains(&config.alerts.error_rate) {
        errors.push(ConfigError::new(
            "alerts.error_rate",
            "must be a fraction between 0.0 and 1.0",
        ));
    }

    if config.graph.max_retries == 0 {
        errors.push(ConfigError::new("graph.max_retries", "must be at least 1"));
    }
    if config.graph.initial_retry_delay_ms > config.graph.max_retry_delay_ms {
        errors.push(ConfigError::new(
            "graph.initial_retry_delay_ms",
            "must not exceed graph.max_retry_delay_ms",
        ));
    }

    if config.n8n.enabled && config.n8n.webhook_url.is_none() {
        errors.push(ConfigError::new(
            "n8n.webhook_url",
            "required when n8n.enabled is true",
        ));
    }
    if config.n8n.enabled && config.n8n.callback_secret.is_none() {
        errors.push(ConfigError::new(
            "n8n.callback_secret",
            "required when n8n.enabled is true",
        ));
    }

    if config.server.public_base_url.ends_with('/') {
        errors.push(ConfigError::new(
            "server.public_base_url",
            "must not end with a trailing slash",
        ));
    }

    if errors.is_empty() { Ok(()) } else { Err(errors) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::FerryConfig;

    #[test]
    fn default_config_is_valid() {
        let config = FerryConfig::default();
        assert!(validate_config(&config).is_ok());
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        let mut config = FerryConfig::default();
        config.queue.batch_size = 0;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.key == "queue.batch_size"));
    }

    #[test]
    fn enabled_n8n_requires_url_and_secret() {
        let mut config = FerryConfig::default();
        config.n8n.enabled = true;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.key == "n8n.webhook_url"));
        assert!(errors.iter().any(|e| e.key == "n8n.callback_secret"));
    }

    #[test]
    fn error_rate_out_of_range_is_rejected() {
        let mut config = FerryConfig::default();
        config.alerts.error_rate = 1.5;
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.key == "alerts.error_rate"));
    }

    #[test]
    fn bogus_log_level_is_rejected() {
        let mut config = FerryConfig::default();
        config.service.log_level = "loud".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.key == "service.log_level"));
    }

    #[test]
    fn trailing_slash_base_url_is_rejected() {
        let mut config = FerryConfig::default();
        config.server.public_base_url = "https://ferry.example.com/".to_string();
        let errors = validate_config(&config).unwrap_err();
        assert!(errors.iter().any(|e| e.key == "server.public_base_url"));
    }
}
