// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration loader using Figment for layered config merging.
//!
//! Supports XDG hierarchy: `./ferry.toml` > `~/.config/ferry/ferry.toml` >
//! `/etc/ferry/ferry.toml` with environment variable overrides via the
//! `FERRY_` prefix.

#![allow(clippy::result_large_err)] // figment::Error is external and cannot be boxed without wrapper

use std::path::Path;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};

use crate::model::FerryConfig;

/// Load configuration from the standard XDG hierarchy with env var overrides.
///
/// Merge order (later overrides earlier):
/// 1. Compiled defaults
/// 2. `/etc/ferry/ferry.toml` (system-wide)
/// 3. `~/.config/ferry/ferry.toml` (user XDG config)
/// 4. `./ferry.toml` (local directory)
/// 5. `FERRY_*` environment variables
pub fn load_config() -> Result<FerryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FerryConfig::default()))
        .merge(Toml::file("/etc/ferry/ferry.toml"))
        .merge(Toml::file(
            dirs::config_dir()
                .map(|d| d.join("ferry/ferry.toml"))
                .unwrap_or_default(),
        ))
        .merge(Toml::file("ferry.toml"))
        .merge(env_provider())
        .extract()
}

/// Load configuration from a TOML string only (no XDG lookup).
///
/// Used for testing and explicit config specification.
pub fn load_config_from_str(toml_content: &str) -> Result<FerryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FerryConfig::default()))
        .merge(Toml::string(toml_content))
        .extract()
}

/// Load configuration from a specific file path with env var overrides.
pub fn load_config_from_path(path: &Path) -> Result<FerryConfig, figment::Error> {
    Figment::new()
        .merge(Serialized::defaults(FerryConfig::default()))
        .merge(Toml::file(path))
        .merge(env_provider())
        .extract()
}

/// Create the environment variable provider using explicit `map()` for
/// section-to-dot mapping.
///
/// Uses `Env::map()` NOT `Env::split("_")` to avoid ambiguity with
/// underscore-containing key names. For example, `FERRY_WEBHOOK_APP_SECRET`
/// must map to `webhook.app_secret`, not `webhook.app.secret`.
fn env_provider() -> Env {
    const SECTIONS: [&str; 10] = [
        "service",
        "server",
        "webhook",
        "n8n",
        "graph",
        "storage",
        "queue",
        "scheduler",
        "alerts",
        "prometheus",
    ];

    Env::prefixed("FERRY_").map(|key| {
        // `key` is the lowercased env var name with prefix stripped.
        // Example: FERRY_WEBHOOK_APP_SECRET -> "webhook_app_secret".
        // Only the leading section name becomes a dot; a field like
        // scheduler_queue_interval_secs must not be split at "queue_".
        let key_str = key.as_str();
        for section in SECTIONS {
            if let Some(rest) = key_str.strip_prefix(section)
                && let Some(rest) = rest.strip_prefix('_')
            {
                return format!("{section}.{rest}").into();
            }
        }
        key_str.to_string().into()
    })
}
