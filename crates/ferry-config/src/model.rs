// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Configuration model structs for the Ferry webhook pipeline.
//!
//! All structs use `#[serde(deny_unknown_fields)]` to reject unrecognized
//! config keys at startup, providing actionable error messages.

use serde::{Deserialize, Serialize};

/// Top-level Ferry configuration.
///
/// Loaded from TOML files following XDG hierarchy, with environment variable
/// overrides. All sections are optional and default to sensible values,
/// except that `webhook.app_secret`, `webhook.verify_token`, and
/// `n8n.callback_secret` must be set before the gateway will start.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct FerryConfig {
    /// Service identity and logging settings.
    #[serde(default)]
    pub service: ServiceConfig,

    /// HTTP server settings.
    #[serde(default)]
    pub server: ServerConfig,

    /// Meta webhook verification settings.
    #[serde(default)]
    pub webhook: WebhookConfig,

    /// n8n workflow integration settings.
    #[serde(default)]
    pub n8n: N8nConfig,

    /// Meta Graph API client settings.
    #[serde(default)]
    pub graph: GraphConfig,

    /// Storage backend settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Message queue retry and retention settings.
    #[serde(default)]
    pub queue: QueueConfig,

    /// Periodic job cadence settings.
    #[serde(default)]
    pub scheduler: SchedulerConfig,

    /// Alerting threshold settings.
    #[serde(default)]
    pub alerts: AlertsConfig,

    /// Prometheus metrics settings.
    #[serde(default)]
    pub prometheus: PrometheusConfig,
}

/// Service identity and logging configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServiceConfig {
    /// Display name of the service.
    #[serde(default = "default_service_name")]
    pub name: String,

    /// Logging level (trace, debug, info, warn, error).
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            name: default_service_name(),
            log_level: default_log_level(),
        }
    }
}

fn default_service_name() -> String {
    "ferry".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTTP server configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    /// Host address to bind.
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to bind.
    #[serde(default = "default_port")]
    pub port: u16,

    /// Externally reachable base URL, used to build the n8n callback URL.
    #[serde(default = "default_public_base_url")]
    pub public_base_url: String,

    /// Bearer token protecting the operational API. `None` disables those routes.
    #[serde(default)]
    pub bearer_token: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            public_base_url: default_public_base_url(),
            bearer_token: None,
        }
    }
}

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

/// Meta webhook verification configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WebhookConfig {
    /// Meta app secret used to verify `X-Hub-Signature-256`. `None` rejects all POSTs.
    #[serde(default)]
    pub app_secret: Option<String>,

    /// Static verify token for the GET subscription handshake.
    #[serde(default)]
    pub verify_token: Option<String>,
}

/// n8n workflow integration configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct N8nConfig {
    /// Enable forwarding messages to n8n. When false, items stay queued.
    #[serde(default)]
    pub enabled: bool,

    /// n8n workflow webhook URL messages are forwarded to.
    #[serde(default)]
    pub webhook_url: Option<String>,

    /// Shared secret n8n must echo in `X-Callback-Secret`.
    #[serde(default)]
    pub callback_secret: Option<String>,

    /// Timeout for the forward request in milliseconds.
    #[serde(default = "default_n8n_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for N8nConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            callback_secret: None,
            timeout_ms: default_n8n_timeout_ms(),
        }
    }
}

fn default_n8n_timeout_ms() -> u64 {
    30_000
}

/// Meta Graph API client configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct GraphConfig {
    /// Graph API base URL.
    #[serde(default = "default_graph_base_url")]
    pub base_url: String,

    /// Meta app ID, required for token refresh. `None` disables the
    /// token-refresh job.
    #[serde(default)]
    pub app_id: Option<String>,

    /// Per-attempt request timeout in milliseconds.
    #[serde(default = "default_graph_timeout_ms")]
    pub timeout_ms: u64,

    /// Maximum retry attempts for recoverable errors.
    #[serde(default = "default_graph_max_retries")]
    pub max_retries: u32,

    /// Initial retry delay in milliseconds (doubles per attempt).
    #[serde(default = "default_initial_retry_delay_ms")]
    pub initial_retry_delay_ms: u64,

    /// Upper bound on the exponential retry delay in milliseconds.
    #[serde(default = "default_max_retry_delay_ms")]
    pub max_retry_delay_ms: u64,

    /// Fixed cooldown applied to rate-limited requests in milliseconds.
    #[serde(default = "default_rate_limit_cooldown_ms")]
    pub rate_limit_cooldown_ms: u64,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            base_url: default_graph_base_url(),
            app_id: None,
            timeout_ms: default_graph_timeout_ms(),
            max_retries: default_graph_max_retries(),
            initial_retry_delay_ms: default_initial_retry_delay_ms(),
            max_retry_delay_ms: default_max_retry_delay_ms(),
            rate_limit_cooldown_ms: default_rate_limit_cooldown_ms(),
        }
    }
}

fn default_graph_base_url() -> String {
    "https://graph.facebook.com/v20.0".to_string()
}

fn default_graph_timeout_ms() -> u64 {
    10_000
}

fn default_graph_max_retries() -> u32 {
    3
}

fn default_initial_retry_delay_ms() -> u64 {
    1_000
}

fn default_max_retry_delay_ms() -> u64 {
    30_000
}

fn default_rate_limit_cooldown_ms() -> u64 {
    60_000
}

/// Storage backend configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StorageConfig {
    /// Path to the SQLite database file.
    #[serde(default = "default_database_path")]
    pub database_path: String,

    /// Enable WAL (Write-Ahead Logging) mode for SQLite.
    #[serde(default = "default_wal_mode")]
    pub wal_mode: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
            wal_mode: default_wal_mode(),
        }
    }
}

fn default_database_path() -> String {
    dirs::data_dir()
        .map(|p| p.join("ferry").join("ferry.db"))
        .unwrap_or_else(|| std::path::PathBuf::from("ferry.db"))
        .to_string_lossy()
        .into_owned()
}

fn default_wal_mode() -> bool {
    true
}

/// Message queue retry and retention configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct QueueConfig {
    /// Concurrent sub-batch size for queue processing.
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Maximum rows fetched per ready-for-retry poll.
    #[serde(default = "default_poll_limit")]
    pub poll_limit: usize,

    /// Retries before an item or event is dead-lettered.
    #[serde(default = "default_max_retries")]
    pub max_retries: i64,

    /// Per-item processing timeout in milliseconds.
    #[serde(default = "default_processing_timeout_ms")]
    pub processing_timeout_ms: u64,

    /// Days terminal rows are kept before cleanup.
    #[serde(default = "default_retention_days")]
    pub retention_days: i64,

    /// Accepted callback requests per IP per window.
    #[serde(default = "default_callback_rate_limit")]
    pub callback_rate_limit: u32,

    /// Callback rate-limit window in seconds.
    #[serde(default = "default_callback_rate_window_secs")]
    pub callback_rate_window_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            poll_limit: default_poll_limit(),
            max_retries: default_max_retries(),
            processing_timeout_ms: default_processing_timeout_ms(),
            retention_days: default_retention_days(),
            callback_rate_limit: default_callback_rate_limit(),
            callback_rate_window_secs: default_callback_rate_window_secs(),
        }
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_poll_limit() -> usize {
    100
}

fn default_max_retries() -> i64 {
    3
}

fn default_processing_timeout_ms() -> u64 {
    60_000
}

fn default_retention_days() -> i64 {
    30
}

fn default_callback_rate_limit() -> u32 {
    100
}

fn default_callback_rate_window_secs() -> u64 {
    900 // 15 minutes
}

/// Periodic job cadence configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct SchedulerConfig {
    /// Queue batch processor interval in seconds.
    #[serde(default = "default_queue_interval_secs")]
    pub queue_interval_secs: u64,

    /// Pending webhook event processor interval in seconds.
    #[serde(default = "default_event_interval_secs")]
    pub event_interval_secs: u64,

    /// Failed webhook event retry sweep interval in seconds.
    #[serde(default = "default_event_retry_interval_secs")]
    pub event_retry_interval_secs: u64,

    /// Dead-letter auditor interval in seconds.
    #[serde(default = "default_dead_letter_interval_secs")]
    pub dead_letter_interval_secs: u64,

    /// Stats snapshot and alert check interval in seconds.
    #[serde(default = "default_stats_interval_secs")]
    pub stats_interval_secs: u64,

    /// Terminal-row cleanup interval in seconds.
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,

    /// Token refresh interval in seconds.
    #[serde(default = "default_token_refresh_interval_secs")]
    pub token_refresh_interval_secs: u64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            queue_interval_secs: default_queue_interval_secs(),
            event_interval_secs: default_event_interval_secs(),
            event_retry_interval_secs: default_event_retry_interval_secs(),
            dead_letter_interval_secs: default_dead_letter_interval_secs(),
            stats_interval_secs: default_stats_interval_secs(),
            cleanup_interval_secs: default_cleanup_interval_secs(),
            token_refresh_interval_secs: default_token_refresh_interval_secs(),
        }
    }
}

fn default_queue_interval_secs() -> u64 {
    30
}

fn default_event_interval_secs() -> u64 {
    60
}

fn default_event_retry_interval_secs() -> u64 {
    300
}

fn default_dead_letter_interval_secs() -> u64 {
    300
}

fn default_stats_interval_secs() -> u64 {
    600
}

fn default_cleanup_interval_secs() -> u64 {
    86_400
}

fn default_token_refresh_interval_secs() -> u64 {
    86_400
}

/// Alerting threshold configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AlertsConfig {
    /// Error-rate threshold (failed / total) above which alerts fire.
    #[serde(default = "default_error_rate")]
    pub error_rate: f64,

    /// Dead-letter count at which a warning alert fires.
    #[serde(default = "default_dead_letter_threshold")]
    pub dead_letter_threshold: i64,

    /// API latency threshold in milliseconds.
    #[serde(default = "default_api_latency_ms")]
    pub api_latency_ms: u64,

    /// Consecutive threshold breaches before escalating to critical.
    #[serde(default = "default_consecutive_failures")]
    pub consecutive_failures: u32,
}

impl Default for AlertsConfig {
    fn default() -> Self {
        Self {
            error_rate: default_error_rate(),
            dead_letter_threshold: default_dead_letter_threshold(),
            api_latency_ms: default_api_latency_ms(),
            consecutive_failures: default_consecutive_failures(),
        }
    }
}

fn default_error_rate() -> f64 {
    0.05
}

fn default_dead_letter_threshold() -> i64 {
    10
}

fn default_api_latency_ms() -> u64 {
    5_000
}

fn default_consecutive_failures() -> u32 {
    3
}

/// Prometheus metrics configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Enable the Prometheus recorder and the /metrics endpoint.
    #[serde(default = "default_prometheus_enabled")]
    pub enabled: bool,
}

impl Default for PrometheusConfig {
    fn default() -> Self {
        Self {
            enabled: default_prometheus_enabled(),
        }
    }
}

fn default_prometheus_enabled() -> bool {
    true
}
