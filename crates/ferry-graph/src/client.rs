// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP client for the Meta Graph API.
//!
//! Provides [`GraphClient`] which handles request construction, error
//! classification, and the retry loop: transient failures back off
//! exponentially, rate limits wait out a fixed cooldown, and permanent
//! failures abort without consuming the remaining attempts.

use std::sync::Arc;
use std::time::{Duration, Instant};

use ferry_config::model::GraphConfig;
use ferry_core::FerryError;
use reqwest::Method;
use tracing::{debug, warn};

use crate::error::{GraphError, GraphErrorKind, classify_status};
use crate::types::{
    ApiErrorResponse, MessageBody, MessageTarget, SendMessageRequest, SendReceipt, TokenResponse,
};

/// Observability callback fired before each retry sleep.
#[derive(Debug, Clone)]
pub struct RetryEvent {
    pub attempt: u32,
    pub max_retries: u32,
    pub delay: Duration,
    pub kind: GraphErrorKind,
}

/// Observability callback fired when a request gives up.
#[derive(Debug, Clone)]
pub struct FailureEvent {
    pub attempts: u32,
    pub kind: GraphErrorKind,
}

type RetryHook = Arc<dyn Fn(&RetryEvent) + Send + Sync>;
type FailureHook = Arc<dyn Fn(&FailureEvent) + Send + Sync>;

/// Resilient Graph API client.
#[derive(Clone)]
pub struct GraphClient {
    client: reqwest::Client,
    config: GraphConfig,
    base_url: String,
    on_retry: Option<RetryHook>,
    on_failure: Option<FailureHook>,
}

impl GraphClient {
    /// Create a new client from the Graph section of the config.
    pub fn new(config: &GraphConfig) -> Result<Self, FerryError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| FerryError::Graph {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            base_url: config.base_url.clone(),
            on_retry: None,
            on_failure: None,
        })
    }

    /// Register a hook fired before each retry sleep.
    pub fn with_retry_hook(mut self, hook: RetryHook) -> Self {
        self.on_retry = Some(hook);
        self
    }

    /// Register a hook fired when a request finally fails.
    pub fn with_failure_hook(mut self, hook: FailureHook) -> Self {
        self.on_failure = Some(hook);
        self
    }

    /// Overrides the base URL (for testing with wiremock).
    #[cfg(test)]
    pub fn with_base_url(mut self, url: String) -> Self {
        self.base_url = url;
        self
    }

    /// Send a text message to a platform user.
    pub async fn send_message(
        &self,
        recipient_id: &str,
        text: &str,
        page_access_token: &str,
    ) -> Result<SendReceipt, GraphError> {
        let body = SendMessageRequest {
            recipient: MessageTarget {
                id: recipient_id.to_string(),
            },
            message: MessageBody {
                text: text.to_string(),
            },
        };
        let body = serde_json::to_value(&body).map_err(|e| {
            GraphError::new(
                GraphErrorKind::Unknown,
                None,
                format!("failed to serialize send request: {e}"),
            )
        })?;
        let value = self
            .request(
                Method::POST,
                "/me/messages",
                Some(page_access_token),
                Vec::new(),
                Some(body),
            )
            .await?;

        serde_json::from_value(value).map_err(|e| {
            GraphError::new(
                GraphErrorKind::Unknown,
                None,
                format!("send succeeded but receipt was malformed: {e}"),
            )
        })
    }

    /// Subscribe the app to webhook fields on a page.
    pub async fn subscribe_webhook_fields(
        &self,
        page_id: &str,
        page_access_token: &str,
        fields: &str,
    ) -> Result<(), GraphError> {
        self.request(
            Method::POST,
            &format!("/{page_id}/subscribed_apps"),
            Some(page_access_token),
            vec![("subscribed_fields".to_string(), fields.to_string())],
            None,
        )
        .await?;
        Ok(())
    }

    /// Unsubscribe the app from webhook fields on a page.
    pub async fn unsubscribe_webhook_fields(
        &self,
        page_id: &str,
        page_access_token: &str,
        fields: &str,
    ) -> Result<(), GraphError> {
        self.request(
            Method::DELETE,
            &format!("/{page_id}/subscribed_apps"),
            Some(page_access_token),
            vec![("subscribed_fields".to_string(), fields.to_string())],
            None,
        )
        .await?;
        Ok(())
    }

    /// Exchange a page token for a fresh long-lived token.
    pub async fn refresh_token(
        &self,
        current_token: &str,
        app_id: &str,
        app_secret: &str,
    ) -> Result<TokenResponse, GraphError> {
        let value = self
            .request(
                Method::GET,
                "/oauth/access_token",
                None,
                vec![
                    ("grant_type".to_string(), "fb_exchange_token".to_string()),
                    ("client_id".to_string(), app_id.to_string()),
                    ("client_secret".to_string(), app_secret.to_string()),
                    ("fb_exchange_token".to_string(), current_token.to_string()),
                ],
                None,
            )
            .await?;

        serde_json::from_value(value).map_err(|e| {
            GraphError::new(
                GraphErrorKind::Unknown,
                None,
                format!("token exchange returned a malformed body: {e}"),
            )
        })
    }

    /// Core request with classification and retry.
    async fn request(
        &self,
        method: Method,
        path: &str,
        access_token: Option<&str>,
        mut query: Vec<(String, String)>,
        body: Option<serde_json::Value>,
    ) -> Result<serde_json::Value, GraphError> {
        if let Some(token) = access_token {
            query.push(("access_token".to_string(), token.to_string()));
        }
        let url = format!("{}{}", self.base_url, path);
        let max_retries = self.config.max_retries;

        let mut last_error = GraphError::new(
            GraphErrorKind::Unknown,
            None,
            "request loop exited without a result",
        );

        for attempt in 0..=max_retries {
            let started = Instant::now();
            let mut req = self.client.request(method.clone(), &url).query(&query);
            if let Some(ref b) = body {
                req = req.json(b);
            }

            let error = match req.send().await {
                Ok(response) => {
                    let status = response.status();
                    let retry_after = response
                        .headers()
                        .get("retry-after")
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok());
                    // Some Graph responses are empty on success.
                    let parsed: serde_json::Value =
                        response.json().await.unwrap_or(serde_json::Value::Null);

                    if status.is_success() {
                        metrics::histogram!("ferry_graph_latency_seconds")
                            .record(started.elapsed().as_secs_f64());
                        return Ok(parsed);
                    }

                    let detail: Option<ApiErrorResponse> =
                        serde_json::from_value(parsed.clone()).ok();
                    let platform_code = detail.as_ref().and_then(|d| d.error.code);
                    let mut kind = classify_status(status.as_u16(), platform_code);
                    if let GraphErrorKind::RateLimited { retry_after_secs } = &mut kind
                        && let Some(hint) = retry_after
                    {
                        *retry_after_secs = hint;
                    }
                    let message = detail
                        .and_then(|d| d.error.message)
                        .unwrap_or_else(|| format!("HTTP {status}"));
                    GraphError::new(kind, Some(status.as_u16()), message)
                }
                Err(e) => {
                    let kind = if e.is_timeout() {
                        GraphErrorKind::Timeout
                    } else {
                        GraphErrorKind::Unknown
                    };
                    GraphError::new(kind, None, e.to_string())
                }
            };

            debug!(
                %method,
                path,
                attempt,
                status = ?error.status,
                kind = error.kind.label(),
                "graph request attempt failed"
            );

            if attempt < max_retries && error.kind.retryable() {
                let rate_limited = matches!(error.kind, GraphErrorKind::RateLimited { .. });
                let delay = self.backoff_delay(attempt, rate_limited);
                metrics::counter!("ferry_graph_retries_total", "kind" => error.kind.label())
                    .increment(1);
                if let Some(ref hook) = self.on_retry {
                    hook(&RetryEvent {
                        attempt: attempt + 1,
                        max_retries,
                        delay,
                        kind: error.kind.clone(),
                    });
                }
                warn!(
                    path,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    kind = error.kind.label(),
                    "retrying graph request"
                );
                last_error = error;
                tokio::time::sleep(delay).await;
                continue;
            }

            metrics::counter!("ferry_graph_failures_total", "kind" => error.kind.label())
                .increment(1);
            if let Some(ref hook) = self.on_failure {
                hook(&FailureEvent {
                    attempts: attempt + 1,
                    kind: error.kind.clone(),
                });
            }
            return Err(error);
        }

        if let Some(ref hook) = self.on_failure {
            hook(&FailureEvent {
                attempts: max_retries + 1,
                kind: last_error.kind.clone(),
            });
        }
        Err(last_error)
    }

    /// Exponential backoff with a cap, except rate limits which always
    /// wait the fixed cooldown.
    fn backoff_delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        if rate_limited {
            return Duration::from_millis(self.config.rate_limit_cooldown_ms);
        }
        let exp = self
            .config
            .initial_retry_delay_ms
            .saturating_mul(1u64 << attempt.min(20));
        Duration::from_millis(exp.min(self.config.max_retry_delay_ms))
    }
}
