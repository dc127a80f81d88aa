// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Forwarding client for the n8n workflow engine.
//!
//! The forward call is fire-and-acknowledge: n8n accepts the message,
//! runs its AI workflow asynchronously, and reports the result through
//! the callback endpoint. Retrying is the scheduler's job, so a failed
//! or timed-out forward is reported as an outcome, not an error.

use std::time::Duration;

use ferry_config::model::N8nConfig;
use ferry_core::{FerryError, MessageData};
use ferry_storage::{Database, QueueItemUpdate, queries};
use serde::Serialize;
use tracing::{debug, error, info, warn};

/// Result of a forward attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForwardStatus {
    /// n8n accepted the message; the item is now `processing`.
    Forwarded,
    /// Integration disabled or unconfigured; the item stays queued untouched.
    Disabled,
    /// n8n rejected the request or the attempt timed out.
    Failed,
}

/// Payload POSTed to the n8n workflow webhook.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ForwardPayload<'a> {
    message_id: &'a str,
    sender_id: &'a str,
    recipient_id: &'a str,
    message_text: &'a str,
    timestamp: i64,
    callback_url: &'a str,
    callback_secret: &'a str,
}

/// Client for the n8n workflow webhook.
#[derive(Clone)]
pub struct N8nClient {
    client: reqwest::Client,
    config: N8nConfig,
    callback_url: String,
}

impl N8nClient {
    /// Build a client. `public_base_url` is this service's externally
    /// reachable address, used to construct the callback URL n8n replies to.
    pub fn new(config: &N8nConfig, public_base_url: &str) -> Result<Self, FerryError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(|e| FerryError::Workflow {
                message: format!("failed to build HTTP client: {e}"),
                source: Some(Box::new(e)),
            })?;

        Ok(Self {
            client,
            config: config.clone(),
            callback_url: format!("{public_base_url}/integration/callback"),
        })
    }

    /// Forward a message to n8n for AI processing.
    ///
    /// The whole attempt races a fixed deadline; when the deadline fires
    /// the in-flight request is dropped, which aborts it. On acceptance
    /// the queue item transitions to `processing` with `sent_to_n8n_at`
    /// stamped.
    pub async fn forward(
        &self,
        db: &Database,
        message: &MessageData,
        queue_item_id: i64,
    ) -> Result<ForwardStatus, FerryError> {
        if !self.config.enabled {
            debug!("n8n integration is disabled");
            return Ok(ForwardStatus::Disabled);
        }
        let Some(ref webhook_url) = self.config.webhook_url else {
            error!("n8n.webhook_url is not configured");
            return Ok(ForwardStatus::Disabled);
        };
        let callback_secret = self.config.callback_secret.as_deref().unwrap_or("");

        let payload = ForwardPayload {
            message_id: &message.message_id,
            sender_id: &message.sender_id,
            recipient_id: &message.recipient_id,
            message_text: &message.message_text,
            timestamp: message.timestamp,
            callback_url: &self.callback_url,
            callback_secret,
        };

        info!(
            message_id = message.message_id.as_str(),
            sender_id = message.sender_id.as_str(),
            "forwarding message to n8n"
        );

        let deadline = Duration::from_millis(self.config.timeout_ms);
        let request = self.client.post(webhook_url).json(&payload).send();

        let response = match tokio::time::timeout(deadline, request).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => {
                error!(error = %e, message_id = message.message_id.as_str(), "n8n forward failed");
                metrics::counter!("ferry_n8n_forward_failures_total", "reason" => "transport")
                    .increment(1);
                return Ok(ForwardStatus::Failed);
            }
            Err(_) => {
                warn!(
                    timeout_ms = self.config.timeout_ms,
                    message_id = message.message_id.as_str(),
                    "n8n forward timed out"
                );
                metrics::counter!("ferry_n8n_forward_failures_total", "reason" => "timeout")
                    .increment(1);
                return Ok(ForwardStatus::Failed);
            }
        };

        if !response.status().is_success() {
            error!(
                status = %response.status(),
                message_id = message.message_id.as_str(),
                "n8n webhook returned error"
            );
            metrics::counter!("ferry_n8n_forward_failures_total", "reason" => "status")
                .increment(1);
            return Ok(ForwardStatus::Failed);
        }

        queries::queue::update_status(
            db,
            queue_item_id,
            ferry_core::QueueStatus::Processing,
            QueueItemUpdate {
                sent_to_n8n_at: Some(ferry_storage::now_iso()),
                ..Default::default()
            },
        )
        .await?;

        metrics::counter!("ferry_n8n_forwarded_total").increment(1);
        info!(
            message_id = message.message_id.as_str(),
            "message forwarded to n8n"
        );
        Ok(ForwardStatus::Forwarded)
    }
}
