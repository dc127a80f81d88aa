// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Row types for storage entities.
//!
//! Status columns are stored as text and parsed into the enums from
//! `ferry-core` at row-mapping time, so invalid states are caught at the
//! storage boundary instead of leaking into the pipeline.

use ferry_core::{EventStatus, QueueStatus};
use serde::Serialize;

/// A received webhook event.
#[derive(Debug, Clone, Serialize)]
pub struct WebhookEvent {
    pub id: i64,
    pub page_id: Option<i64>,
    pub event_type: String,
    /// Raw JSON payload exactly as received; never mutated after insert.
    pub payload: String,
    pub status: EventStatus,
    pub retry_count: i64,
    pub last_error: Option<String>,
    pub received_at: String,
    pub processed_at: Option<String>,
}

/// A message processing queue item.
#[derive(Debug, Clone, Serialize)]
pub struct QueueItem {
    pub id: i64,
    pub webhook_event_id: Option<i64>,
    pub page_id: Option<i64>,
    pub instagram_id: Option<String>,
    pub sender_id: String,
    pub recipient_id: String,
    pub message_text: String,
    /// Platform-unique inbound message ID; the idempotency key.
    pub message_id: String,
    pub status: QueueStatus,
    pub ai_response: Option<String>,
    pub n8n_execution_id: Option<String>,
    pub retry_count: i64,
    pub max_retries: i64,
    pub last_error: Option<String>,
    pub last_retry_at: Option<String>,
    pub next_retry_at: Option<String>,
    pub sent_to_n8n_at: Option<String>,
    pub received_from_n8n_at: Option<String>,
    pub sent_to_instagram_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// Fields required to create a queue item.
#[derive(Debug, Clone)]
pub struct NewQueueItem {
    pub webhook_event_id: Option<i64>,
    pub page_id: Option<i64>,
    pub instagram_id: Option<String>,
    pub sender_id: String,
    pub recipient_id: String,
    pub message_text: String,
    pub message_id: String,
    pub max_retries: i64,
}

/// Optional field updates applied alongside a status change.
///
/// `None` fields are left untouched.
#[derive(Debug, Clone, Default)]
pub struct QueueItemUpdate {
    pub ai_response: Option<String>,
    pub n8n_execution_id: Option<String>,
    pub last_error: Option<String>,
    pub sent_to_n8n_at: Option<String>,
    pub received_from_n8n_at: Option<String>,
    pub sent_to_instagram_at: Option<String>,
}

/// A connected Meta page with its access credential.
///
/// Read-only from the pipeline's perspective; ownership of the credential
/// lifecycle sits with the token-refresh job.
#[derive(Debug, Clone, Serialize)]
pub struct Page {
    pub id: i64,
    pub page_id: String,
    pub page_name: String,
    pub page_access_token: String,
    pub token_expires_at: Option<String>,
    pub instagram_id: Option<String>,
    pub is_selected: bool,
    pub created_at: String,
    pub updated_at: String,
}

/// Per-status counts for webhook events.
#[derive(Debug, Clone, Default, Serialize)]
pub struct EventStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub processed: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub last_received: Option<String>,
}

/// Per-status counts for the message queue.
#[derive(Debug, Clone, Default, Serialize)]
pub struct QueueStats {
    pub total: i64,
    pub pending: i64,
    pub processing: i64,
    pub ready_to_send: i64,
    pub sent: i64,
    pub failed: i64,
    pub dead_letter: i64,
    pub last_created: Option<String>,
}
