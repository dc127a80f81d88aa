// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common types used across the Ferry workspace.

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

/// Lifecycle status of a received webhook event.
///
/// Transitions: `pending -> processing -> processed | failed`;
/// `failed -> processing` on retry; `failed` with exhausted retries
/// -> `dead_letter`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum EventStatus {
    Pending,
    Processing,
    Processed,
    Failed,
    DeadLetter,
}

/// Lifecycle status of a message queue item.
///
/// Success path: `pending -> processing -> ready_to_send -> sent`.
/// Failure path: any non-terminal state -> `failed` -> (retry) -> ... ->
/// `dead_letter` once `retry_count >= max_retries`.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Processing,
    ReadyToSend,
    Sent,
    Failed,
    DeadLetter,
}

impl QueueStatus {
    /// Terminal states are never processed again and are eligible for
    /// age-based cleanup.
    pub fn is_terminal(&self) -> bool {
        matches!(self, QueueStatus::Sent | QueueStatus::DeadLetter)
    }
}

impl EventStatus {
    /// Terminal states are never picked up by the event processor again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, EventStatus::Processed | EventStatus::DeadLetter)
    }
}

/// A normalized message record extracted from an Instagram webhook payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageData {
    /// Instagram business account ID the message belongs to (`entry[0].id`).
    pub instagram_id: String,
    /// Sender's Instagram-scoped user ID.
    pub sender_id: String,
    /// Recipient's Instagram-scoped user ID.
    pub recipient_id: String,
    /// Message text; empty for attachment-only messages.
    pub message_text: String,
    /// Platform-unique message ID (`message.mid`), the idempotency key.
    pub message_id: String,
    /// Platform timestamp in epoch milliseconds.
    pub timestamp: i64,
}
