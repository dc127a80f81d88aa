// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Request and response types for the Graph API surface Ferry uses.

use serde::{Deserialize, Serialize};

/// Receipt returned by the platform for a delivered message.
#[derive(Debug, Clone, Deserialize)]
pub struct SendReceipt {
    /// Platform ID of the outbound message.
    pub message_id: String,
    /// Recipient the platform resolved the send to.
    #[serde(default)]
    pub recipient_id: Option<String>,
}

/// Body of a `POST /me/messages` send request.
#[derive(Debug, Clone, Serialize)]
pub struct SendMessageRequest {
    pub recipient: MessageTarget,
    pub message: MessageBody,
}

/// Recipient reference inside a send request.
#[derive(Debug, Clone, Serialize)]
pub struct MessageTarget {
    pub id: String,
}

/// Text payload inside a send request.
#[derive(Debug, Clone, Serialize)]
pub struct MessageBody {
    pub text: String,
}

/// Response to a token exchange/refresh call.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub token_type: Option<String>,
    /// Lifetime of the new token in seconds.
    #[serde(default)]
    pub expires_in: Option<i64>,
}

/// Error envelope the platform wraps failures in.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorResponse {
    pub error: ApiErrorDetail,
}

/// Inner platform error detail.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiErrorDetail {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(rename = "type", default)]
    pub type_: Option<String>,
    #[serde(default)]
    pub code: Option<i64>,
}
