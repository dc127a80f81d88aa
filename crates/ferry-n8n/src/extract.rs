// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message extraction from Instagram webhook payloads.
//!
//! The webhook envelope is loosely structured: delivery receipts, read
//! receipts, and postbacks arrive through the same channel as messages.
//! Extraction therefore never fails -- anything that is not a text message
//! yields `None`, which callers treat as "nothing to do".

use ferry_core::MessageData;
use tracing::{debug, warn};

/// Extract a normalized message record from a webhook payload.
///
/// Expects `entry[0].id` and `entry[0].messaging[0]` with `sender.id`,
/// `recipient.id`, `message.mid`, and optionally `message.text`.
/// Returns `None` for any other shape.
pub fn extract_message_data(payload: &serde_json::Value) -> Option<MessageData> {
    let entry = match payload.get("entry").and_then(|e| e.as_array()) {
        Some(entries) if !entries.is_empty() => &entries[0],
        _ => {
            warn!("webhook payload has no entry array");
            return None;
        }
    };

    let instagram_id = entry.get("id").and_then(|v| v.as_str())?.to_string();

    let messaging = match entry.get("messaging").and_then(|m| m.as_array()) {
        Some(events) if !events.is_empty() => &events[0],
        _ => {
            debug!("no messaging data in webhook entry");
            return None;
        }
    };

    // Only process messages, not delivery confirmations or postbacks.
    let Some(message) = messaging.get("message") else {
        debug!("webhook entry is not a message");
        return None;
    };

    let sender_id = messaging
        .get("sender")
        .and_then(|s| s.get("id"))
        .and_then(|v| v.as_str())?
        .to_string();
    let recipient_id = messaging
        .get("recipient")
        .and_then(|r| r.get("id"))
        .and_then(|v| v.as_str())?
        .to_string();
    let Some(message_id) = message.get("mid").and_then(|v| v.as_str()) else {
        warn!("message entry has no mid, skipping");
        return None;
    };
    let message_text = message
        .get("text")
        .and_then(|v| v.as_str())
        .unwrap_or("")
        .to_string();
    let timestamp = messaging
        .get("timestamp")
        .and_then(|v| v.as_i64())
        .unwrap_or(0);

    Some(MessageData {
        instagram_id,
        sender_id,
        recipient_id,
        message_text,
        message_id: message_id.to_string(),
        timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn message_payload() -> serde_json::Value {
        json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-123",
                "time": 1700000000,
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "timestamp": 1700000000123i64,
                    "message": {"mid": "mid.abc", "text": "hi there"}
                }]
            }]
        })
    }

    #[test]
    fn extracts_a_text_message() {
        let data = extract_message_data(&message_payload()).unwrap();
        assert_eq!(data.instagram_id, "ig-123");
        assert_eq!(data.sender_id, "user-9");
        assert_eq!(data.recipient_id, "page-7");
        assert_eq!(data.message_text, "hi there");
        assert_eq!(data.message_id, "mid.abc");
        assert_eq!(data.timestamp, 1_700_000_000_123);
    }

    #[test]
    fn attachment_only_message_yields_empty_text() {
        let mut payload = message_payload();
        payload["entry"][0]["messaging"][0]["message"] = json!({"mid": "mid.img"});
        let data = extract_message_data(&payload).unwrap();
        assert_eq!(data.message_text, "");
        assert_eq!(data.message_id, "mid.img");
    }

    #[test]
    fn delivery_receipt_is_not_a_message() {
        let payload = json!({
            "entry": [{
                "id": "ig-123",
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "delivery": {"mids": ["mid.abc"], "watermark": 1700000000}
                }]
            }]
        });
        assert!(extract_message_data(&payload).is_none());
    }

    #[test]
    fn postback_is_not_a_message() {
        let payload = json!({
            "entry": [{
                "id": "ig-123",
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "postback": {"payload": "GET_STARTED"}
                }]
            }]
        });
        assert!(extract_message_data(&payload).is_none());
    }

    #[test]
    fn missing_entry_or_messaging_yields_none() {
        assert!(extract_message_data(&json!({})).is_none());
        assert!(extract_message_data(&json!({"entry": []})).is_none());
        assert!(extract_message_data(&json!({"entry": [{"id": "ig-1"}]})).is_none());
        assert!(
            extract_message_data(&json!({"entry": [{"id": "ig-1", "messaging": []}]})).is_none()
        );
    }

    #[test]
    fn missing_mid_yields_none() {
        let mut payload = message_payload();
        payload["entry"][0]["messaging"][0]["message"] = json!({"text": "no mid"});
        assert!(extract_message_data(&payload).is_none());
    }

    #[test]
    fn non_object_shapes_never_panic() {
        assert!(extract_message_data(&json!(null)).is_none());
        assert!(extract_message_data(&json!("string")).is_none());
        assert!(extract_message_data(&json!({"entry": "not-an-array"})).is_none());
        assert!(extract_message_data(&json!({"entry": [42]})).is_none());
    }
}
