// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook event ingestion: extract a message and enqueue it.
//!
//! Runs twice per event in the worst case: once spawned right after the
//! webhook ack, and again from the scheduler sweep if the spawned pass
//! died with the process. Both paths are idempotent -- the status claim
//! keeps two pollers apart and the `message_id` uniqueness check keeps a
//! re-delivered message from producing a second queue item.

use ferry_core::FerryError;
use ferry_storage::{Database, NewQueueItem, WebhookEvent, queries};
use tracing::{debug, error, info, warn};

use crate::extract::extract_message_data;

/// What happened to one webhook event during an ingest pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A queue item was created.
    Queued,
    /// The message was already queued by an earlier delivery.
    Duplicate,
    /// The event carried nothing to enqueue (receipt, postback, ...).
    NothingToDo,
    /// The pass failed; the event is marked for retry.
    Failed,
    /// The event exhausted its retries and was dead-lettered.
    DeadLettered,
}

/// Process one webhook event: claim it, extract the message, create the
/// queue item, and mark the event processed.
///
/// Failures are recorded on the event (`last_error`, `retry_count`);
/// crossing `event_max_retries` dead-letters it.
pub async fn process_event(
    db: &Database,
    event: &WebhookEvent,
    queue_max_retries: i64,
    event_max_retries: i64,
) -> IngestOutcome {
    if let Err(e) = queries::events::mark_processing(db, event.id).await {
        error!(error = %e, event_id = event.id, "failed to claim event");
        return IngestOutcome::Failed;
    }

    match ingest(db, event, queue_max_retries).await {
        Ok(outcome) => {
            if let Err(e) = queries::events::mark_processed(db, event.id).await {
                error!(error = %e, event_id = event.id, "failed to mark event processed");
                return IngestOutcome::Failed;
            }
            outcome
        }
        Err(e) => {
            let message = e.to_string();
            warn!(event_id = event.id, error = %message, "event ingest failed");
            if event.retry_count >= event_max_retries - 1 {
                if let Err(e) =
                    queries::events::move_to_dead_letter(db, event.id, &message).await
                {
                    error!(error = %e, event_id = event.id, "failed to dead-letter event");
                    return IngestOutcome::Failed;
                }
                IngestOutcome::DeadLettered
            } else {
                if let Err(e) = queries::events::mark_failed(db, event.id, &message, true).await {
                    error!(error = %e, event_id = event.id, "failed to mark event failed");
                }
                IngestOutcome::Failed
            }
        }
    }
}

async fn ingest(
    db: &Database,
    event: &WebhookEvent,
    queue_max_retries: i64,
) -> Result<IngestOutcome, FerryError> {
    let payload: serde_json::Value =
        serde_json::from_str(&event.payload).map_err(|e| FerryError::Internal(format!(
            "event payload is not valid JSON: {e}"
        )))?;

    let Some(message) = extract_message_data(&payload) else {
        debug!(event_id = event.id, "event carries no message");
        return Ok(IngestOutcome::NothingToDo);
    };

    // Idempotent ingestion: a re-delivered message must not enqueue twice.
    if let Some(existing) =
        queries::queue::find_by_message_id(db, &message.message_id).await?
    {
        debug!(
            event_id = event.id,
            message_id = message.message_id.as_str(),
            queue_item_id = existing.id,
            "message already queued"
        );
        return Ok(IngestOutcome::Duplicate);
    }

    let page = queries::pages::find_by_instagram_id(db, &message.instagram_id).await?;
    if page.is_none() {
        warn!(
            event_id = event.id,
            instagram_id = message.instagram_id.as_str(),
            "no connected page for this Instagram account"
        );
    }

    let created = queries::queue::create(
        db,
        NewQueueItem {
            webhook_event_id: Some(event.id),
            page_id: page.as_ref().map(|p| p.id),
            instagram_id: Some(message.instagram_id.clone()),
            sender_id: message.sender_id.clone(),
            recipient_id: message.recipient_id.clone(),
            message_text: message.message_text.clone(),
            message_id: message.message_id.clone(),
            max_retries: queue_max_retries,
        },
    )
    .await;

    match created {
        Ok(item) => {
            metrics::counter!("ferry_messages_queued_total").increment(1);
            info!(
                event_id = event.id,
                queue_item_id = item.id,
                message_id = message.message_id.as_str(),
                "message queued"
            );
            Ok(IngestOutcome::Queued)
        }
        Err(e) => {
            // Lost the race with a concurrent delivery of the same message:
            // the UNIQUE index fired. Confirm and treat as the duplicate it is.
            if queries::queue::find_by_message_id(db, &message.message_id)
                .await?
                .is_some()
            {
                debug!(
                    event_id = event.id,
                    message_id = message.message_id.as_str(),
                    "concurrent delivery already queued this message"
                );
                return Ok(IngestOutcome::Duplicate);
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::{EventStatus, QueueStatus};
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        queries::pages::upsert(&db, "page-1", "Page", "tok", None, Some("ig-1".into()))
            .await
            .unwrap();
        (db, dir)
    }

    fn message_payload(mid: &str) -> String {
        serde_json::json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-1",
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "timestamp": 1700000000123i64,
                    "message": {"mid": mid, "text": "hello"}
                }]
            }]
        })
        .to_string()
    }

    #[tokio::test]
    async fn message_event_creates_queue_item_and_processes_event() {
        let (db, _dir) = setup_db().await;

        let event = queries::events::create(&db, None, "messages", &message_payload("mid-1"))
            .await
            .unwrap();

        let outcome = process_event(&db, &event, 3, 3).await;
        assert_eq!(outcome, IngestOutcome::Queued);

        let event = queries::events::find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Processed);

        let item = queries::queue::find_by_message_id(&db, "mid-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.webhook_event_id, Some(event.id));
        assert!(item.page_id.is_some(), "page resolved via instagram_id");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn redelivered_message_does_not_duplicate() {
        let (db, _dir) = setup_db().await;

        let first = queries::events::create(&db, None, "messages", &message_payload("mid-dup"))
            .await
            .unwrap();
        let second = queries::events::create(&db, None, "messages", &message_payload("mid-dup"))
            .await
            .unwrap();

        assert_eq!(process_event(&db, &first, 3, 3).await, IngestOutcome::Queued);
        assert_eq!(
            process_event(&db, &second, 3, 3).await,
            IngestOutcome::Duplicate
        );

        // Both events processed, exactly one queue item.
        let stats = queries::queue::stats(&db).await.unwrap();
        assert_eq!(stats.total, 1);
        let event_stats = queries::events::stats(&db).await.unwrap();
        assert_eq!(event_stats.processed, 2);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn receipt_event_is_processed_with_nothing_queued() {
        let (db, _dir) = setup_db().await;

        let payload = serde_json::json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-1",
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "delivery": {"watermark": 1700000000}
                }]
            }]
        })
        .to_string();
        let event = queries::events::create(&db, None, "messages", &payload)
            .await
            .unwrap();

        assert_eq!(
            process_event(&db, &event, 3, 3).await,
            IngestOutcome::NothingToDo
        );
        let event = queries::events::find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Processed);
        assert_eq!(queries::queue::stats(&db).await.unwrap().total, 0);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn malformed_payload_fails_then_dead_letters() {
        let (db, _dir) = setup_db().await;

        let event = queries::events::create(&db, None, "messages", "not json at all")
            .await
            .unwrap();

        // retry_count 0, 1: failed; crossing max (3) dead-letters.
        assert_eq!(process_event(&db, &event, 3, 3).await, IngestOutcome::Failed);
        let event = queries::events::find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::Failed);
        assert_eq!(event.retry_count, 1);

        assert_eq!(process_event(&db, &event, 3, 3).await, IngestOutcome::Failed);
        let event = queries::events::find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(event.retry_count, 2);

        assert_eq!(
            process_event(&db, &event, 3, 3).await,
            IngestOutcome::DeadLettered
        );
        let event = queries::events::find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(event.status, EventStatus::DeadLetter);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn unknown_instagram_account_still_queues_without_page() {
        let (db, _dir) = setup_db().await;

        let payload = serde_json::json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-unconnected",
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "message": {"mid": "mid-no-page", "text": "hi"}
                }]
            }]
        })
        .to_string();
        let event = queries::events::create(&db, None, "messages", &payload)
            .await
            .unwrap();

        assert_eq!(process_event(&db, &event, 3, 3).await, IngestOutcome::Queued);
        let item = queries::queue::find_by_message_id(&db, "mid-no-page")
            .await
            .unwrap()
            .unwrap();
        assert!(item.page_id.is_none());

        db.close().await.unwrap();
    }
}
