// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Webhook event store operations.
//!
//! Events move `pending -> processing -> processed | failed`. The status
//! column is the exclusion mechanism: once an event is marked processing,
//! `find_pending` no longer returns it, so two overlapping pollers cannot
//! both claim it.

use ferry_core::FerryError;
use rusqlite::{OptionalExtension, params};

use crate::database::Database;
use crate::models::{EventStats, WebhookEvent};
use crate::queries::parse_status;

const EVENT_COLUMNS: &str = "id, page_id, event_type, payload, status, retry_count, last_error, \
                             received_at, processed_at";

fn map_event_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<WebhookEvent> {
    Ok(WebhookEvent {
        id: row.get(0)?,
        page_id: row.get(1)?,
        event_type: row.get(2)?,
        payload: row.get(3)?,
        status: parse_status(4, row.get::<_, String>(4)?)?,
        retry_count: row.get(5)?,
        last_error: row.get(6)?,
        received_at: row.get(7)?,
        processed_at: row.get(8)?,
    })
}

/// Record a newly received webhook event with status `pending`.
pub async fn create(
    db: &Database,
    page_id: Option<i64>,
    event_type: &str,
    payload: &str,
) -> Result<WebhookEvent, FerryError> {
    let event_type = event_type.to_string();
    let payload = payload.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO webhook_events (page_id, event_type, payload) VALUES (?1, ?2, ?3)",
                params![page_id, event_type, payload],
            )?;
            let id = conn.last_insert_rowid();
            let event = conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = ?1"),
                params![id],
                map_event_row,
            )?;
            Ok(event)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up a single event by ID.
pub async fn find_by_id(db: &Database, id: i64) -> Result<Option<WebhookEvent>, FerryError> {
    db.connection()
        .call(move |conn| {
            let event = conn
                .query_row(
                    &format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = ?1"),
                    params![id],
                    map_event_row,
                )
                .optional()?;
            Ok(event)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch pending events, oldest first, so no event starves.
pub async fn find_pending(db: &Database, limit: i64) -> Result<Vec<WebhookEvent>, FerryError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM webhook_events
                 WHERE status = 'pending'
                 ORDER BY received_at ASC
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], map_event_row)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch failed events still under the retry budget, oldest first.
pub async fn find_retryable(
    db: &Database,
    max_retries: i64,
    limit: i64,
) -> Result<Vec<WebhookEvent>, FerryError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {EVENT_COLUMNS} FROM webhook_events
                 WHERE status = 'failed' AND retry_count < ?1
                 ORDER BY received_at ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![max_retries, limit], map_event_row)?;
            let mut events = Vec::new();
            for row in rows {
                events.push(row?);
            }
            Ok(events)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Claim an event for processing.
pub async fn mark_processing(db: &Database, id: i64) -> Result<(), FerryError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE webhook_events SET status = 'processing' WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark an event as successfully processed and stamp `processed_at`.
pub async fn mark_processed(db: &Database, id: i64) -> Result<(), FerryError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE webhook_events
                 SET status = 'processed',
                     processed_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![id],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Mark an event as failed, recording the error and optionally consuming
/// one retry.
pub async fn mark_failed(
    db: &Database,
    id: i64,
    error: &str,
    increment_retry: bool,
) -> Result<(), FerryError> {
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            if increment_retry {
                conn.execute(
                    "UPDATE webhook_events
                     SET status = 'failed', last_error = ?2, retry_count = retry_count + 1
                     WHERE id = ?1",
                    params![id, error],
                )?;
            } else {
                conn.execute(
                    "UPDATE webhook_events SET status = 'failed', last_error = ?2 WHERE id = ?1",
                    params![id, error],
                )?;
            }
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Move an event to the dead-letter state with its final error.
pub async fn move_to_dead_letter(db: &Database, id: i64, error: &str) -> Result<(), FerryError> {
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            conn.execute(
                "UPDATE webhook_events SET status = 'dead_letter', last_error = ?2 WHERE id = ?1",
                params![id, error],
            )?;
            Ok(())
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Manually reset a failed or dead-lettered event to pending.
///
/// Clears the last error; the retry counter is left alone so operator
/// intervention cannot push an event toward dead-letter.
pub async fn retry(db: &Database, id: i64) -> Result<Option<WebhookEvent>, FerryError> {
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE webhook_events SET status = 'pending', last_error = NULL
                 WHERE id = ?1 AND status IN ('failed', 'dead_letter')",
                params![id],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let event = conn.query_row(
                &format!("SELECT {EVENT_COLUMNS} FROM webhook_events WHERE id = ?1"),
                params![id],
                map_event_row,
            )?;
            Ok(Some(event))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Delete processed events older than the retention window.
///
/// Only `processed` rows are eligible; failed and dead-lettered events are
/// kept for inspection regardless of age.
pub async fn delete_old_processed(db: &Database, days: i64) -> Result<usize, FerryError> {
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM webhook_events
                 WHERE status = 'processed'
                 AND processed_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-' || ?1 || ' days')",
                params![days],
            )?;
            Ok(deleted)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Aggregate per-status counts plus the most recent receive time.
pub async fn stats(db: &Database) -> Result<EventStats, FerryError> {
    db.connection()
        .call(|conn| {
            let stats = conn.query_row(
                "SELECT
                     COUNT(*),
                     SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'processed' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'dead_letter' THEN 1 ELSE 0 END),
                     MAX(received_at)
                 FROM webhook_events",
                [],
                |row| {
                    Ok(EventStats {
                        total: row.get(0)?,
                        pending: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        processing: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        processed: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        failed: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                        dead_letter: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                        last_received: row.get(6)?,
                    })
                },
            )?;
            Ok(stats)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_core::EventStatus;
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    #[tokio::test]
    async fn create_starts_pending() {
        let (db, _dir) = setup_db().await;

        let event = create(&db, None, "messages", r#"{"object":"instagram"}"#)
            .await
            .unwrap();
        assert!(event.id > 0);
        assert_eq!(event.status, EventStatus::Pending);
        assert_eq!(event.retry_count, 0);
        assert_eq!(event.payload, r#"{"object":"instagram"}"#);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_processing_excludes_from_pending() {
        let (db, _dir) = setup_db().await;

        let event = create(&db, None, "messages", "{}").await.unwrap();
        assert_eq!(find_pending(&db, 10).await.unwrap().len(), 1);

        mark_processing(&db, event.id).await.unwrap();
        assert!(find_pending(&db, 10).await.unwrap().is_empty());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn pending_events_are_returned_oldest_first() {
        let (db, _dir) = setup_db().await;

        let first = create(&db, None, "messages", r#"{"n":1}"#).await.unwrap();
        let second = create(&db, None, "messages", r#"{"n":2}"#).await.unwrap();

        let pending = find_pending(&db, 10).await.unwrap();
        assert_eq!(pending.len(), 2);
        assert_eq!(pending[0].id, first.id);
        assert_eq!(pending[1].id, second.id);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_failed_increments_retry_count() {
        let (db, _dir) = setup_db().await;

        let event = create(&db, None, "messages", "{}").await.unwrap();
        mark_failed(&db, event.id, "boom", true).await.unwrap();
        mark_failed(&db, event.id, "boom again", true).await.unwrap();

        let reloaded = find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EventStatus::Failed);
        assert_eq!(reloaded.retry_count, 2);
        assert_eq!(reloaded.last_error.as_deref(), Some("boom again"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn find_retryable_respects_max_retries() {
        let (db, _dir) = setup_db().await;

        let exhausted = create(&db, None, "messages", "{}").await.unwrap();
        for _ in 0..3 {
            mark_failed(&db, exhausted.id, "err", true).await.unwrap();
        }
        let retryable = create(&db, None, "messages", "{}").await.unwrap();
        mark_failed(&db, retryable.id, "err", true).await.unwrap();

        let events = find_retryable(&db, 3, 10).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].id, retryable.id);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_processed_stamps_timestamp() {
        let (db, _dir) = setup_db().await;

        let event = create(&db, None, "messages", "{}").await.unwrap();
        mark_processed(&db, event.id).await.unwrap();

        let reloaded = find_by_id(&db, event.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, EventStatus::Processed);
        assert!(reloaded.processed_at.is_some());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn retry_resets_only_failed_or_dead_letter() {
        let (db, _dir) = setup_db().await;

        let processed = create(&db, None, "messages", "{}").await.unwrap();
        mark_processed(&db, processed.id).await.unwrap();
        assert!(retry(&db, processed.id).await.unwrap().is_none());

        let failed = create(&db, None, "messages", "{}").await.unwrap();
        mark_failed(&db, failed.id, "err", true).await.unwrap();
        let reset = retry(&db, failed.id).await.unwrap().unwrap();
        assert_eq!(reset.status, EventStatus::Pending);
        assert!(reset.last_error.is_none());
        // Manual retry must not consume the retry budget.
        assert_eq!(reset.retry_count, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn stats_counts_per_status() {
        let (db, _dir) = setup_db().await;

        let a = create(&db, None, "messages", "{}").await.unwrap();
        let b = create(&db, None, "messages", "{}").await.unwrap();
        let _c = create(&db, None, "messages", "{}").await.unwrap();
        mark_processed(&db, a.id).await.unwrap();
        move_to_dead_letter(&db, b.id, "gone").await.unwrap();

        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.processed, 1);
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.pending, 1);
        assert!(stats.last_received.is_some());

        db.close().await.unwrap();
    }
}
