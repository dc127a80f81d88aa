// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Message queue operations: the retry state machine.
//!
//! Items move `pending -> processing -> ready_to_send -> sent` on the
//! success path. Any failure lands on `failed` with an exponential
//! `next_retry_at`; items that exhaust `max_retries` are dead-lettered.
//! The UNIQUE constraint on `message_id` makes ingestion idempotent.

use ferry_core::{FerryError, QueueStatus};
use rusqlite::{OptionalExtension, params};

use crate::database::{Database, iso_in_minutes, now_iso};
use crate::models::{NewQueueItem, QueueItem, QueueItemUpdate, QueueStats};
use crate::queries::parse_status;

const QUEUE_COLUMNS: &str = "id, webhook_event_id, page_id, instagram_id, sender_id, \
                             recipient_id, message_text, message_id, status, ai_response, \
                             n8n_execution_id, retry_count, max_retries, last_error, \
                             last_retry_at, next_retry_at, sent_to_n8n_at, \
                             received_from_n8n_at, sent_to_instagram_at, created_at, updated_at";

fn map_queue_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QueueItem> {
    Ok(QueueItem {
        id: row.get(0)?,
        webhook_event_id: row.get(1)?,
        page_id: row.get(2)?,
        instagram_id: row.get(3)?,
        sender_id: row.get(4)?,
        recipient_id: row.get(5)?,
        message_text: row.get(6)?,
        message_id: row.get(7)?,
        status: parse_status(8, row.get::<_, String>(8)?)?,
        ai_response: row.get(9)?,
        n8n_execution_id: row.get(10)?,
        retry_count: row.get(11)?,
        max_retries: row.get(12)?,
        last_error: row.get(13)?,
        last_retry_at: row.get(14)?,
        next_retry_at: row.get(15)?,
        sent_to_n8n_at: row.get(16)?,
        received_from_n8n_at: row.get(17)?,
        sent_to_instagram_at: row.get(18)?,
        created_at: row.get(19)?,
        updated_at: row.get(20)?,
    })
}

/// Insert a new queue item with status `pending`.
///
/// Callers should check [`find_by_message_id`] first; the UNIQUE index on
/// `message_id` backstops the race between two deliveries of the same
/// inbound message.
pub async fn create(db: &Database, item: NewQueueItem) -> Result<QueueItem, FerryError> {
    db.connection()
        .call(move |conn| {
            conn.execute(
                "INSERT INTO message_queue
                 (webhook_event_id, page_id, instagram_id, sender_id, recipient_id,
                  message_text, message_id, max_retries)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                params![
                    item.webhook_event_id,
                    item.page_id,
                    item.instagram_id,
                    item.sender_id,
                    item.recipient_id,
                    item.message_text,
                    item.message_id,
                    item.max_retries,
                ],
            )?;
            let id = conn.last_insert_rowid();
            let created = conn.query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE id = ?1"),
                params![id],
                map_queue_row,
            )?;
            Ok(created)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up a queue item by row ID.
pub async fn find_by_id(db: &Database, id: i64) -> Result<Option<QueueItem>, FerryError> {
    db.connection()
        .call(move |conn| {
            let item = conn
                .query_row(
                    &format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE id = ?1"),
                    params![id],
                    map_queue_row,
                )
                .optional()?;
            Ok(item)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Look up a queue item by its platform message ID.
pub async fn find_by_message_id(
    db: &Database,
    message_id: &str,
) -> Result<Option<QueueItem>, FerryError> {
    let message_id = message_id.to_string();
    db.connection()
        .call(move |conn| {
            let item = conn
                .query_row(
                    &format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE message_id = ?1"),
                    params![message_id],
                    map_queue_row,
                )
                .optional()?;
            Ok(item)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch items in a given status, newest first.
pub async fn find_by_status(
    db: &Database,
    status: QueueStatus,
    limit: i64,
    offset: i64,
) -> Result<Vec<QueueItem>, FerryError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUEUE_COLUMNS} FROM message_queue
                 WHERE status = ?1
                 ORDER BY created_at DESC
                 LIMIT ?2 OFFSET ?3"
            ))?;
            let rows = stmt.query_map(params![status, limit, offset], map_queue_row)?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row?);
            }
            Ok(items)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Apply a status transition plus any accompanying field updates.
///
/// `None` fields in the update are left untouched, so callers only name
/// what actually changed.
pub async fn update_status(
    db: &Database,
    id: i64,
    status: QueueStatus,
    updates: QueueItemUpdate,
) -> Result<Option<QueueItem>, FerryError> {
    let status = status.to_string();
    db.connection()
        .call(move |conn| {
            let changed = conn.execute(
                "UPDATE message_queue SET
                     status = ?2,
                     ai_response = COALESCE(?3, ai_response),
                     n8n_execution_id = COALESCE(?4, n8n_execution_id),
                     last_error = COALESCE(?5, last_error),
                     sent_to_n8n_at = COALESCE(?6, sent_to_n8n_at),
                     received_from_n8n_at = COALESCE(?7, received_from_n8n_at),
                     sent_to_instagram_at = COALESCE(?8, sent_to_instagram_at),
                     updated_at = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')
                 WHERE id = ?1",
                params![
                    id,
                    status,
                    updates.ai_response,
                    updates.n8n_execution_id,
                    updates.last_error,
                    updates.sent_to_n8n_at,
                    updates.received_from_n8n_at,
                    updates.sent_to_instagram_at,
                ],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let item = conn.query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE id = ?1"),
                params![id],
                map_queue_row,
            )?;
            Ok(Some(item))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Record a failed attempt: bump `retry_count`, store the error, and push
/// `next_retry_at` out exponentially (`1 min * 2^retry_count`, computed
/// from the pre-increment count).
pub async fn increment_retry(
    db: &Database,
    id: i64,
    error: &str,
) -> Result<Option<QueueItem>, FerryError> {
    let error = error.to_string();
    db.connection()
        .call(move |conn| {
            let current: Option<i64> = conn
                .query_row(
                    "SELECT retry_count FROM message_queue WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            let Some(retry_count) = current else {
                return Ok(None);
            };

            // Shift capped well below i64 overflow; max_retries bounds the
            // practical range long before this matters.
            let delay_minutes = 1i64 << retry_count.clamp(0, 20);
            let now = now_iso();
            let next_retry_at = iso_in_minutes(delay_minutes);

            conn.execute(
                "UPDATE message_queue SET
                     status = 'failed',
                     retry_count = retry_count + 1,
                     last_error = ?2,
                     last_retry_at = ?3,
                     next_retry_at = ?4,
                     updated_at = ?3
                 WHERE id = ?1",
                params![id, error, now, next_retry_at],
            )?;

            let item = conn.query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE id = ?1"),
                params![id],
                map_queue_row,
            )?;
            Ok(Some(item))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Manually reset a failed or dead-lettered item for immediate retry.
///
/// Sets `next_retry_at` to now and does NOT touch `retry_count`:
/// [`increment_retry`] is the single owner of the backoff formula, and
/// operator intervention must not push an item toward dead-letter.
pub async fn mark_retry(db: &Database, id: i64) -> Result<Option<QueueItem>, FerryError> {
    db.connection()
        .call(move |conn| {
            let now = now_iso();
            let changed = conn.execute(
                "UPDATE message_queue SET
                     status = 'pending',
                     next_retry_at = ?2,
                     updated_at = ?2
                 WHERE id = ?1 AND status IN ('failed', 'dead_letter')",
                params![id, now],
            )?;
            if changed == 0 {
                return Ok(None);
            }
            let item = conn.query_row(
                &format!("SELECT {QUEUE_COLUMNS} FROM message_queue WHERE id = ?1"),
                params![id],
                map_queue_row,
            )?;
            Ok(Some(item))
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch items whose backoff has elapsed, soonest-due first.
///
/// Excludes items that exhausted their retry budget and items whose
/// `next_retry_at` is still in the future.
pub async fn get_ready_for_retry(db: &Database, limit: i64) -> Result<Vec<QueueItem>, FerryError> {
    db.connection()
        .call(move |conn| {
            let now = now_iso();
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUEUE_COLUMNS} FROM message_queue
                 WHERE status IN ('pending', 'failed')
                 AND retry_count < max_retries
                 AND (next_retry_at IS NULL OR next_retry_at <= ?1)
                 ORDER BY next_retry_at ASC
                 LIMIT ?2"
            ))?;
            let rows = stmt.query_map(params![now, limit], map_queue_row)?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row?);
            }
            Ok(items)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Fetch items stuck past their retry budget but not yet dead-lettered.
pub async fn find_retry_exhausted(db: &Database, limit: i64) -> Result<Vec<QueueItem>, FerryError> {
    db.connection()
        .call(move |conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {QUEUE_COLUMNS} FROM message_queue
                 WHERE status = 'failed' AND retry_count >= max_retries
                 ORDER BY updated_at ASC
                 LIMIT ?1"
            ))?;
            let rows = stmt.query_map(params![limit], map_queue_row)?;
            let mut items = Vec::new();
            for row in rows {
                items.push(row?);
            }
            Ok(items)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Purge terminal rows older than the retention window.
///
/// Only `sent` and `dead_letter` rows are eligible; in-flight rows are
/// kept regardless of age.
pub async fn delete_older_than(db: &Database, days: i64) -> Result<usize, FerryError> {
    db.connection()
        .call(move |conn| {
            let deleted = conn.execute(
                "DELETE FROM message_queue
                 WHERE status IN ('sent', 'dead_letter')
                 AND created_at < strftime('%Y-%m-%dT%H:%M:%fZ', 'now', '-' || ?1 || ' days')",
                params![days],
            )?;
            Ok(deleted)
        })
        .await
        .map_err(crate::database::map_tr_err)
}

/// Aggregate per-status counts plus the most recent creation time.
pub async fn stats(db: &Database) -> Result<QueueStats, FerryError> {
    db.connection()
        .call(|conn| {
            let stats = conn.query_row(
                "SELECT
                     COUNT(*),
                     SUM(CASE WHEN status = 'pending' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'processing' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'ready_to_send' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'sent' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'failed' THEN 1 ELSE 0 END),
                     SUM(CASE WHEN status = 'dead_letter' THEN 1 ELSE 0 END),
                     MAX(created_at)
                 FROM message_queue",
                [],
                |row| {
                    Ok(QueueStats {
                        total: row.get(0)?,
                        pending: row.get::<_, Option<i64>>(1)?.unwrap_or(0),
                        processing: row.get::<_, Option<i64>>(2)?.unwrap_or(0),
                        ready_to_send: row.get::<_, Option<i64>>(3)?.unwrap_or(0),
                        sent: row.get::<_, Option<i64>>(4)?.unwrap_or(0),
                        failed: row.get::<_, Option<i64>>(5)?.unwrap_or(0),
                        dead_letter: row.get::<_, Option<i64>>(6)?.unwrap_or(0),
                        last_created: row.get(7)?,
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
    use tempfile::tempdir;

    async fn setup_db() -> (Database, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        (db, dir)
    }

    fn new_item(message_id: &str) -> NewQueueItem {
        NewQueueItem {
            webhook_event_id: None,
            page_id: None,
            instagram_id: Some("ig-1".to_string()),
            sender_id: "sender-1".to_string(),
            recipient_id: "recipient-1".to_string(),
            message_text: "hello".to_string(),
            message_id: message_id.to_string(),
            max_retries: 3,
        }
    }

    #[tokio::test]
    async fn create_and_find_by_message_id() {
        let (db, _dir) = setup_db().await;

        let item = create(&db, new_item("mid-1")).await.unwrap();
        assert!(item.id > 0);
        assert_eq!(item.status, QueueStatus::Pending);
        assert_eq!(item.retry_count, 0);
        assert!(item.next_retry_at.is_none());

        let found = find_by_message_id(&db, "mid-1").await.unwrap().unwrap();
        assert_eq!(found.id, item.id);
        assert!(find_by_message_id(&db, "mid-2").await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn duplicate_message_id_is_rejected() {
        let (db, _dir) = setup_db().await;

        create(&db, new_item("mid-dup")).await.unwrap();
        let result = create(&db, new_item("mid-dup")).await;
        assert!(result.is_err(), "UNIQUE constraint must reject duplicates");

        // Exactly one row exists.
        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.total, 1);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn update_status_touches_only_named_fields() {
        let (db, _dir) = setup_db().await;

        let item = create(&db, new_item("mid-upd")).await.unwrap();
        let updated = update_status(
            &db,
            item.id,
            QueueStatus::ReadyToSend,
            QueueItemUpdate {
                ai_response: Some("Hi!".to_string()),
                n8n_execution_id: Some("exec-1".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();

        assert_eq!(updated.status, QueueStatus::ReadyToSend);
        assert_eq!(updated.ai_response.as_deref(), Some("Hi!"));
        assert_eq!(updated.n8n_execution_id.as_deref(), Some("exec-1"));
        assert!(updated.sent_to_instagram_at.is_none());
        assert!(updated.last_error.is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn increment_retry_backoff_is_monotonic() {
        let (db, _dir) = setup_db().await;

        let item = create(&db, new_item("mid-backoff")).await.unwrap();

        let after_first = increment_retry(&db, item.id, "err 1").await.unwrap().unwrap();
        assert_eq!(after_first.status, QueueStatus::Failed);
        assert_eq!(after_first.retry_count, 1);
        let first_retry_at = after_first.next_retry_at.clone().unwrap();

        let after_second = increment_retry(&db, item.id, "err 2").await.unwrap().unwrap();
        assert_eq!(after_second.retry_count, 2);
        let second_retry_at = after_second.next_retry_at.clone().unwrap();

        let after_third = increment_retry(&db, item.id, "err 3").await.unwrap().unwrap();
        assert_eq!(after_third.retry_count, 3);
        let third_retry_at = after_third.next_retry_at.clone().unwrap();

        // 1 min, then 2 min, then 4 min out: strictly increasing.
        assert!(second_retry_at > first_retry_at);
        assert!(third_retry_at > second_retry_at);
        assert_eq!(after_third.last_error.as_deref(), Some("err 3"));

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn ready_for_retry_excludes_exhausted_and_future_items() {
        let (db, _dir) = setup_db().await;

        // Fresh item: ready immediately (next_retry_at is NULL).
        let fresh = create(&db, new_item("mid-fresh")).await.unwrap();

        // Failed once: backoff pushes next_retry_at into the future.
        let backing_off = create(&db, new_item("mid-backoff")).await.unwrap();
        increment_retry(&db, backing_off.id, "err").await.unwrap();

        // Exhausted: three failures with max_retries = 3.
        let exhausted = create(&db, new_item("mid-exhausted")).await.unwrap();
        for _ in 0..3 {
            increment_retry(&db, exhausted.id, "err").await.unwrap();
        }

        let ready = get_ready_for_retry(&db, 100).await.unwrap();
        let ids: Vec<i64> = ready.iter().map(|i| i.id).collect();
        assert!(ids.contains(&fresh.id));
        assert!(!ids.contains(&backing_off.id), "future next_retry_at");
        assert!(!ids.contains(&exhausted.id), "retry budget exhausted");

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn dead_letter_boundary() {
        let (db, _dir) = setup_db().await;

        let item = create(&db, new_item("mid-boundary")).await.unwrap();
        for _ in 0..2 {
            increment_retry(&db, item.id, "err").await.unwrap();
        }

        // retry_count == max_retries - 1: still retryable.
        let reloaded = find_by_id(&db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.retry_count, 2);
        assert!(find_retry_exhausted(&db, 10).await.unwrap().is_empty());

        // One more failure crosses the boundary.
        increment_retry(&db, item.id, "final err").await.unwrap();
        let exhausted = find_retry_exhausted(&db, 10).await.unwrap();
        assert_eq!(exhausted.len(), 1);
        assert_eq!(exhausted[0].id, item.id);

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn mark_retry_resets_without_consuming_budget() {
        let (db, _dir) = setup_db().await;

        let item = create(&db, new_item("mid-manual")).await.unwrap();
        increment_retry(&db, item.id, "err").await.unwrap();

        let reset = mark_retry(&db, item.id).await.unwrap().unwrap();
        assert_eq!(reset.status, QueueStatus::Pending);
        assert_eq!(reset.retry_count, 1, "manual retry keeps the counter");

        // Immediately eligible again.
        let ready = get_ready_for_retry(&db, 100).await.unwrap();
        assert!(ready.iter().any(|i| i.id == item.id));

        // Items not in failed/dead_letter cannot be manually retried.
        let sent = create(&db, new_item("mid-sent")).await.unwrap();
        update_status(&db, sent.id, QueueStatus::Sent, QueueItemUpdate::default())
            .await
            .unwrap();
        assert!(mark_retry(&db, sent.id).await.unwrap().is_none());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn delete_older_than_only_touches_old_terminal_rows() {
        let (db, _dir) = setup_db().await;

        let old_sent = create(&db, new_item("mid-old-sent")).await.unwrap();
        update_status(&db, old_sent.id, QueueStatus::Sent, QueueItemUpdate::default())
            .await
            .unwrap();
        let old_failed = create(&db, new_item("mid-old-failed")).await.unwrap();
        increment_retry(&db, old_failed.id, "err").await.unwrap();

        // Backdate both rows beyond the retention window.
        db.connection()
            .call(|conn| {
                conn.execute(
                    "UPDATE message_queue SET created_at = '2020-01-01T00:00:00.000Z'",
                    [],
                )?;
                Ok::<_, rusqlite::Error>(())
            })
            .await
            .unwrap();

        let fresh_sent = create(&db, new_item("mid-fresh-sent")).await.unwrap();
        update_status(&db, fresh_sent.id, QueueStatus::Sent, QueueItemUpdate::default())
            .await
            .unwrap();

        let deleted = delete_older_than(&db, 30).await.unwrap();
        assert_eq!(deleted, 1, "only the old sent row goes");

        assert!(find_by_id(&db, old_sent.id).await.unwrap().is_none());
        assert!(
            find_by_id(&db, old_failed.id).await.unwrap().is_some(),
            "failed rows survive cleanup regardless of age"
        );
        assert!(find_by_id(&db, fresh_sent.id).await.unwrap().is_some());

        db.close().await.unwrap();
    }

    #[tokio::test]
    async fn stats_counts_per_status() {
        let (db, _dir) = setup_db().await;

        let a = create(&db, new_item("mid-a")).await.unwrap();
        let b = create(&db, new_item("mid-b")).await.unwrap();
        let _c = create(&db, new_item("mid-c")).await.unwrap();
        update_status(&db, a.id, QueueStatus::Sent, QueueItemUpdate::default())
            .await
            .unwrap();
        update_status(&db, b.id, QueueStatus::DeadLetter, QueueItemUpdate::default())
            .await
            .unwrap();

        let stats = stats(&db).await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.sent, 1);
        assert_eq!(stats.dead_letter, 1);
        assert_eq!(stats.pending, 1);

        db.close().await.unwrap();
    }
}
