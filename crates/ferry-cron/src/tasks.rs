// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The periodic task bodies driven by the scheduler.
//!
//! Batch processing fans out over bounded sub-batches; every item races a
//! processing deadline, and a fired deadline counts as a failure exactly
//! like a thrown error. The dead-letter auditor is the one place that
//! moves retry-exhausted items into `dead_letter`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, error, info, warn};

use ferry_config::FerryConfig;
use ferry_core::{FerryError, QueueStatus};
use ferry_graph::GraphClient;
use ferry_n8n::{IngestOutcome, ProcessOutcome, QueueProcessor, ingest};
use ferry_storage::{Database, QueueItem, QueueItemUpdate, queries};

use crate::alerts::AlertManager;
use crate::jobs::Job;

/// Everything the periodic tasks need, cheap to clone into job closures.
#[derive(Clone)]
pub struct PipelineContext {
    pub db: Database,
    pub config: Arc<FerryConfig>,
    pub processor: QueueProcessor,
    pub graph: GraphClient,
    pub alerts: Arc<Mutex<AlertManager>>,
}

/// Result of one batch pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchSummary {
    pub succeeded: usize,
    pub failed: usize,
}

/// Drain ready queue items in bounded concurrent sub-batches.
pub async fn process_queue_batch(ctx: &PipelineContext) -> Result<BatchSummary, FerryError> {
    let items =
        queries::queue::get_ready_for_retry(&ctx.db, ctx.config.queue.poll_limit as i64).await?;
    if items.is_empty() {
        debug!("no queue items ready for processing");
        return Ok(BatchSummary::default());
    }

    info!(count = items.len(), "processing queue batch");

    let mut summary = BatchSummary::default();
    for chunk in items.chunks(ctx.config.queue.batch_size) {
        let outcomes = join_all(chunk.iter().map(|item| process_with_timeout(ctx, item))).await;
        for outcome in outcomes {
            match outcome {
                outcome if outcome.is_success() => summary.succeeded += 1,
                ProcessOutcome::Skipped => {}
                _ => summary.failed += 1,
            }
        }
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "queue batch complete"
    );
    Ok(summary)
}

/// Race one item against the processing deadline.
///
/// A fired deadline drops the in-flight attempt (cancelling its network
/// call) and increments the retry counter exactly like any other failure.
async fn process_with_timeout(ctx: &PipelineContext, item: &QueueItem) -> ProcessOutcome {
    let deadline = Duration::from_millis(ctx.config.queue.processing_timeout_ms);
    match tokio::time::timeout(deadline, ctx.processor.process_item(item)).await {
        Ok(outcome) => outcome,
        Err(_) => {
            warn!(
                message_id = item.message_id.as_str(),
                timeout_ms = ctx.config.queue.processing_timeout_ms,
                "item processing timed out"
            );
            match queries::queue::increment_retry(&ctx.db, item.id, "processing timeout").await {
                Ok(Some(updated)) if updated.retry_count >= updated.max_retries => {
                    let dead = queries::queue::update_status(
                        &ctx.db,
                        item.id,
                        QueueStatus::DeadLetter,
                        QueueItemUpdate {
                            last_error: Some("retries exhausted: processing timeout".to_string()),
                            ..Default::default()
                        },
                    )
                    .await;
                    if let Err(e) = dead {
                        error!(error = %e, message_id = item.message_id.as_str(),
                               "failed to dead-letter timed-out item");
                        return ProcessOutcome::Failed;
                    }
                    ProcessOutcome::DeadLettered
                }
                Ok(_) => ProcessOutcome::Failed,
                Err(e) => {
                    error!(error = %e, message_id = item.message_id.as_str(),
                           "failed to record timeout");
                    ProcessOutcome::Failed
                }
            }
        }
    }
}

/// Process pending webhook events (the sweeper behind the post-ack spawn).
pub async fn process_pending_events(ctx: &PipelineContext) -> Result<BatchSummary, FerryError> {
    let events =
        queries::events::find_pending(&ctx.db, ctx.config.queue.batch_size as i64).await?;
    process_events(ctx, events).await
}

/// Re-process failed webhook events still under their retry budget.
pub async fn process_retryable_events(ctx: &PipelineContext) -> Result<BatchSummary, FerryError> {
    let events = queries::events::find_retryable(
        &ctx.db,
        ctx.config.queue.max_retries,
        ctx.config.queue.batch_size as i64,
    )
    .await?;
    process_events(ctx, events).await
}

async fn process_events(
    ctx: &PipelineContext,
    events: Vec<ferry_storage::WebhookEvent>,
) -> Result<BatchSummary, FerryError> {
    if events.is_empty() {
        return Ok(BatchSummary::default());
    }

    let mut summary = BatchSummary::default();
    for event in &events {
        let outcome = ingest::process_event(
            &ctx.db,
            event,
            ctx.config.queue.max_retries,
            ctx.config.queue.max_retries,
        )
        .await;
        match outcome {
            IngestOutcome::Failed | IngestOutcome::DeadLettered => summary.failed += 1,
            _ => summary.succeeded += 1,
        }
    }

    info!(
        succeeded = summary.succeeded,
        failed = summary.failed,
        "event batch complete"
    );
    Ok(summary)
}

/// Sweep retry-exhausted items into dead_letter and report on the pile.
pub async fn audit_dead_letters(ctx: &PipelineContext) -> Result<(), FerryError> {
    let exhausted = queries::queue::find_retry_exhausted(&ctx.db, 100).await?;
    for item in &exhausted {
        queries::queue::update_status(
            &ctx.db,
            item.id,
            QueueStatus::DeadLetter,
            QueueItemUpdate::default(),
        )
        .await?;
        warn!(
            message_id = item.message_id.as_str(),
            retry_count = item.retry_count,
            last_error = ?item.last_error,
            "retry budget exhausted, item dead-lettered"
        );
        metrics::counter!("ferry_messages_dead_lettered_total").increment(1);
    }

    let stats = queries::queue::stats(&ctx.db).await?;
    ferry_prometheus::set_dead_letter_count(stats.dead_letter as f64);
    if stats.dead_letter > 0 {
        warn!(
            count = stats.dead_letter,
            "dead-letter queue has items awaiting manual intervention"
        );
    }

    if let Ok(mut alerts) = ctx.alerts.lock() {
        alerts.check_dead_letter_count(stats.dead_letter);
    }
    Ok(())
}

/// Purge aged terminal rows from both tables.
pub async fn cleanup(ctx: &PipelineContext) -> Result<(), FerryError> {
    let days = ctx.config.queue.retention_days;
    let queue_deleted = queries::queue::delete_older_than(&ctx.db, days).await?;
    let events_deleted = queries::events::delete_old_processed(&ctx.db, days).await?;
    if queue_deleted > 0 || events_deleted > 0 {
        info!(queue_deleted, events_deleted, days, "cleaned up old rows");
    }
    Ok(())
}

/// Snapshot stats into gauges and run the alert threshold checks.
pub async fn snapshot_stats(ctx: &PipelineContext) -> Result<(), FerryError> {
    let queue = queries::queue::stats(&ctx.db).await?;
    let events = queries::events::stats(&ctx.db).await?;

    ferry_prometheus::set_queue_depth("pending", queue.pending as f64);
    ferry_prometheus::set_queue_depth("processing", queue.processing as f64);
    ferry_prometheus::set_queue_depth("ready_to_send", queue.ready_to_send as f64);
    ferry_prometheus::set_queue_depth("sent", queue.sent as f64);
    ferry_prometheus::set_queue_depth("failed", queue.failed as f64);
    ferry_prometheus::set_queue_depth("dead_letter", queue.dead_letter as f64);
    ferry_prometheus::set_dead_letter_count(queue.dead_letter as f64);

    info!(
        queue_total = queue.total,
        queue_pending = queue.pending,
        queue_sent = queue.sent,
        queue_failed = queue.failed,
        queue_dead_letter = queue.dead_letter,
        events_total = events.total,
        events_failed = events.failed,
        "pipeline statistics"
    );

    if let Ok(mut alerts) = ctx.alerts.lock() {
        alerts.check_queue_health(queue.sent, queue.failed + queue.dead_letter);
        alerts.check_event_health(events.processed, events.failed + events.dead_letter);
    }
    Ok(())
}

/// Refresh page tokens that expire within a week.
pub async fn refresh_tokens(ctx: &PipelineContext) -> Result<(), FerryError> {
    let (Some(app_id), Some(app_secret)) = (
        ctx.config.graph.app_id.as_deref(),
        ctx.config.webhook.app_secret.as_deref(),
    ) else {
        debug!("app credentials not configured, skipping token refresh");
        return Ok(());
    };

    let pages = queries::pages::find_expiring(&ctx.db, 7).await?;
    if pages.is_empty() {
        debug!("no page tokens close to expiry");
        return Ok(());
    }

    let mut refreshed = 0usize;
    let mut failed = 0usize;
    for page in &pages {
        match ctx
            .graph
            .refresh_token(&page.page_access_token, app_id, app_secret)
            .await
        {
            Ok(token) => {
                let expires_at = token.expires_in.map(|secs| {
                    (chrono::Utc::now() + chrono::Duration::seconds(secs))
                        .format("%Y-%m-%dT%H:%M:%S%.3fZ")
                        .to_string()
                });
                queries::pages::update_token(&ctx.db, page.id, &token.access_token, expires_at)
                    .await?;
                queries::pages::insert_refresh_log(&ctx.db, page.id, "success", None).await?;
                refreshed += 1;
            }
            Err(e) => {
                warn!(
                    page_id = page.page_id.as_str(),
                    error = %e,
                    "token refresh failed"
                );
                queries::pages::insert_refresh_log(
                    &ctx.db,
                    page.id,
                    "failed",
                    Some(e.to_string()),
                )
                .await?;
                failed += 1;
            }
        }
    }

    info!(refreshed, failed, "token refresh pass complete");
    Ok(())
}

/// Build the standard pipeline job set with cadences from config.
pub fn pipeline_jobs(ctx: PipelineContext) -> Vec<Job> {
    let cadence = ctx.config.scheduler.clone();
    let mut jobs = Vec::new();

    let c = ctx.clone();
    jobs.push(Job::new(
        "queue-batch",
        Duration::from_secs(cadence.queue_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { process_queue_batch(&c).await.map(|_| ()) })
        },
    ));

    let c = ctx.clone();
    jobs.push(Job::new(
        "pending-events",
        Duration::from_secs(cadence.event_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { process_pending_events(&c).await.map(|_| ()) })
        },
    ));

    let c = ctx.clone();
    jobs.push(Job::new(
        "retryable-events",
        Duration::from_secs(cadence.event_retry_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { process_retryable_events(&c).await.map(|_| ()) })
        },
    ));

    let c = ctx.clone();
    jobs.push(Job::new(
        "dead-letter-audit",
        Duration::from_secs(cadence.dead_letter_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { audit_dead_letters(&c).await })
        },
    ));

    let c = ctx.clone();
    jobs.push(Job::new(
        "stats",
        Duration::from_secs(cadence.stats_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { snapshot_stats(&c).await })
        },
    ));

    let c = ctx.clone();
    jobs.push(Job::new(
        "cleanup",
        Duration::from_secs(cadence.cleanup_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { cleanup(&c).await })
        },
    ));

    let c = ctx;
    jobs.push(Job::new(
        "token-refresh",
        Duration::from_secs(cadence.token_refresh_interval_secs),
        move || {
            let c = c.clone();
            Box::pin(async move { refresh_tokens(&c).await })
        },
    ));

    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::model::{GraphConfig, N8nConfig};
    use ferry_n8n::N8nClient;
    use ferry_storage::NewQueueItem;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        ctx: PipelineContext,
        _dir: tempfile::TempDir,
    }

    async fn fixture(graph_url: &str, n8n_url: &str, processing_timeout_ms: u64) -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("tasks.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();
        queries::pages::upsert(&db, "page-1", "Page", "tok", None, Some("ig-1".into()))
            .await
            .unwrap();

        let mut config = FerryConfig::default();
        config.graph = GraphConfig {
            base_url: graph_url.to_string(),
            app_id: Some("app-1".to_string()),
            timeout_ms: 2_000,
            max_retries: 1,
            initial_retry_delay_ms: 5,
            max_retry_delay_ms: 10,
            rate_limit_cooldown_ms: 5,
        };
        config.n8n = N8nConfig {
            enabled: true,
            webhook_url: Some(n8n_url.to_string()),
            callback_secret: Some("cb".to_string()),
            timeout_ms: 2_000,
        };
        config.webhook.app_secret = Some("app-secret".to_string());
        config.queue.processing_timeout_ms = processing_timeout_ms;
        let config = Arc::new(config);

        let graph = GraphClient::new(&config.graph).unwrap();
        let n8n = N8nClient::new(&config.n8n, "https://ferry.example.com").unwrap();
        let processor = QueueProcessor::new(db.clone(), graph.clone(), n8n);
        let alerts = Arc::new(Mutex::new(AlertManager::new(config.alerts.clone())));

        Fixture {
            ctx: PipelineContext {
                db,
                config,
                processor,
                graph,
                alerts,
            },
            _dir: dir,
        }
    }

    async fn make_item(db: &Database, mid: &str) -> QueueItem {
        queries::queue::create(
            db,
            NewQueueItem {
                webhook_event_id: None,
                page_id: None,
                instagram_id: Some("ig-1".to_string()),
                sender_id: "user-9".to_string(),
                recipient_id: "page-7".to_string(),
                message_text: "hi".to_string(),
                message_id: mid.to_string(),
                max_retries: 3,
            },
        )
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn batch_forwards_ready_items() {
        let n8n = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(2)
            .mount(&n8n)
            .await;
        let graph = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), 5_000).await;
        make_item(&f.ctx.db, "mid-1").await;
        make_item(&f.ctx.db, "mid-2").await;

        let summary = process_queue_batch(&f.ctx).await.unwrap();
        assert_eq!(summary.succeeded, 2);
        assert_eq!(summary.failed, 0);

        let stats = queries::queue::stats(&f.ctx.db).await.unwrap();
        assert_eq!(stats.processing, 2);

        f.ctx.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn deadline_counts_as_a_failure() {
        let n8n = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
            .mount(&n8n)
            .await;
        let graph = MockServer::start().await;

        // 40ms processing deadline against a 500ms n8n.
        let f = fixture(&graph.uri(), &n8n.uri(), 40).await;
        let item = make_item(&f.ctx.db, "mid-slow").await;

        let summary = process_queue_batch(&f.ctx).await.unwrap();
        assert_eq!(summary.failed, 1);

        let reloaded = queries::queue::find_by_id(&f.ctx.db, item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, QueueStatus::Failed);
        assert_eq!(reloaded.retry_count, 1);
        assert_eq!(reloaded.last_error.as_deref(), Some("processing timeout"));
        assert!(reloaded.next_retry_at.is_some());

        f.ctx.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn audit_moves_exhausted_items_to_dead_letter() {
        let graph = MockServer::start().await;
        let n8n = MockServer::start().await;
        let f = fixture(&graph.uri(), &n8n.uri(), 5_000).await;

        let item = make_item(&f.ctx.db, "mid-exhausted").await;
        for _ in 0..3 {
            queries::queue::increment_retry(&f.ctx.db, item.id, "boom")
                .await
                .unwrap();
        }

        audit_dead_letters(&f.ctx).await.unwrap();

        let reloaded = queries::queue::find_by_id(&f.ctx.db, item.id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(reloaded.status, QueueStatus::DeadLetter);
        // The original failure reason is preserved.
        assert_eq!(reloaded.last_error.as_deref(), Some("boom"));

        f.ctx.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn pending_events_sweep_queues_messages() {
        let graph = MockServer::start().await;
        let n8n = MockServer::start().await;
        let f = fixture(&graph.uri(), &n8n.uri(), 5_000).await;

        let payload = serde_json::json!({
            "object": "instagram",
            "entry": [{
                "id": "ig-1",
                "messaging": [{
                    "sender": {"id": "user-9"},
                    "recipient": {"id": "page-7"},
                    "message": {"mid": "mid-swept", "text": "hello"}
                }]
            }]
        })
        .to_string();
        queries::events::create(&f.ctx.db, None, "messages", &payload)
            .await
            .unwrap();

        let summary = process_pending_events(&f.ctx).await.unwrap();
        assert_eq!(summary.succeeded, 1);

        assert!(
            queries::queue::find_by_message_id(&f.ctx.db, "mid-swept")
                .await
                .unwrap()
                .is_some()
        );

        f.ctx.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn refresh_tokens_updates_pages_and_audit_log() {
        let graph = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/oauth/access_token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "access_token": "fresh-token",
                "expires_in": 5184000
            })))
            .mount(&graph)
            .await;
        let n8n = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), 5_000).await;
        // The fixture page has no expiry recorded, so it counts as expiring.
        refresh_tokens(&f.ctx).await.unwrap();

        let page = queries::pages::find_by_instagram_id(&f.ctx.db, "ig-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(page.page_access_token, "fresh-token");
        assert!(page.token_expires_at.is_some());

        let log_count: i64 = f
            .ctx
            .db
            .connection()
            .call(|conn| {
                let n = conn.query_row(
                    "SELECT COUNT(*) FROM token_refresh_log WHERE status = 'success'",
                    [],
                    |row| row.get(0),
                )?;
                Ok::<_, Box<dyn std::error::Error + Send + Sync>>(n)
            })
            .await
            .unwrap();
        assert_eq!(log_count, 1);

        f.ctx.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn pipeline_job_set_is_complete() {
        let graph = MockServer::start().await;
        let n8n = MockServer::start().await;
        let f = fixture(&graph.uri(), &n8n.uri(), 5_000).await;

        let jobs = pipeline_jobs(f.ctx.clone());
        let names: Vec<&str> = jobs.iter().map(|j| j.name()).collect();
        assert_eq!(
            names,
            vec![
                "queue-batch",
                "pending-events",
                "retryable-events",
                "dead-letter-audit",
                "stats",
                "cleanup",
                "token-refresh",
            ]
        );

        f.ctx.db.close().await.unwrap();
    }
}
