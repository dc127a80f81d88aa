// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Queue item processing: the forward-or-deliver pipeline.
//!
//! An item arriving here is either waiting to be forwarded to n8n
//! (`pending`/`failed` without a reply yet) or carrying an AI response
//! ready for delivery (`ready_to_send`). Every failure path lands in
//! `increment_retry` so nothing is silently dropped; items that exhaust
//! their budget, or whose failure can never heal, are dead-lettered.

use ferry_core::{FerryError, MessageData, QueueStatus};
use ferry_graph::{GraphClient, GraphErrorKind};
use ferry_storage::{Database, Page, QueueItem, QueueItemUpdate, now_iso, queries};
use tracing::{error, info, warn};

use crate::client::{ForwardStatus, N8nClient};

/// What happened to one queue item during a processing pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// Reply delivered to the platform; item is `sent`.
    Sent,
    /// Message handed to n8n; item is `processing` awaiting the callback.
    Forwarded,
    /// Nothing to do (integration disabled); item left untouched.
    Skipped,
    /// Attempt failed; retry scheduled with backoff.
    Failed,
    /// Item moved to `dead_letter`.
    DeadLettered,
}

impl ProcessOutcome {
    /// Whether the pass made forward progress.
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Sent | ProcessOutcome::Forwarded)
    }
}

/// Drives individual queue items through forward -> reply -> deliver.
#[derive(Clone)]
pub struct QueueProcessor {
    db: Database,
    graph: GraphClient,
    n8n: N8nClient,
}

impl QueueProcessor {
    pub fn new(db: Database, graph: GraphClient, n8n: N8nClient) -> Self {
        Self { db, graph, n8n }
    }

    /// Process one queue item. Never returns an error: every failure is
    /// recorded on the item itself (`last_error`, `retry_count`).
    pub async fn process_item(&self, item: &QueueItem) -> ProcessOutcome {
        let page = match self.resolve_page(item).await {
            Ok(Some(page)) => page,
            Ok(None) => {
                warn!(
                    message_id = item.message_id.as_str(),
                    page_id = ?item.page_id,
                    instagram_id = ?item.instagram_id,
                    "no page found for queue item"
                );
                return self.dead_letter(item, "page not found").await;
            }
            Err(e) => {
                error!(error = %e, message_id = item.message_id.as_str(), "page lookup failed");
                return ProcessOutcome::Failed;
            }
        };

        // A reply is already here: deliver it to the platform.
        if item.status == QueueStatus::ReadyToSend
            && let Some(ref ai_response) = item.ai_response
        {
            return self.deliver(item, ai_response, &page).await;
        }

        // Otherwise hand the message to n8n for AI processing.
        self.forward(item).await
    }

    async fn resolve_page(&self, item: &QueueItem) -> Result<Option<Page>, FerryError> {
        if let Some(page_id) = item.page_id {
            return queries::pages::find_by_id(&self.db, page_id).await;
        }
        if let Some(ref instagram_id) = item.instagram_id {
            return queries::pages::find_by_instagram_id(&self.db, instagram_id).await;
        }
        Ok(None)
    }

    async fn deliver(&self, item: &QueueItem, ai_response: &str, page: &Page) -> ProcessOutcome {
        match self
            .graph
            .send_message(&item.sender_id, ai_response, &page.page_access_token)
            .await
        {
            Ok(receipt) => {
                info!(
                    message_id = item.message_id.as_str(),
                    platform_message_id = receipt.message_id.as_str(),
                    "reply delivered"
                );
                metrics::counter!("ferry_messages_sent_total").increment(1);
                match queries::queue::update_status(
                    &self.db,
                    item.id,
                    QueueStatus::Sent,
                    QueueItemUpdate {
                        sent_to_instagram_at: Some(now_iso()),
                        ..Default::default()
                    },
                )
                .await
                {
                    Ok(_) => ProcessOutcome::Sent,
                    Err(e) => {
                        // The reply went out; re-sending on the next pass
                        // is the at-least-once contract working as intended.
                        error!(error = %e, message_id = item.message_id.as_str(),
                               "failed to record sent status");
                        ProcessOutcome::Failed
                    }
                }
            }
            Err(e) if e.kind.permanent() => {
                warn!(
                    message_id = item.message_id.as_str(),
                    kind = e.kind.label(),
                    "delivery failed permanently"
                );
                self.dead_letter(item, &e.to_string()).await
            }
            Err(e) => {
                if matches!(
                    e.kind,
                    GraphErrorKind::InvalidToken | GraphErrorKind::PermissionDenied
                ) {
                    warn!(
                        message_id = item.message_id.as_str(),
                        kind = e.kind.label(),
                        "delivery blocked pending re-authorization"
                    );
                }
                self.fail(item, &e.to_string()).await
            }
        }
    }

    async fn forward(&self, item: &QueueItem) -> ProcessOutcome {
        let message = MessageData {
            instagram_id: item.instagram_id.clone().unwrap_or_default(),
            sender_id: item.sender_id.clone(),
            recipient_id: item.recipient_id.clone(),
            message_text: item.message_text.clone(),
            message_id: item.message_id.clone(),
            timestamp: 0,
        };

        match self.n8n.forward(&self.db, &message, item.id).await {
            Ok(ForwardStatus::Forwarded) => ProcessOutcome::Forwarded,
            Ok(ForwardStatus::Disabled) => ProcessOutcome::Skipped,
            Ok(ForwardStatus::Failed) => self.fail(item, "failed to forward to n8n").await,
            Err(e) => self.fail(item, &e.to_string()).await,
        }
    }

    /// Record a failed attempt, dead-lettering once the budget is spent.
    async fn fail(&self, item: &QueueItem, error_msg: &str) -> ProcessOutcome {
        metrics::counter!("ferry_messages_failed_total").increment(1);
        match queries::queue::increment_retry(&self.db, item.id, error_msg).await {
            Ok(Some(updated)) if updated.retry_count >= updated.max_retries => {
                self.dead_letter(&updated, &format!("retries exhausted: {error_msg}"))
                    .await
            }
            Ok(_) => ProcessOutcome::Failed,
            Err(e) => {
                error!(error = %e, message_id = item.message_id.as_str(),
                       "failed to record retry");
                ProcessOutcome::Failed
            }
        }
    }

    async fn dead_letter(&self, item: &QueueItem, error_msg: &str) -> ProcessOutcome {
        metrics::counter!("ferry_messages_dead_lettered_total").increment(1);
        match queries::queue::update_status(
            &self.db,
            item.id,
            QueueStatus::DeadLetter,
            QueueItemUpdate {
                last_error: Some(error_msg.to_string()),
                ..Default::default()
            },
        )
        .await
        {
            Ok(_) => {
                warn!(
                    message_id = item.message_id.as_str(),
                    error = error_msg,
                    "queue item dead-lettered"
                );
                ProcessOutcome::DeadLettered
            }
            Err(e) => {
                error!(error = %e, message_id = item.message_id.as_str(),
                       "failed to dead-letter item");
                ProcessOutcome::Failed
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_config::model::{GraphConfig, N8nConfig};
    use ferry_storage::NewQueueItem;
    use tempfile::tempdir;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct Fixture {
        db: Database,
        processor: QueueProcessor,
        _dir: tempfile::TempDir,
    }

    async fn fixture(graph_url: &str, n8n_url: &str, n8n_enabled: bool) -> Fixture {
        let dir = tempdir().unwrap();
        let db_path = dir.path().join("test.db");
        let db = Database::open(db_path.to_str().unwrap()).await.unwrap();

        queries::pages::upsert(&db, "page-1", "Page", "page-token", None, Some("ig-1".into()))
            .await
            .unwrap();

        let graph_config = GraphConfig {
            base_url: graph_url.to_string(),
            app_id: None,
            timeout_ms: 2_000,
            max_retries: 1,
            initial_retry_delay_ms: 5,
            max_retry_delay_ms: 10,
            rate_limit_cooldown_ms: 5,
        };
        let n8n_config = N8nConfig {
            enabled: n8n_enabled,
            webhook_url: Some(n8n_url.to_string()),
            callback_secret: Some("cb".to_string()),
            timeout_ms: 2_000,
        };

        let processor = QueueProcessor::new(
            db.clone(),
            GraphClient::new(&graph_config).unwrap(),
            N8nClient::new(&n8n_config, "https://ferry.example.com").unwrap(),
        );

        Fixture {
            db,
            processor,
            _dir: dir,
        }
    }

    async fn make_item(db: &Database, message_id: &str) -> QueueItem {
        queries::queue::create(
            db,
            NewQueueItem {
                webhook_event_id: None,
                page_id: None,
                instagram_id: Some("ig-1".to_string()),
                sender_id: "user-9".to_string(),
                recipient_id: "page-7".to_string(),
                message_text: "hi".to_string(),
                message_id: message_id.to_string(),
                max_retries: 3,
            },
        )
        .await
        .unwrap()
    }

    async fn make_ready_item(db: &Database, message_id: &str) -> QueueItem {
        let item = make_item(db, message_id).await;
        queries::queue::update_status(
            db,
            item.id,
            QueueStatus::ReadyToSend,
            QueueItemUpdate {
                ai_response: Some("Thanks for reaching out!".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap()
    }

    #[tokio::test]
    async fn pending_item_is_forwarded_to_n8n() {
        let n8n = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(1)
            .mount(&n8n)
            .await;
        let graph = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), true).await;
        let item = make_item(&f.db, "mid-pending").await;

        let outcome = f.processor.process_item(&item).await;
        assert_eq!(outcome, ProcessOutcome::Forwarded);

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::Processing);

        f.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn ready_item_is_delivered_and_marked_sent() {
        let graph = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "message_id": "mid.reply"
            })))
            .expect(1)
            .mount(&graph)
            .await;
        let n8n = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), true).await;
        let item = make_ready_item(&f.db, "mid-ready").await;

        let outcome = f.processor.process_item(&item).await;
        assert_eq!(outcome, ProcessOutcome::Sent);

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::Sent);
        assert!(reloaded.sent_to_instagram_at.is_some());

        f.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn missing_page_dead_letters_immediately() {
        let graph = MockServer::start().await;
        let n8n = MockServer::start().await;
        let f = fixture(&graph.uri(), &n8n.uri(), true).await;

        let item = queries::queue::create(
            &f.db,
            NewQueueItem {
                webhook_event_id: None,
                page_id: None,
                instagram_id: Some("ig-unknown".to_string()),
                sender_id: "user-9".to_string(),
                recipient_id: "page-7".to_string(),
                message_text: "hi".to_string(),
                message_id: "mid-orphan".to_string(),
                max_retries: 3,
            },
        )
        .await
        .unwrap();

        let outcome = f.processor.process_item(&item).await;
        assert_eq!(outcome, ProcessOutcome::DeadLettered);

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::DeadLetter);
        assert_eq!(reloaded.last_error.as_deref(), Some("page not found"));

        f.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn invalid_request_dead_letters_without_burning_retries() {
        let graph = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": {"message": "Invalid parameter", "code": 100}
            })))
            .expect(1)
            .mount(&graph)
            .await;
        let n8n = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), true).await;
        let item = make_ready_item(&f.db, "mid-bad-request").await;

        let outcome = f.processor.process_item(&item).await;
        assert_eq!(outcome, ProcessOutcome::DeadLettered);

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::DeadLetter);
        assert_eq!(reloaded.retry_count, 0, "no retry budget consumed");
        assert!(reloaded.last_error.unwrap().contains("INVALID_REQUEST"));

        f.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn transient_delivery_failure_schedules_retry() {
        let graph = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/me/messages"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&graph)
            .await;
        let n8n = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), true).await;
        let item = make_ready_item(&f.db, "mid-transient").await;

        let outcome = f.processor.process_item(&item).await;
        assert_eq!(outcome, ProcessOutcome::Failed);

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::Failed);
        assert_eq!(reloaded.retry_count, 1);
        assert!(reloaded.next_retry_at.is_some());
        assert!(reloaded.last_error.unwrap().contains("SERVER_ERROR"));

        f.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn exhausted_budget_dead_letters_on_final_failure() {
        let graph = MockServer::start().await;
        let n8n = MockServer::start().await;
        // n8n refuses every forward.
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&n8n)
            .await;

        let f = fixture(&graph.uri(), &n8n.uri(), true).await;
        let item = make_item(&f.db, "mid-doomed").await;

        // max_retries = 3: two failures stay retryable, the third kills it.
        assert_eq!(f.processor.process_item(&item).await, ProcessOutcome::Failed);
        assert_eq!(f.processor.process_item(&item).await, ProcessOutcome::Failed);
        assert_eq!(
            f.processor.process_item(&item).await,
            ProcessOutcome::DeadLettered
        );

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::DeadLetter);
        assert_eq!(reloaded.retry_count, 3);
        assert!(reloaded.last_error.unwrap().starts_with("retries exhausted"));

        f.db.close().await.unwrap();
    }

    #[tokio::test]
    async fn disabled_n8n_leaves_item_queued() {
        let graph = MockServer::start().await;
        let n8n = MockServer::start().await;

        let f = fixture(&graph.uri(), &n8n.uri(), false).await;
        let item = make_item(&f.db, "mid-idle").await;

        let outcome = f.processor.process_item(&item).await;
        assert_eq!(outcome, ProcessOutcome::Skipped);

        let reloaded = queries::queue::find_by_id(&f.db, item.id).await.unwrap().unwrap();
        assert_eq!(reloaded.status, QueueStatus::Pending);
        assert_eq!(reloaded.retry_count, 0);

        f.db.close().await.unwrap();
    }
}
