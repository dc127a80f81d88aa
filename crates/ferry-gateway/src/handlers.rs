// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP request handlers for the gateway.
//!
//! Three surfaces: the Meta webhook (handshake + signed intake), the n8n
//! callback endpoint, and the bearer-authenticated operational API.
//! The webhook POST acks 200 as soon as the event row is durable -- all
//! extraction and queueing happens after the response, and its failures
//! are recorded on the event, never surfaced to the platform.

use std::net::SocketAddr;

use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, Path, Query, State},
    http::{HeaderMap, StatusCode, header},
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use ferry_core::QueueStatus;
use ferry_storage::{QueueItemUpdate, now_iso, queries};

use crate::rate_limit::RateDecision;
use crate::server::GatewayState;
use crate::signature::{constant_time_eq, verify_signature};

/// Error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

fn error_response(status: StatusCode, message: &str) -> Response {
    (
        status,
        Json(ErrorResponse {
            error: message.to_string(),
        }),
    )
        .into_response()
}

// --- Meta webhook ---

/// Query parameters of the GET verification handshake.
#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    #[serde(rename = "hub.mode")]
    pub mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    pub verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    pub challenge: Option<String>,
}

/// GET /webhook
///
/// Subscription handshake: echo the challenge iff the mode is "subscribe"
/// and the verify token matches exactly.
pub async fn verify_webhook(
    State(state): State<GatewayState>,
    Query(params): Query<VerifyParams>,
) -> Response {
    let configured = state.config.webhook.verify_token.as_deref();
    let presented = params.verify_token.as_deref();

    if params.mode.as_deref() == Some("subscribe")
        && let (Some(expected), Some(token)) = (configured, presented)
        && constant_time_eq(token.as_bytes(), expected.as_bytes())
    {
        debug!("webhook verification handshake succeeded");
        return (StatusCode::OK, params.challenge.unwrap_or_default()).into_response();
    }

    warn!(mode = ?params.mode, "webhook verification handshake rejected");
    StatusCode::FORBIDDEN.into_response()
}

/// POST /webhook
///
/// Signed intake. The signature is verified over the exact raw body
/// bytes; 401 is permanent and never retried by us. On success the event
/// row is inserted and 200 returned immediately -- extraction runs in a
/// spawned task so a slow pipeline can never stall the platform's
/// delivery loop.
pub async fn receive_webhook(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(ref app_secret) = state.config.webhook.app_secret else {
        warn!("webhook.app_secret not configured, rejecting delivery");
        ferry_prometheus::record_webhook_rejected("unconfigured");
        return error_response(StatusCode::UNAUTHORIZED, "Webhook secret not configured");
    };

    let Some(signature) = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok())
    else {
        warn!("webhook delivery missing signature header");
        ferry_prometheus::record_webhook_rejected("missing_signature");
        return error_response(StatusCode::UNAUTHORIZED, "Missing signature");
    };

    if !verify_signature(&body, signature, app_secret.as_bytes()) {
        warn!("webhook signature validation failed");
        ferry_prometheus::record_webhook_rejected("invalid_signature");
        return error_response(StatusCode::UNAUTHORIZED, "Invalid signature");
    }

    let raw = String::from_utf8_lossy(&body).into_owned();
    let Ok(payload) = serde_json::from_str::<serde_json::Value>(&raw) else {
        // Authentic but unparseable: ack so the platform stops resending,
        // nothing to store.
        warn!("verified webhook body is not valid JSON");
        ferry_prometheus::record_webhook_rejected("invalid_json");
        return StatusCode::OK.into_response();
    };

    let event_type = payload
        .get("object")
        .and_then(|v| v.as_str())
        .unwrap_or("unknown")
        .to_string();

    let event = match queries::events::create(&state.db, None, &event_type, &raw).await {
        Ok(event) => event,
        Err(e) => {
            // Intake must stay durable-or-retry: without the event row we
            // signal failure so the platform redelivers.
            tracing::error!(error = %e, "failed to persist webhook event");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    ferry_prometheus::record_webhook_received(&event_type);
    info!(
        event_id = event.id,
        event_type = event_type.as_str(),
        "webhook event recorded"
    );

    let db = state.db.clone();
    let queue_max_retries = state.config.queue.max_retries;
    let event_max_retries = state.config.queue.max_retries;
    tokio::spawn(async move {
        ferry_n8n::ingest::process_event(&db, &event, queue_max_retries, event_max_retries).await;
    });

    StatusCode::OK.into_response()
}

// --- n8n callback ---

/// Body of the n8n callback POST.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CallbackRequest {
    pub message_id: Option<String>,
    pub sender_id: Option<String>,
    pub recipient_id: Option<String>,
    pub ai_response: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub n8n_execution_id: Option<String>,
}

/// Success body of the callback endpoint.
#[derive(Debug, Serialize)]
pub struct CallbackResponse {
    pub success: bool,
    pub message: String,
}

/// POST /integration/callback
///
/// Receives the asynchronous AI reply from n8n, correlated by message ID.
/// Order of checks: rate limit (429), shared secret (401), payload (400),
/// lookup (404), terminal state (409).
pub async fn n8n_callback(
    State(state): State<GatewayState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let caller = addr.ip().to_string();
    if let RateDecision::Limited { retry_after_secs } = state.rate_limiter.check(&caller) {
        warn!(ip = caller.as_str(), "callback rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after_secs.to_string())],
            Json(ErrorResponse {
                error: "Too many requests".to_string(),
            }),
        )
            .into_response();
    }

    let Some(ref expected_secret) = state.config.n8n.callback_secret else {
        tracing::error!("n8n.callback_secret is not configured");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Server configuration error",
        );
    };
    let Some(presented) = headers
        .get("x-callback-secret")
        .and_then(|v| v.to_str().ok())
    else {
        warn!(ip = caller.as_str(), "callback missing X-Callback-Secret header");
        return error_response(StatusCode::UNAUTHORIZED, "Missing authentication header");
    };
    if !constant_time_eq(presented.as_bytes(), expected_secret.as_bytes()) {
        warn!(ip = caller.as_str(), "callback with invalid secret");
        return error_response(StatusCode::UNAUTHORIZED, "Unauthorized");
    }

    let Ok(request) = serde_json::from_slice::<CallbackRequest>(&body) else {
        return error_response(StatusCode::BAD_REQUEST, "Invalid JSON body");
    };
    let (Some(message_id), Some(_), Some(_), Some(ai_response)) = (
        request.message_id.as_deref(),
        request.sender_id.as_deref(),
        request.recipient_id.as_deref(),
        request.ai_response.as_deref(),
    ) else {
        warn!("invalid n8n callback payload");
        return error_response(StatusCode::BAD_REQUEST, "Missing required fields");
    };

    let item = match queries::queue::find_by_message_id(&state.db, message_id).await {
        Ok(Some(item)) => item,
        Ok(None) => {
            warn!(message_id, "callback for unknown message");
            return error_response(StatusCode::NOT_FOUND, "Message not found");
        }
        Err(e) => {
            tracing::error!(error = %e, "callback lookup failed");
            return error_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                "Failed to process callback",
            );
        }
    };

    if item.status.is_terminal() {
        warn!(
            message_id,
            status = %item.status,
            "callback for already-terminal message rejected"
        );
        return error_response(StatusCode::CONFLICT, "Message already completed");
    }

    let reported_status = request.status.as_deref().unwrap_or("success");
    let new_status = if reported_status == "success" {
        QueueStatus::ReadyToSend
    } else {
        QueueStatus::Failed
    };

    let update = QueueItemUpdate {
        ai_response: Some(ai_response.to_string()),
        n8n_execution_id: request.n8n_execution_id.clone(),
        received_from_n8n_at: Some(now_iso()),
        ..Default::default()
    };
    if let Err(e) = queries::queue::update_status(&state.db, item.id, new_status, update).await {
        tracing::error!(error = %e, message_id, "failed to apply callback");
        return error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "Failed to process callback",
        );
    }

    ferry_prometheus::record_callback(reported_status);
    info!(
        message_id,
        status = reported_status,
        execution_id = ?request.n8n_execution_id,
        "n8n callback applied"
    );

    (
        StatusCode::OK,
        Json(CallbackResponse {
            success: true,
            message: "Callback processed".to_string(),
        }),
    )
        .into_response()
}

// --- public health + metrics ---

/// Response body for GET /health.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub uptime_secs: u64,
}

/// GET /health
pub async fn get_health(State(state): State<GatewayState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_secs: state.start_time.elapsed().as_secs(),
    })
}

/// GET /metrics
///
/// Prometheus text format, or 404 when the recorder is disabled.
pub async fn get_metrics(State(state): State<GatewayState>) -> Response {
    match state.prometheus_render {
        Some(ref render) => (StatusCode::OK, render()).into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

// --- operational API (bearer auth) ---

/// GET /api/queue/stats
pub async fn get_queue_stats(State(state): State<GatewayState>) -> Response {
    match queries::queue::stats(&state.db).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch queue stats");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch stats")
        }
    }
}

/// GET /api/events/stats
pub async fn get_event_stats(State(state): State<GatewayState>) -> Response {
    match queries::events::stats(&state.db).await {
        Ok(stats) => Json(stats).into_response(),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch event stats");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch stats")
        }
    }
}

/// GET /api/queue/{message_id}
pub async fn get_queue_item(
    State(state): State<GatewayState>,
    Path(message_id): Path<String>,
) -> Response {
    match queries::queue::find_by_message_id(&state.db, &message_id).await {
        Ok(Some(item)) => Json(item).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Message not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch queue item");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch message")
        }
    }
}

/// POST /api/queue/{message_id}/retry
///
/// Manual retry: resets a failed or dead-lettered item to pending with an
/// immediate `next_retry_at`. The retry counter is untouched --
/// `increment_retry` owns the backoff formula.
pub async fn retry_queue_item(
    State(state): State<GatewayState>,
    Path(message_id): Path<String>,
) -> Response {
    let item = match queries::queue::find_by_message_id(&state.db, &message_id).await {
        Ok(Some(item)) => item,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Message not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch queue item");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retry message");
        }
    };

    if !matches!(item.status, QueueStatus::Failed | QueueStatus::DeadLetter) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Cannot retry message with status: {}", item.status),
        );
    }

    match queries::queue::mark_retry(&state.db, item.id).await {
        Ok(Some(updated)) => {
            info!(message_id = message_id.as_str(), "message queued for manual retry");
            Json(updated).into_response()
        }
        Ok(None) => error_response(StatusCode::CONFLICT, "Message state changed, retry aborted"),
        Err(e) => {
            tracing::error!(error = %e, "failed to retry queue item");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retry message")
        }
    }
}

/// POST /api/events/{id}/retry
///
/// Manual retry of a failed or dead-lettered webhook event.
pub async fn retry_event(State(state): State<GatewayState>, Path(id): Path<i64>) -> Response {
    let event = match queries::events::find_by_id(&state.db, id).await {
        Ok(Some(event)) => event,
        Ok(None) => return error_response(StatusCode::NOT_FOUND, "Event not found"),
        Err(e) => {
            tracing::error!(error = %e, "failed to fetch event");
            return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retry event");
        }
    };

    if !matches!(
        event.status,
        ferry_core::EventStatus::Failed | ferry_core::EventStatus::DeadLetter
    ) {
        return error_response(
            StatusCode::BAD_REQUEST,
            &format!("Cannot retry event with status: {}", event.status),
        );
    }

    match queries::events::retry(&state.db, id).await {
        Ok(Some(updated)) => {
            info!(event_id = id, "event queued for manual retry");
            Json(updated).into_response()
        }
        Ok(None) => error_response(StatusCode::CONFLICT, "Event state changed, retry aborted"),
        Err(e) => {
            tracing::error!(error = %e, "failed to retry event");
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to retry event")
        }
    }
}
