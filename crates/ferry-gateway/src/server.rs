// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Gateway HTTP server built on axum.
//!
//! Sets up routes, middleware, and shared state. Route groups: the public
//! surface (webhook, callback, health, metrics) and the operational API
//! behind bearer auth.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::{
    Router,
    middleware as axum_middleware,
    routing::{get, post},
};
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

use ferry_config::FerryConfig;
use ferry_core::FerryError;
use ferry_storage::Database;

use crate::auth::{AuthConfig, auth_middleware};
use crate::handlers;
use crate::rate_limit::RateLimiter;

/// Shared state for axum request handlers.
#[derive(Clone)]
pub struct GatewayState {
    /// Durable store for events, queue items, and pages.
    pub db: Database,
    /// Full service configuration.
    pub config: Arc<FerryConfig>,
    /// Per-IP limiter for the callback endpoint.
    pub rate_limiter: RateLimiter,
    /// Optional Prometheus metrics render function.
    pub prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    /// Process start time for uptime reporting.
    pub start_time: std::time::Instant,
}

impl GatewayState {
    pub fn new(
        db: Database,
        config: Arc<FerryConfig>,
        prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>>,
    ) -> Self {
        let rate_limiter = RateLimiter::new(
            config.queue.callback_rate_limit,
            std::time::Duration::from_secs(config.queue.callback_rate_window_secs),
        );
        Self {
            db,
            config,
            rate_limiter,
            prometheus_render,
            start_time: std::time::Instant::now(),
        }
    }
}

/// Assemble the full router.
pub fn build_router(state: GatewayState) -> Router {
    let auth_state = AuthConfig {
        bearer_token: state.config.server.bearer_token.clone(),
    };

    // Public surface: platform webhook, n8n callback, health, metrics.
    let public_routes = Router::new()
        .route(
            "/webhook",
            get(handlers::verify_webhook).post(handlers::receive_webhook),
        )
        .route("/integration/callback", post(handlers::n8n_callback))
        .route("/health", get(handlers::get_health))
        .route("/metrics", get(handlers::get_metrics))
        .with_state(state.clone());

    // Operational API behind bearer auth.
    let api_routes = Router::new()
        .route("/api/queue/stats", get(handlers::get_queue_stats))
        .route("/api/events/stats", get(handlers::get_event_stats))
        .route("/api/queue/{message_id}", get(handlers::get_queue_item))
        .route("/api/queue/{message_id}/retry", post(handlers::retry_queue_item))
        .route("/api/events/{id}/retry", post(handlers::retry_event))
        .route_layer(axum_middleware::from_fn_with_state(
            auth_state,
            auth_middleware,
        ))
        .with_state(state);

    Router::new()
        .merge(public_routes)
        .merge(api_routes)
        .layer(CorsLayer::permissive())
}

/// Bind and serve until the cancellation token fires.
pub async fn start_server(state: GatewayState, cancel: CancellationToken) -> Result<(), FerryError> {
    let addr = format!("{}:{}", state.config.server.host, state.config.server.port);
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| FerryError::Internal(format!("failed to bind gateway to {addr}: {e}")))?;

    tracing::info!("gateway listening on {addr}");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(cancel.cancelled_owned())
    .await
    .map_err(|e| FerryError::Internal(format!("gateway server error: {e}")))?;

    Ok(())
}
