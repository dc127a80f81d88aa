// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `ferry serve` command implementation.
//!
//! Wires the full pipeline: SQLite storage, Prometheus recorder, Graph
//! and n8n clients, the HTTP gateway, and the job scheduler. Both
//! long-running halves (gateway + scheduler) share one cancellation
//! token, so a termination signal drains everything before exit.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use ferry_config::FerryConfig;
use ferry_core::FerryError;
use ferry_cron::{AlertManager, Job, PipelineContext, Scheduler, pipeline_jobs};
use ferry_gateway::GatewayState;
use ferry_graph::GraphClient;
use ferry_n8n::{N8nClient, QueueProcessor};
use ferry_storage::Database;

/// Runs the `ferry serve` command.
pub async fn run_serve(config: FerryConfig) -> Result<(), FerryError> {
    init_tracing(&config.service.log_level);
    let config = Arc::new(config);

    info!(name = config.service.name.as_str(), "starting ferry serve");

    // Storage first: everything else hangs off the database.
    let db = Database::open(&config.storage.database_path).await?;
    info!(path = config.storage.database_path.as_str(), "storage ready");

    // Prometheus recorder (optional).
    let prometheus = if config.prometheus.enabled {
        match ferry_prometheus::PrometheusRecorder::new() {
            Ok(recorder) => Some(Arc::new(recorder)),
            Err(e) => {
                tracing::warn!(error = %e, "prometheus initialization failed, continuing without metrics");
                None
            }
        }
    } else {
        debug!("prometheus metrics disabled by configuration");
        None
    };
    let prometheus_render: Option<Arc<dyn Fn() -> String + Send + Sync>> =
        prometheus.as_ref().map(|recorder| {
            let recorder = recorder.clone();
            Arc::new(move || recorder.render()) as Arc<dyn Fn() -> String + Send + Sync>
        });

    // Outbound clients and the queue processor.
    let graph = GraphClient::new(&config.graph)?;
    let n8n = N8nClient::new(&config.n8n, &config.server.public_base_url)?;
    let processor = QueueProcessor::new(db.clone(), graph.clone(), n8n);

    if !config.n8n.enabled {
        info!("n8n integration disabled; inbound messages will queue until it is enabled");
    }

    // Gateway state (owns the callback rate limiter).
    let gateway_state = GatewayState::new(db.clone(), config.clone(), prometheus_render);

    // Scheduler: the standard pipeline jobs plus the rate-limiter sweep.
    let alerts = Arc::new(Mutex::new(AlertManager::new(config.alerts.clone())));
    let ctx = PipelineContext {
        db: db.clone(),
        config: config.clone(),
        processor,
        graph,
        alerts,
    };

    let mut scheduler = Scheduler::new();
    for job in pipeline_jobs(ctx) {
        scheduler.add(job);
    }
    let limiter = gateway_state.rate_limiter.clone();
    scheduler.add(Job::new(
        "rate-limit-sweep",
        Duration::from_secs(config.queue.callback_rate_window_secs),
        move || {
            let limiter = limiter.clone();
            Box::pin(async move {
                limiter.sweep();
                Ok(())
            })
        },
    ));
    info!(jobs = scheduler.job_count(), "scheduler configured");

    // Shared shutdown signal.
    let cancel = install_signal_handler();

    let scheduler_handle = tokio::spawn(scheduler.run(cancel.clone()));
    let server_result = ferry_gateway::start_server(gateway_state, cancel.clone()).await;

    // The gateway returning (shutdown or bind failure) takes the
    // scheduler down with it.
    cancel.cancel();
    let _ = scheduler_handle.await;

    db.close().await?;
    info!("ferry serve shutdown complete");
    server_result
}

/// Installs signal handlers for SIGTERM and SIGINT.
///
/// Returns a [`CancellationToken`] that is cancelled when either signal is
/// received.
fn install_signal_handler() -> CancellationToken {
    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::spawn(async move {
        let ctrl_c = tokio::signal::ctrl_c();

        #[cfg(unix)]
        {
            use tokio::signal::unix::{SignalKind, signal};
            let mut sigterm =
                signal(SignalKind::terminate()).expect("failed to install SIGTERM handler");

            tokio::select! {
                _ = ctrl_c => {
                    info!("received SIGINT (Ctrl+C), initiating shutdown");
                }
                _ = sigterm.recv() => {
                    info!("received SIGTERM, initiating shutdown");
                }
            }
        }

        #[cfg(not(unix))]
        {
            let _ = ctrl_c.await;
            info!("received Ctrl+C, initiating shutdown");
        }

        token_clone.cancel();
        debug!("shutdown signal handler completed");
    });

    token
}

/// Initializes the tracing subscriber with the given log level.
fn init_tracing(log_level: &str) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("ferry={log_level},warn")));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_names(false)
        .init();
}
