// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Prometheus metrics exporter for the Ferry webhook pipeline.
//!
//! Uses the metrics-rs facade with the Prometheus exporter. Metrics are
//! rendered as Prometheus text format via the `render()` method, which is
//! exposed through the gateway's /metrics endpoint.

pub mod recording;

use ferry_core::FerryError;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

pub use recording::{
    record_callback, record_message_failed, record_message_forwarded, record_message_queued,
    record_message_sent, record_webhook_received, record_webhook_rejected, set_dead_letter_count,
    set_queue_depth,
};

/// Prometheus metrics recorder.
///
/// Installs the Prometheus recorder and exposes a handle for rendering
/// metrics in Prometheus text format.
pub struct PrometheusRecorder {
    handle: PrometheusHandle,
}

impl PrometheusRecorder {
    /// Create a new PrometheusRecorder.
    ///
    /// Installs the Prometheus recorder globally. Only one recorder can be
    /// installed per process. Returns an error if a recorder is already
    /// installed.
    pub fn new() -> Result<Self, FerryError> {
        let handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
            FerryError::Internal(format!("failed to install Prometheus recorder: {e}"))
        })?;

        recording::register_metrics();

        tracing::info!("prometheus metrics recorder installed");

        Ok(Self { handle })
    }

    /// Get a reference to the Prometheus handle for rendering.
    pub fn handle(&self) -> &PrometheusHandle {
        &self.handle
    }

    /// Render all collected metrics in Prometheus text format.
    pub fn render(&self) -> String {
        self.handle.render()
    }
}
