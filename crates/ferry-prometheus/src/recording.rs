// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Metric registration and recording helpers.
//!
//! Uses the metrics-rs facade so any recorder (Prometheus, statsd, etc.)
//! can collect these metrics.

use metrics::{describe_counter, describe_gauge, describe_histogram};

/// Register all Ferry metric descriptions.
///
/// Called once at startup after the recorder is installed.
pub fn register_metrics() {
    describe_counter!(
        "ferry_webhooks_received_total",
        "Signed webhook deliveries accepted"
    );
    describe_counter!(
        "ferry_webhooks_rejected_total",
        "Webhook deliveries rejected before intake"
    );
    describe_counter!("ferry_messages_queued_total", "Queue items created");
    describe_counter!(
        "ferry_n8n_forwarded_total",
        "Messages accepted by the n8n workflow"
    );
    describe_counter!(
        "ferry_n8n_forward_failures_total",
        "Forward attempts n8n rejected or timed out"
    );
    describe_counter!(
        "ferry_callbacks_total",
        "Callbacks received from the n8n workflow"
    );
    describe_counter!(
        "ferry_messages_sent_total",
        "Replies delivered to the platform"
    );
    describe_counter!(
        "ferry_messages_failed_total",
        "Processing attempts that ended in a retry"
    );
    describe_counter!(
        "ferry_messages_dead_lettered_total",
        "Queue items moved to dead_letter"
    );
    describe_counter!(
        "ferry_graph_retries_total",
        "Graph API attempts that were retried"
    );
    describe_counter!(
        "ferry_graph_failures_total",
        "Graph API requests that gave up"
    );
    describe_gauge!("ferry_queue_depth", "Queue items per status");
    describe_gauge!("ferry_dead_letter_count", "Items currently dead-lettered");
    describe_histogram!(
        "ferry_graph_latency_seconds",
        "Graph API request latency in seconds"
    );
}

/// Record an accepted webhook delivery.
pub fn record_webhook_received(event_type: &str) {
    metrics::counter!("ferry_webhooks_received_total", "event_type" => event_type.to_string())
        .increment(1);
}

/// Record a rejected webhook delivery.
pub fn record_webhook_rejected(reason: &str) {
    metrics::counter!("ferry_webhooks_rejected_total", "reason" => reason.to_string())
        .increment(1);
}

/// Record a newly created queue item.
pub fn record_message_queued() {
    metrics::counter!("ferry_messages_queued_total").increment(1);
}

/// Record a message accepted by n8n.
pub fn record_message_forwarded() {
    metrics::counter!("ferry_n8n_forwarded_total").increment(1);
}

/// Record a reply delivered to the platform.
pub fn record_message_sent() {
    metrics::counter!("ferry_messages_sent_total").increment(1);
}

/// Record a processing attempt that ended in a retry.
pub fn record_message_failed() {
    metrics::counter!("ferry_messages_failed_total").increment(1);
}

/// Record a callback from n8n with its reported status.
pub fn record_callback(status: &str) {
    metrics::counter!("ferry_callbacks_total", "status" => status.to_string()).increment(1);
}

/// Set the queue depth gauge for one status.
pub fn set_queue_depth(status: &str, count: f64) {
    metrics::gauge!("ferry_queue_depth", "status" => status.to_string()).set(count);
}

/// Set the dead-letter gauge.
pub fn set_dead_letter_count(count: f64) {
    metrics::gauge!("ferry_dead_letter_count").set(count);
}
