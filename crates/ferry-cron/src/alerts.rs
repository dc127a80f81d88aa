// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Threshold-based operational alerting.
//!
//! The stats job feeds pipeline health numbers in here; breaches start as
//! warnings and escalate to critical after a configured number of
//! consecutive breaches. Alerts are logged through tracing and kept in a
//! bounded in-memory history for the operator surface.

use std::collections::VecDeque;

use ferry_config::model::AlertsConfig;
use strum::Display;
use tracing::{error, warn};

const HISTORY_LIMIT: usize = 1000;

/// Severity of an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
#[strum(serialize_all = "lowercase")]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
}

/// A single fired alert.
#[derive(Debug, Clone)]
pub struct Alert {
    pub timestamp: String,
    pub level: AlertLevel,
    pub title: String,
    pub message: String,
}

/// Tracks alert thresholds and consecutive-breach escalation.
pub struct AlertManager {
    config: AlertsConfig,
    history: VecDeque<Alert>,
    consecutive_queue_breaches: u32,
    consecutive_event_breaches: u32,
}

impl AlertManager {
    pub fn new(config: AlertsConfig) -> Self {
        Self {
            config,
            history: VecDeque::new(),
            consecutive_queue_breaches: 0,
            consecutive_event_breaches: 0,
        }
    }

    /// Check the queue error rate. Escalates to critical after the
    /// configured number of consecutive breaches.
    pub fn check_queue_health(&mut self, succeeded: i64, failed: i64) -> Option<Alert> {
        let breached = error_rate(succeeded, failed) > self.config.error_rate;
        if breached {
            self.consecutive_queue_breaches += 1;
        } else {
            self.consecutive_queue_breaches = 0;
            return None;
        }

        let level = if self.consecutive_queue_breaches >= self.config.consecutive_failures {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        Some(self.fire(
            level,
            "Message queue error rate",
            format!(
                "error rate {:.2}% over threshold ({} failed / {} succeeded)",
                error_rate(succeeded, failed) * 100.0,
                failed,
                succeeded
            ),
        ))
    }

    /// Check the webhook event error rate.
    pub fn check_event_health(&mut self, processed: i64, failed: i64) -> Option<Alert> {
        let breached = error_rate(processed, failed) > self.config.error_rate;
        if breached {
            self.consecutive_event_breaches += 1;
        } else {
            self.consecutive_event_breaches = 0;
            return None;
        }

        let level = if self.consecutive_event_breaches >= self.config.consecutive_failures {
            AlertLevel::Critical
        } else {
            AlertLevel::Warning
        };
        Some(self.fire(
            level,
            "Webhook event error rate",
            format!(
                "error rate {:.2}% over threshold ({} failed / {} processed)",
                error_rate(processed, failed) * 100.0,
                failed,
                processed
            ),
        ))
    }

    /// Check the number of dead-lettered items.
    pub fn check_dead_letter_count(&mut self, count: i64) -> Option<Alert> {
        if count < self.config.dead_letter_threshold {
            return None;
        }
        Some(self.fire(
            AlertLevel::Warning,
            "Dead-letter queue growing",
            format!("{count} items require manual intervention"),
        ))
    }

    /// Check observed API latency against the threshold.
    pub fn check_api_latency(&mut self, latency_ms: u64) -> Option<Alert> {
        if latency_ms <= self.config.api_latency_ms {
            return None;
        }
        Some(self.fire(
            AlertLevel::Warning,
            "High API latency",
            format!(
                "observed {latency_ms}ms, threshold {}ms",
                self.config.api_latency_ms
            ),
        ))
    }

    /// Recent alerts, newest last.
    pub fn history(&self) -> impl Iterator<Item = &Alert> {
        self.history.iter()
    }

    fn fire(&mut self, level: AlertLevel, title: &str, message: String) -> Alert {
        let alert = Alert {
            timestamp: ferry_storage::now_iso(),
            level,
            title: title.to_string(),
            message,
        };

        match level {
            AlertLevel::Critical => {
                error!(title, message = alert.message.as_str(), "ALERT")
            }
            _ => warn!(title, message = alert.message.as_str(), level = %level, "ALERT"),
        }

        self.history.push_back(alert.clone());
        while self.history.len() > HISTORY_LIMIT {
            self.history.pop_front();
        }
        alert
    }
}

fn error_rate(succeeded: i64, failed: i64) -> f64 {
    let total = succeeded + failed;
    if total == 0 {
        return 0.0;
    }
    failed as f64 / total as f64
}
