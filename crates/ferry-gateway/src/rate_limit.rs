// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Fixed-window per-caller rate limiting.
//!
//! Bounds abuse of the callback endpoint: each caller key (IP) gets a
//! budget of requests per window. Windows live in a shared map with an
//! explicit TTL sweep driven by the scheduler, so the map cannot grow
//! without bound.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;

/// Outcome of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateDecision {
    Allowed,
    /// Over budget; `retry_after_secs` is the time until the window resets.
    Limited { retry_after_secs: u64 },
}

struct Window {
    started_at: Instant,
    count: u32,
}

/// Shared fixed-window rate limiter. Cloning shares the window map.
#[derive(Clone)]
pub struct RateLimiter {
    windows: Arc<DashMap<String, Window>>,
    max_requests: u32,
    window: Duration,
}

impl RateLimiter {
    pub fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            windows: Arc::new(DashMap::new()),
            max_requests,
            window,
        }
    }

    /// Count a request against `key` and decide whether it may proceed.
    pub fn check(&self, key: &str) -> RateDecision {
        let now = Instant::now();
        let mut entry = self.windows.entry(key.to_string()).or_insert(Window {
            started_at: now,
            count: 0,
        });

        // Window expired: start a fresh one.
        if now.duration_since(entry.started_at) >= self.window {
            entry.started_at = now;
            entry.count = 0;
        }

        if entry.count >= self.max_requests {
            let elapsed = now.duration_since(entry.started_at);
            let remaining = self.window.saturating_sub(elapsed);
            return RateDecision::Limited {
                retry_after_secs: remaining.as_secs().max(1),
            };
        }

        entry.count += 1;
        RateDecision::Allowed
    }

    /// Drop windows that have fully expired. Called periodically.
    pub fn sweep(&self) {
        let now = Instant::now();
        let window = self.window;
        self.windows
            .retain(|_, w| now.duration_since(w.started_at) < window);
    }

    /// Number of caller keys currently tracked.
    pub fn tracked(&self) -> usize {
        self.windows.len()
    }
}
