// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! HTTP gateway for the Ferry webhook pipeline.
//!
//! Serves the Meta webhook (verification handshake + HMAC-signed intake),
//! the n8n callback endpoint (shared secret + per-IP rate limiting), the
//! bearer-authenticated operational API, and the public health/metrics
//! endpoints.

pub mod auth;
pub mod handlers;
pub mod rate_limit;
pub mod server;
pub mod signature;

pub use rate_limit::{RateDecision, RateLimiter};
pub use server::{GatewayState, build_router, start_server};
pub use signature::{constant_time_eq, sign, verify_signature};
