// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Resilient Meta Graph API client for the Ferry webhook pipeline.
//!
//! Outbound replies, webhook field subscriptions, and token refreshes all
//! go through [`GraphClient`], which classifies every failure before
//! deciding whether to retry: transient classes back off exponentially,
//! rate limits wait a fixed cooldown, and permanent classes abort
//! immediately.

pub mod client;
pub mod error;
pub mod types;

pub use client::{FailureEvent, GraphClient, RetryEvent};
pub use error::{GraphError, GraphErrorKind, classify_status};
pub use types::{SendReceipt, TokenResponse};
