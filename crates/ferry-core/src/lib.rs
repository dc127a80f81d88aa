// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Core library for the Ferry webhook pipeline.
//!
//! This crate provides the error type and the domain types shared across
//! the Ferry workspace: webhook event and queue item status lifecycles,
//! and the normalized message record extracted from inbound webhooks.

pub mod error;
pub mod types;

// Re-export key items at crate root for ergonomic imports.
pub use error::FerryError;
pub use types::{EventStatus, MessageData, QueueStatus};
