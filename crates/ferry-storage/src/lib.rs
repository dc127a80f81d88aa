// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SQLite persistence layer for the Ferry webhook pipeline.
//!
//! All durable state lives here: received webhook events, the message
//! processing queue, connected pages, and the token-refresh audit log.
//! Writes are serialized through tokio-rusqlite's single background thread;
//! every mutation is a single-row atomic update (or a short explicit
//! transaction), and the UNIQUE constraint on `message_queue.message_id`
//! is the concurrency guard against duplicate ingestion.

pub mod database;
pub mod migrations;
pub mod models;
pub mod queries;

pub use database::{Database, now_iso};
pub use models::{
    EventStats, NewQueueItem, Page, QueueItem, QueueItemUpdate, QueueStats, WebhookEvent,
};
