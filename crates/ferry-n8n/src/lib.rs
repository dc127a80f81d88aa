// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! n8n workflow integration for the Ferry webhook pipeline.
//!
//! Extraction turns raw webhook payloads into normalized message records,
//! ingest creates queue items from verified events (idempotent on the
//! platform message ID), the forward client hands messages to the n8n AI
//! workflow, and the processor drives each queue item through
//! forward -> reply -> deliver with retry accounting.

pub mod client;
pub mod extract;
pub mod ingest;
pub mod processor;

pub use client::{ForwardStatus, N8nClient};
pub use extract::extract_message_data;
pub use ingest::{IngestOutcome, process_event};
pub use processor::{ProcessOutcome, QueueProcessor};
