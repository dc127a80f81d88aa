// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Periodic job scheduler for the Ferry webhook pipeline.
//!
//! Drives the queue batch processor, webhook event sweeps, dead-letter
//! auditing, cleanup, stats/alerting, and token refresh. Jobs are
//! independently scheduled and fault-isolated; cancellation stops all of
//! them before `Scheduler::run` returns.

pub mod alerts;
pub mod jobs;
pub mod tasks;

pub use alerts::{Alert, AlertLevel, AlertManager};
pub use jobs::{Job, Scheduler};
pub use tasks::{BatchSummary, PipelineContext, pipeline_jobs};
