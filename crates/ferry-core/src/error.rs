// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types for the Ferry webhook pipeline.

use thiserror::Error;

/// The primary error type used across all Ferry crates.
#[derive(Debug, Error)]
pub enum FerryError {
    /// Configuration errors (invalid TOML, missing required fields, type mismatches).
    #[error("configuration error: {0}")]
    Config(String),

    /// Storage backend errors (database connection, query failure, serialization).
    #[error("storage error: {source}")]
    Storage {
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    /// Meta Graph API errors (send failure, token problems, rate limiting).
    #[error("graph error: {message}")]
    Graph {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// n8n workflow integration errors (forward failure, bad callback).
    #[error("workflow error: {message}")]
    Workflow {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Operation timed out.
    #[error("operation timed out after {duration:?}")]
    Timeout { duration: std::time::Duration },

    /// Internal or unexpected errors.
    #[error("internal error: {0}")]
    Internal(String),
}
