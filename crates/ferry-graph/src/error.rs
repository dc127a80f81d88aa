// SPDX-FileCopyrightText: 2026 Ferry Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Graph API error classification.
//!
//! Every failed request is classified before the retry loop decides what
//! to do with it: transient classes are retried with backoff, rate limits
//! wait out a fixed cooldown, and the non-recoverable classes abort
//! immediately so a doomed request never burns the retry budget.

use thiserror::Error;

/// Classification of a failed Graph API call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GraphErrorKind {
    /// The request hit the per-attempt timeout.
    Timeout,
    /// HTTP 429. `retry_after_secs` is the server's hint; the retry loop
    /// waits the configured fixed cooldown regardless.
    RateLimited { retry_after_secs: u64 },
    /// HTTP 401 or platform error code 190: token expired or revoked.
    /// Healed by the token-refresh job, not by retrying.
    InvalidToken,
    /// HTTP 403 or platform error code 200: missing permission or scope.
    /// Requires re-authorization.
    PermissionDenied,
    /// HTTP 400 or platform error code 100: the request itself is wrong.
    /// Never retried.
    InvalidRequest,
    /// HTTP 5xx.
    ServerError,
    /// Any other 4xx. Never retried.
    ClientError,
    /// Connection failures and everything unclassified.
    Unknown,
}

impl GraphErrorKind {
    /// Whether the generic retry loop should attempt this request again.
    ///
    /// Token and permission errors are excluded: they can only be healed
    /// out of band, so retrying blindly would just repeat the failure.
    pub fn retryable(&self) -> bool {
        matches!(
            self,
            GraphErrorKind::Timeout
                | GraphErrorKind::RateLimited { .. }
                | GraphErrorKind::ServerError
                | GraphErrorKind::Unknown
        )
    }

    /// Classes for which any retry is pointless: the request must change
    /// before it can succeed.
    pub fn permanent(&self) -> bool {
        matches!(
            self,
            GraphErrorKind::InvalidRequest | GraphErrorKind::ClientError
        )
    }

    /// Stable label used in metrics and `last_error` strings.
    pub fn label(&self) -> &'static str {
        match self {
            GraphErrorKind::Timeout => "TIMEOUT",
            GraphErrorKind::RateLimited { .. } => "RATE_LIMITED",
            GraphErrorKind::InvalidToken => "INVALID_TOKEN",
            GraphErrorKind::PermissionDenied => "PERMISSION_DENIED",
            GraphErrorKind::InvalidRequest => "INVALID_REQUEST",
            GraphErrorKind::ServerError => "SERVER_ERROR",
            GraphErrorKind::ClientError => "CLIENT_ERROR",
            GraphErrorKind::Unknown => "UNKNOWN_ERROR",
        }
    }
}

/// A classified Graph API failure.
#[derive(Debug, Clone, Error)]
#[error("{}: {message}", kind.label())]
pub struct GraphError {
    pub kind: GraphErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl GraphError {
    pub fn new(kind: GraphErrorKind, status: Option<u16>, message: impl Into<String>) -> Self {
        Self {
            kind,
            status,
            message: message.into(),
        }
    }
}

/// Classify an HTTP status plus the platform error code from the body.
///
/// The platform sometimes reports token problems with a 400 status and
/// `error.code` 190, so the code takes precedence over the raw status.
pub fn classify_status(status: u16, platform_code: Option<i64>) -> GraphErrorKind {
    match platform_code {
        Some(190) => return GraphErrorKind::InvalidToken,
        Some(200) => return GraphErrorKind::PermissionDenied,
        Some(100) => return GraphErrorKind::InvalidRequest,
        _ => {}
    }
    match status {
        429 => GraphErrorKind::RateLimited {
            retry_after_secs: 60,
        },
        401 => GraphErrorKind::InvalidToken,
        403 => GraphErrorKind::PermissionDenied,
        400 => GraphErrorKind::InvalidRequest,
        s if s >= 500 => GraphErrorKind::ServerError,
        s if s >= 400 => GraphErrorKind::ClientError,
        _ => GraphErrorKind::Unknown,
    }
}
