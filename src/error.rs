use std::time::Duration;

use serde::Serialize;

/// Classification carried by every [`GatewayError`].
///
/// Retry policy and JSON-RPC mapping both match on this tag instead of
/// inspecting concrete error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Auth,
    NotFound,
    Overload,
    Network,
    Validation,
    Internal,
}

impl ErrorKind {
    /// Stable error name, matched against retry pattern sets.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Auth => "AuthenticationError",
            Self::NotFound => "NotFoundError",
            Self::Overload => "OverloadError",
            Self::Network => "NetworkError",
            Self::Validation => "ValidationError",
            Self::Internal => "InternalError",
        }
    }

    /// Map to the corresponding JSON-RPC 2.0 error code.
    ///
    /// Auth failures reuse -32600, caller mistakes and missing resources
    /// are -32602, everything server-side is -32603.
    pub fn json_rpc_code(&self) -> i32 {
        match self {
            Self::Auth => -32600,
            Self::Validation | Self::NotFound => -32602,
            Self::Overload | Self::Network | Self::Internal => -32603,
        }
    }

    fn message_prefix(&self) -> &'static str {
        match self {
            Self::Auth => "Authentication failed",
            Self::NotFound => "Resource not found",
            Self::Overload => "Service temporarily unavailable",
            Self::Network => "Network error",
            Self::Validation => "Invalid params",
            Self::Internal => "Internal error",
        }
    }
}

/// Error value flowing through retry, dedup, cache and dispatch.
///
/// `Clone` so that every caller attached to a deduplicated execution
/// receives the same error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{}: {message}", kind.name())]
pub struct GatewayError {
    pub kind: ErrorKind,
    pub message: String,
    /// Explicit retry decision; `None` defers to pattern and status heuristics.
    pub retryable: Option<bool>,
    pub overloaded: bool,
    pub http_status: Option<u16>,
    /// Server-provided `Retry-After`, when the upstream sent one.
    pub retry_after: Option<Duration>,
    /// 1-based attempt that produced this error (0 when never retried).
    pub attempt: u32,
    pub total_attempts: u32,
}

impl GatewayError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        let (retryable, overloaded) = match kind {
            ErrorKind::Auth | ErrorKind::NotFound | ErrorKind::Validation => (Some(false), false),
            ErrorKind::Overload => (Some(true), true),
            ErrorKind::Network => (Some(true), false),
            ErrorKind::Internal => (None, false),
        };
        Self {
            kind,
            message: message.into(),
            retryable,
            overloaded,
            http_status: None,
            retry_after: None,
            attempt: 0,
            total_attempts: 0,
        }
    }

    pub fn auth(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Auth, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::NotFound, message)
    }

    pub fn overload(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Overload, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Validation, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Internal, message)
    }

    /// Classify an upstream HTTP status.
    ///
    /// Statuses without a dedicated kind stay `Internal` with no explicit
    /// retry flag, leaving the decision to the status heuristic.
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let mut err = match status {
            401 | 403 => Self::auth(message),
            404 => Self::not_found(message),
            429 | 503 => Self::overload(message),
            408 => Self::network(message),
            400 | 422 => Self::validation(message),
            _ => Self::internal(message),
        };
        err.http_status = Some(status);
        err
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = Some(retryable);
        self
    }

    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after = Some(retry_after);
        self
    }

    /// Human-readable message used in JSON-RPC error envelopes.
    pub fn public_message(&self) -> String {
        format!("{}: {}", self.kind.message_prefix(), self.message)
    }
}
