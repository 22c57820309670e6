//! Backend error types

use std::time::Duration;
use thiserror::Error;

/// Failure talking to the generative backend
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct BackendError {
    pub kind: BackendErrorKind,
    pub message: String,
    pub retry_after: Option<Duration>,
}

impl BackendError {
    pub fn new(kind: BackendErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn with_retry_after(mut self, duration: Duration) -> Self {
        self.retry_after = Some(duration);
        self
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::ServerError, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(BackendErrorKind::Network, message)
    }

    /// Classify an HTTP status from a backend response
    pub fn from_status(status: u16, message: impl Into<String>) -> Self {
        let kind = match status {
            401 | 403 => BackendErrorKind::Unauthorized,
            429 => BackendErrorKind::RateLimited,
            500..=599 => BackendErrorKind::ServerError,
            _ => BackendErrorKind::Unknown,
        };
        Self::new(kind, message)
    }
}

/// Error classification for retry decisions and user-facing messages
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendErrorKind {
    /// Missing or rejected credentials (401, 403)
    Unauthorized,
    /// Quota or rate limit hit (429)
    RateLimited,
    /// Backend failure (5xx)
    ServerError,
    /// Connection failure or timeout
    Network,
    Unknown,
}

impl BackendErrorKind {
    pub fn is_retryable(self) -> bool {
        matches!(self, Self::RateLimited | Self::ServerError | Self::Network)
    }

    /// Stable identifier used in event payloads
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::RateLimited => "rate_limited",
            Self::ServerError => "server_error",
            Self::Network => "network",
            Self::Unknown => "unknown",
        }
    }
}
