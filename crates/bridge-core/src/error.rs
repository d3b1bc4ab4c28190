//! Error types for the bridge.
//!
//! Every failure that can cross a crate boundary is a [`BridgeError`]. Once the
//! retry controller has given up, the error is wrapped in a [`BridgeFailure`]
//! which carries the request id, elapsed time and final retry decision.

use crate::types::RequestId;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Result type alias for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Main error type for the bridge
#[derive(Debug, Clone, Error)]
pub enum BridgeError {
    /// The client payload could not be normalized
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Error message
        message: String,
        /// Field that failed normalization
        field: Option<String>,
    },

    /// No backend passed the startup availability check
    #[error("No backend available")]
    NoBackendAvailable,

    /// Rate limiting, 5xx or transport failure from the upstream
    #[error("Transient upstream error from {backend}: {message}")]
    TransientUpstream {
        /// Backend that produced the error
        backend: String,
        /// Error message
        message: String,
        /// HTTP-style status code, if any
        status_code: Option<u16>,
    },

    /// The adapter call did not finish in time
    #[error("Request timed out after {timeout:?}")]
    Timeout {
        /// Timeout that elapsed
        timeout: Duration,
    },

    /// Authentication or permission failure reported by the backend
    #[error("Upstream rejected request from {backend}: {message}")]
    UpstreamRejected {
        /// Backend that rejected the request
        backend: String,
        /// Error message
        message: String,
        /// HTTP-style status code, if any
        status_code: Option<u16>,
    },

    /// Invalid startup configuration
    #[error("Configuration error: {message}")]
    Configuration {
        /// Error message
        message: String,
    },

    /// Unexpected internal failure
    #[error("Internal error: {message}")]
    Internal {
        /// Error message
        message: String,
    },
}

impl BridgeError {
    /// Create an invalid request error
    #[must_use]
    pub fn invalid_request(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
            field: field.map(str::to_string),
        }
    }

    /// Create a transient upstream error
    #[must_use]
    pub fn transient(
        backend: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::TransientUpstream {
            backend: backend.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Create a timeout error
    #[must_use]
    pub fn timeout(timeout: Duration) -> Self {
        Self::Timeout { timeout }
    }

    /// Create an upstream rejection error
    #[must_use]
    pub fn rejected(
        backend: impl Into<String>,
        message: impl Into<String>,
        status_code: Option<u16>,
    ) -> Self {
        Self::UpstreamRejected {
            backend: backend.into(),
            message: message.into(),
            status_code,
        }
    }

    /// Create a configuration error
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an internal error
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Stable classification of this error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidRequest { .. } => ErrorKind::InvalidRequest,
            Self::NoBackendAvailable => ErrorKind::NoBackendAvailable,
            Self::TransientUpstream { .. } => ErrorKind::TransientUpstream,
            Self::Timeout { .. } => ErrorKind::Timeout,
            Self::UpstreamRejected { .. } => ErrorKind::UpstreamRejected,
            Self::Configuration { .. } => ErrorKind::Configuration,
            Self::Internal { .. } => ErrorKind::Internal,
        }
    }

    /// Whether the error kind is retryable on its own, ignoring status codes
    /// and message heuristics applied by the retry controller
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientUpstream { .. } | Self::Timeout { .. })
    }

    /// Upstream status code attached to the error
    #[must_use]
    pub fn status_code(&self) -> Option<u16> {
        match self {
            Self::TransientUpstream { status_code, .. }
            | Self::UpstreamRejected { status_code, .. } => *status_code,
            Self::Timeout { .. } => Some(408),
            _ => None,
        }
    }

    /// HTTP status the excluded HTTP layer is expected to answer with
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::InvalidRequest { .. } => 400,
            Self::NoBackendAvailable => 503,
            Self::TransientUpstream { status_code, .. } => match status_code {
                Some(429) => 429,
                _ => 502,
            },
            Self::Timeout { .. } => 504,
            Self::UpstreamRejected { .. } => 502,
            Self::Configuration { .. } | Self::Internal { .. } => 500,
        }
    }
}

/// Error kind reported to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Normalization failure
    InvalidRequest,
    /// No backend is available
    NoBackendAvailable,
    /// Retryable upstream failure
    TransientUpstream,
    /// Adapter call timed out
    Timeout,
    /// Authentication or permission failure from the backend
    UpstreamRejected,
    /// Configuration failure
    Configuration,
    /// Internal failure
    Internal,
}

impl ErrorKind {
    /// Snake-case name of the kind
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::InvalidRequest => "invalid_request",
            Self::NoBackendAvailable => "no_backend_available",
            Self::TransientUpstream => "transient_upstream",
            Self::Timeout => "timeout",
            Self::UpstreamRejected => "upstream_rejected",
            Self::Configuration => "configuration",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error that has crossed the bridge boundary.
///
/// The retry controller owns the `retryable` decision; the HTTP layer only reads it.
#[derive(Debug, Clone, Error)]
#[error("{error}")]
pub struct BridgeFailure {
    /// Underlying error
    pub error: BridgeError,
    /// Correlation id of the failed call
    pub request_id: RequestId,
    /// Wall time spent on the call, including backoff sleeps
    pub duration_ms: u64,
    /// Number of adapter attempts made
    pub attempts: u32,
    /// Whether the client may resubmit
    pub retryable: bool,
}

impl BridgeFailure {
    /// Wrap an error that never reached the retry controller
    #[must_use]
    pub fn immediate(error: BridgeError, request_id: RequestId, duration: Duration) -> Self {
        Self {
            error,
            request_id,
            duration_ms: duration.as_millis() as u64,
            attempts: 0,
            retryable: false,
        }
    }

    /// Error kind of the underlying error
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.error.kind()
    }

    /// Structured body sent to clients
    #[must_use]
    pub fn body(&self) -> ErrorBody {
        ErrorBody {
            error: self.error.to_string(),
            kind: self.kind(),
            request_id: self.request_id.to_string(),
            duration_ms: self.duration_ms,
            retryable: self.retryable,
        }
    }
}

/// Wire shape of a failed call: `{error, kind, requestId, durationMs, retryable}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorBody {
    /// Human-readable message
    pub error: String,
    /// Error kind
    pub kind: ErrorKind,
    /// Correlation id
    pub request_id: String,
    /// Elapsed milliseconds
    pub duration_ms: u64,
    /// Whether the client may resubmit
    pub retryable: bool,
}
