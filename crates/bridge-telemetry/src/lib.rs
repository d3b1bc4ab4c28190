//! # Bridge Telemetry
//!
//! Observability for the LLM bridge.
//!
//! This crate provides:
//! - The metrics sink (consistent snapshots plus Prometheus text exposition)
//! - Structured logging setup
//! - Span helpers for bridge calls

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod logging;
pub mod metrics;

pub use logging::{init_logging, LoggingConfig};
pub use metrics::{MetricsSink, MetricsSnapshot};

/// Telemetry setup error
#[derive(Debug, thiserror::Error)]
pub enum TelemetryError {
    /// Failed to install the subscriber
    #[error("Failed to initialize logging: {0}")]
    Init(String),
    /// Failed to register or encode metrics
    #[error("Metrics error: {0}")]
    Metrics(#[from] prometheus::Error),
    /// Encoded metrics were not valid UTF-8
    #[error("Metrics encoding error: {0}")]
    Encoding(String),
}

/// Create a span for one bridge call
#[macro_export]
macro_rules! bridge_call_span {
    ($request_id:expr, $backend:expr, $dialect:expr) => {
        tracing::info_span!(
            "bridge_call",
            request_id = %$request_id,
            backend = %$backend,
            dialect = %$dialect
        )
    };
}
