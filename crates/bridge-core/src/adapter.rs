//! Backend adapter capability trait.
//!
//! Each adapter wraps exactly one way of invoking the upstream model. The
//! selector checks adapters through [`BackendAdapter::is_available`] and the
//! bridge drives the pinned one through `execute` / `execute_stream`.

use crate::error::BridgeError;
use crate::request::CanonicalRequest;
use crate::response::CanonicalResponse;
use crate::streaming::StreamEvent;
use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stream of events produced by an adapter.
///
/// An `Err` item means the stream failed mid-flight; the relay turns it into a
/// terminal `error` event.
pub type EventStream = BoxStream<'static, Result<StreamEvent, BridgeError>>;

/// Execution method for the upstream model
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    /// Direct network API call
    DirectApi,
    /// In-process SDK invocation
    InProcessSdk,
    /// External command-line process
    ExternalProcess,
    /// No backend selected
    None,
}

impl BackendKind {
    /// Stable name used in logs, metadata and status output
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DirectApi => "direct-api",
            Self::InProcessSdk => "in-process-sdk",
            Self::ExternalProcess => "external-process",
            Self::None => "none",
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Uniform contract over the execution backends
#[async_trait]
pub trait BackendAdapter: Send + Sync {
    /// Which execution method this adapter wraps
    fn kind(&self) -> BackendKind;

    /// Name used in logs and response metadata
    fn name(&self) -> &str {
        self.kind().as_str()
    }

    /// Whether the backend can currently be used
    async fn is_available(&self) -> bool;

    /// Execute a request and return the complete response
    async fn execute(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, BridgeError>;

    /// Execute a request and return its incremental output
    async fn execute_stream(&self, request: &CanonicalRequest) -> Result<EventStream, BridgeError>;
}
