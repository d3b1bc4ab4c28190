//! In-process SDK adapter.
//!
//! The SDK is an entry point linked into the process. Hosts install an
//! implementation of [`SdkEntry`]; without one the adapter is unavailable.

use crate::{role_name, stamp};
use async_trait::async_trait;
use bridge_core::{
    BackendAdapter, BackendKind, BridgeError, CanonicalRequest, CanonicalResponse, ContentSegment,
    EventStream, StreamEvent, TokenUsage,
};
use futures::stream;
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

/// Result of one SDK query
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SdkReply {
    /// Generated text
    pub text: String,
    /// Model that answered, if the SDK reports it
    pub model: Option<String>,
    /// Token usage
    pub usage: TokenUsage,
    /// SDK session id
    pub session_id: Option<String>,
}

/// An in-process SDK entry point
#[async_trait]
pub trait SdkEntry: Send + Sync {
    /// Name used in logs
    fn name(&self) -> &str;

    /// Whether the entry point can currently be called
    async fn is_ready(&self) -> bool;

    /// Run a query to completion
    async fn query(&self, request: &CanonicalRequest) -> Result<SdkReply, BridgeError>;

    /// Run a query and return incremental output.
    ///
    /// The default runs [`SdkEntry::query`] and emits its text as a single chunk.
    async fn query_stream(&self, request: &CanonicalRequest) -> Result<EventStream, BridgeError> {
        let reply = self.query(request).await?;
        let events = vec![
            Ok(StreamEvent::start()),
            Ok(StreamEvent::content(reply.text)),
            Ok(StreamEvent::stop(Some(reply.usage))),
        ];
        Ok(Box::pin(stream::iter(events)))
    }
}

/// Adapter over an optional in-process SDK entry point
#[derive(Clone, Default)]
pub struct SdkAdapter {
    entry: Option<Arc<dyn SdkEntry>>,
}

impl std::fmt::Debug for SdkAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SdkAdapter")
            .field("entry", &self.entry.as_ref().map(|e| e.name().to_string()))
            .finish()
    }
}

impl SdkAdapter {
    /// Create an adapter around an entry point, if one is installed
    #[must_use]
    pub fn new(entry: Option<Arc<dyn SdkEntry>>) -> Self {
        Self { entry }
    }

    fn entry(&self) -> Result<&Arc<dyn SdkEntry>, BridgeError> {
        self.entry.as_ref().ok_or(BridgeError::NoBackendAvailable)
    }

    /// Flatten a request for SDK entries that take a single prompt
    #[must_use]
    pub fn prompt_text(request: &CanonicalRequest) -> String {
        request
            .conversation()
            .map(|m| format!("{}: {}", role_name(m.role), m.content))
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

#[async_trait]
impl BackendAdapter for SdkAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::InProcessSdk
    }

    async fn is_available(&self) -> bool {
        match &self.entry {
            Some(entry) => entry.is_ready().await,
            None => false,
        }
    }

    async fn execute(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, BridgeError> {
        let entry = self.entry()?;
        let started = Instant::now();

        debug!(
            backend = self.name(),
            entry = entry.name(),
            request_id = %request.id(),
            "Calling SDK entry point"
        );

        let reply = entry.query(request).await?;
        let response = CanonicalResponse::completed(
            self.name(),
            reply.model.unwrap_or_else(|| request.model().to_string()),
            vec![ContentSegment::text(reply.text)],
            reply.usage,
        )?;
        Ok(stamp(response, started.elapsed(), reply.session_id))
    }

    async fn execute_stream(&self, request: &CanonicalRequest) -> Result<EventStream, BridgeError> {
        self.entry()?.query_stream(request).await
    }
}
