//! Stream events produced by adapters and forwarded by the relay.
//!
//! The relay is encoding-agnostic; the two wire encodings are derived here:
//! - raw chunked text for automation callers ([`StreamEvent::raw_chunk`])
//! - a server-sent-event envelope for interactive callers ([`SseEnvelope`])

use crate::response::TokenUsage;
use crate::types::RequestId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of a stream event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamEventKind {
    /// Stream opened
    Start,
    /// Incremental content
    Content,
    /// Normal termination
    Stop,
    /// Abnormal termination
    Error,
}

impl StreamEventKind {
    /// Whether this kind ends a stream
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Stop | Self::Error)
    }
}

/// A single stream event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// Event kind
    pub kind: StreamEventKind,
    /// Text payload (content text or error message)
    pub text: String,
    /// Usage, if the backend reported it at the end of the stream
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamEvent {
    /// A `start` event
    #[must_use]
    pub fn start() -> Self {
        Self {
            kind: StreamEventKind::Start,
            text: String::new(),
            usage: None,
        }
    }

    /// A `content` event
    #[must_use]
    pub fn content(text: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Content,
            text: text.into(),
            usage: None,
        }
    }

    /// A `stop` event
    #[must_use]
    pub fn stop(usage: Option<TokenUsage>) -> Self {
        Self {
            kind: StreamEventKind::Stop,
            text: String::new(),
            usage,
        }
    }

    /// An `error` event
    #[must_use]
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            kind: StreamEventKind::Error,
            text: message.into(),
            usage: None,
        }
    }

    /// Whether this event ends the stream
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.kind.is_terminal()
    }

    /// Bytes for the raw chunked encoding. Only content is written; the end of
    /// the chunked body is the implicit end-of-stream.
    #[must_use]
    pub fn raw_chunk(&self) -> Option<&str> {
        match self.kind {
            StreamEventKind::Content if !self.text.is_empty() => Some(&self.text),
            _ => None,
        }
    }

    /// Envelope for the server-sent-event encoding
    #[must_use]
    pub fn to_sse_envelope(&self, correlation_id: &RequestId) -> SseEnvelope {
        SseEnvelope {
            event_type: self.kind,
            content: self.text.clone(),
            correlation_id: correlation_id.to_string(),
            timestamp: Utc::now(),
        }
    }
}

/// Server-sent-event envelope: `{type, content, correlationId, timestamp}`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SseEnvelope {
    /// Event kind
    #[serde(rename = "type")]
    pub event_type: StreamEventKind,
    /// Text payload
    pub content: String,
    /// Correlation id of the call
    pub correlation_id: String,
    /// Time the envelope was produced
    pub timestamp: DateTime<Utc>,
}
