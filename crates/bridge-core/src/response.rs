//! Canonical response type.

use crate::error::BridgeError;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Token usage reported by a backend
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    /// Tokens consumed by the prompt
    pub input_tokens: u32,
    /// Tokens produced by the model
    pub output_tokens: u32,
}

impl TokenUsage {
    /// Create a usage record
    #[must_use]
    pub fn new(input_tokens: u32, output_tokens: u32) -> Self {
        Self {
            input_tokens,
            output_tokens,
        }
    }

    /// Sum of input and output tokens
    #[must_use]
    pub fn total(&self) -> u64 {
        u64::from(self.input_tokens) + u64::from(self.output_tokens)
    }
}

/// Kind of a content segment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SegmentKind {
    /// Plain text
    Text,
}

/// One piece of response content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentSegment {
    /// Segment kind
    #[serde(rename = "type")]
    pub kind: SegmentKind,
    /// Segment text
    pub text: String,
}

impl ContentSegment {
    /// Create a text segment
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            kind: SegmentKind::Text,
            text: text.into(),
        }
    }
}

/// Dialect-independent response produced by an adapter or served from cache.
///
/// A response always has exactly one of `success` / `error` set, and a
/// successful response always carries at least one non-empty segment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "ResponseWire")]
pub struct CanonicalResponse {
    content: Vec<ContentSegment>,
    model: String,
    usage: TokenUsage,
    success: bool,
    error: bool,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

/// Unchecked wire form; every decoded response passes through `TryFrom`
#[derive(Deserialize)]
struct ResponseWire {
    content: Vec<ContentSegment>,
    model: String,
    usage: TokenUsage,
    success: bool,
    error: bool,
    #[serde(default)]
    metadata: BTreeMap<String, serde_json::Value>,
}

impl TryFrom<ResponseWire> for CanonicalResponse {
    type Error = String;

    fn try_from(wire: ResponseWire) -> Result<Self, Self::Error> {
        if wire.success == wire.error {
            return Err("exactly one of `success` and `error` must be set".to_string());
        }
        if wire.success && !wire.content.iter().any(|s| !s.text.is_empty()) {
            return Err("a successful response needs non-empty content".to_string());
        }
        Ok(Self {
            content: wire.content,
            model: wire.model,
            usage: wire.usage,
            success: wire.success,
            error: wire.error,
            metadata: wire.metadata,
        })
    }
}

impl CanonicalResponse {
    /// Build a successful response.
    ///
    /// # Errors
    /// Returns a retryable `TransientUpstream` error if the backend produced no text
    pub fn completed(
        backend: &str,
        model: impl Into<String>,
        content: Vec<ContentSegment>,
        usage: TokenUsage,
    ) -> Result<Self, BridgeError> {
        let content: Vec<ContentSegment> =
            content.into_iter().filter(|s| !s.text.is_empty()).collect();

        if content.is_empty() {
            return Err(BridgeError::transient(
                backend,
                "upstream returned no content",
                None,
            ));
        }

        let mut metadata = BTreeMap::new();
        metadata.insert("backend".to_string(), serde_json::json!(backend));

        Ok(Self {
            content,
            model: model.into(),
            usage,
            success: true,
            error: false,
            metadata,
        })
    }

    /// Attach a metadata entry
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Content segments
    #[must_use]
    pub fn content(&self) -> &[ContentSegment] {
        &self.content
    }

    /// All segment text concatenated
    #[must_use]
    pub fn text(&self) -> String {
        self.content.iter().map(|s| s.text.as_str()).collect()
    }

    /// Resolved model name
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Token usage
    #[must_use]
    pub fn usage(&self) -> TokenUsage {
        self.usage
    }

    /// Success flag
    #[must_use]
    pub fn is_success(&self) -> bool {
        self.success
    }

    /// Error flag
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error
    }

    /// Free-form metadata
    #[must_use]
    pub fn metadata(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.metadata
    }

    /// Backend that produced the response
    #[must_use]
    pub fn backend(&self) -> Option<&str> {
        self.metadata.get("backend").and_then(|v| v.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completed_response() {
        let response = CanonicalResponse::completed(
            "direct-api",
            "m1",
            vec![ContentSegment::text("hel"), ContentSegment::text("lo")],
            TokenUsage::new(3, 2),
        )
        .expect("non-empty");

        assert!(response.is_success());
        assert!(!response.is_error());
        assert_eq!(response.text(), "hello");
        assert_eq!(response.backend(), Some("direct-api"));
        assert_eq!(response.usage().total(), 5);
    }

    #[test]
    fn test_empty_content_is_transient_error() {
        let result = CanonicalResponse::completed(
            "direct-api",
            "m1",
            vec![ContentSegment::text("")],
            TokenUsage::default(),
        );
        assert!(matches!(result, Err(BridgeError::TransientUpstream { .. })));
    }

    #[test]
    fn test_response_serialization() {
        let response = CanonicalResponse::completed(
            "sdk",
            "m1",
            vec![ContentSegment::text("hello")],
            TokenUsage::new(1, 1),
        )
        .expect("non-empty")
        .with_metadata("session_id", serde_json::json!("abc"));

        let json = serde_json::to_value(&response).expect("serialize");
        assert_eq!(json["content"][0]["type"], "text");
        assert_eq!(json["content"][0]["text"], "hello");
        assert_eq!(json["usage"]["input_tokens"], 1);
        assert_eq!(json["success"], true);
        assert_eq!(json["metadata"]["session_id"], "abc");

        let back: CanonicalResponse = serde_json::from_value(json).expect("deserialize");
        assert_eq!(back, response);
    }

    #[test]
    fn test_inconsistent_flags_rejected() {
        let base = serde_json::json!({
            "content": [{"type": "text", "text": "hi"}],
            "model": "m1",
            "usage": {"input_tokens": 1, "output_tokens": 1},
        });

        let mut neither = base.clone();
        neither["success"] = false.into();
        neither["error"] = false.into();
        assert!(serde_json::from_value::<CanonicalResponse>(neither).is_err());

        let mut both = base.clone();
        both["success"] = true.into();
        both["error"] = true.into();
        assert!(serde_json::from_value::<CanonicalResponse>(both).is_err());

        let mut empty = base;
        empty["success"] = true.into();
        empty["error"] = false.into();
        empty["content"] = serde_json::json!([{"type": "text", "text": ""}]);
        assert!(serde_json::from_value::<CanonicalResponse>(empty).is_err());
    }
}
