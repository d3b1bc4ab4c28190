//! # Bridge Core
//!
//! Core types, traits, and error handling for the LLM request bridge.
//!
//! This crate provides the foundational types used throughout the bridge:
//! - Canonical request and response values
//! - The backend adapter capability trait
//! - Stream events and their wire envelopes
//! - Error taxonomy shared by every crate
//! - Request normalization for both client dialects

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod dialect;
pub mod error;
pub mod request;
pub mod response;
pub mod streaming;
pub mod types;

// Re-export commonly used types
pub use adapter::{BackendAdapter, BackendKind, EventStream};
pub use dialect::{
    AutomationPayload, AutomationResponse, CallOptions, Dialect, GenericPayload, NormalizedCall,
    Normalizer, NormalizerConfig, render_response,
};
pub use error::{BridgeError, BridgeFailure, BridgeResult, ErrorBody, ErrorKind};
pub use request::{CanonicalRequest, CanonicalRequestBuilder};
pub use response::{CanonicalResponse, ContentSegment, SegmentKind, TokenUsage};
pub use streaming::{SseEnvelope, StreamEvent, StreamEventKind};
pub use types::{
    CachePolicy, MaxTokens, Message, RequestId, Role, Temperature, DEFAULT_TOKEN_CEILING,
};
