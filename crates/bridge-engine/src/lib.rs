//! # Bridge Engine
//!
//! The request path of the LLM bridge.
//!
//! - [`Bridge`]: normalize, consult the cache, call the pinned backend under
//!   retry and timeout, store, record metrics
//! - [`relay`]: forward a backend stream over a bounded channel with exactly
//!   one terminal event

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bridge;
pub mod relay;

pub use bridge::{Bridge, BridgeBuilder, BridgeReply, BridgeStatus};
pub use relay::{relay, relay_events, RelayOptions, RelaySummary, StreamHandle, RELAY_CAPACITY};
