//! Resilience patterns for the LLM bridge.
//!
//! This crate provides:
//! - Retry controller with exponential backoff and error classification
//! - Fingerprint-keyed response cache with a fixed TTL
//! - Timeout guard for single adapter attempts

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod cache;
pub mod retry;
pub mod timeout;

pub use cache::{CacheConfig, CacheStats, ResponseCache};
pub use retry::{
    ErrorClass, RetryConfig, RetryError, RetryOutcome, RetryPolicy, RetryPolicyBuilder,
};
pub use timeout::with_timeout;
