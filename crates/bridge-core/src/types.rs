//! Domain newtypes shared across the bridge.
//!
//! Numeric request parameters are clamped rather than rejected, so the
//! constructors here never fail.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Default upstream ceiling for output tokens
pub const DEFAULT_TOKEN_CEILING: u32 = 8192;

/// Correlation id attached to every inbound call
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(String);

impl RequestId {
    /// Generate a fresh random id
    #[must_use]
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Borrow the id as a string slice
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for RequestId {
    fn default() -> Self {
        Self::generate()
    }
}

impl From<&str> for RequestId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for RequestId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// System message
    System,
    /// User message
    User,
    /// Assistant message
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::System => write!(f, "system"),
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
        }
    }
}

/// A role-tagged message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Message {
    /// Role of the author
    pub role: Role,
    /// Text content
    pub content: String,
}

impl Message {
    /// Create a system message
    #[must_use]
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// Create a user message
    #[must_use]
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    /// Create an assistant message
    #[must_use]
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Output token budget, always within `1..=ceiling`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MaxTokens(u32);

impl MaxTokens {
    /// Clamp a raw token budget into `1..=ceiling`
    #[must_use]
    pub fn clamped(raw: u32, ceiling: u32) -> Self {
        Self(raw.clamp(1, ceiling.max(1)))
    }

    /// Clamp a loosely typed budget (negative, fractional or huge) into `1..=ceiling`
    #[must_use]
    pub fn from_f64(raw: f64, ceiling: u32) -> Self {
        let ceiling = ceiling.max(1);
        if raw.is_nan() || raw < 1.0 {
            return Self(1);
        }
        if raw >= f64::from(ceiling) {
            return Self(ceiling);
        }
        Self(raw as u32)
    }

    /// Raw value
    #[must_use]
    pub fn get(self) -> u32 {
        self.0
    }
}

/// Sampling temperature, always within `[0, 1]`
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Temperature(f32);

impl Temperature {
    /// Clamp a raw temperature into `[0, 1]`; NaN becomes 0
    #[must_use]
    pub fn clamped(raw: f64) -> Self {
        if raw.is_nan() {
            return Self(0.0);
        }
        Self(raw.clamp(0.0, 1.0) as f32)
    }

    /// Raw value
    #[must_use]
    pub fn get(self) -> f32 {
        self.0
    }

    /// Bit pattern used for exact equality in fingerprints
    #[must_use]
    pub fn to_bits(self) -> u32 {
        self.0.to_bits()
    }
}

/// Which non-streaming calls may be served from and stored in the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never cache
    Disabled,
    /// Cache every non-streaming call that is not marked mutating
    #[default]
    NonMutating,
    /// Cache every non-streaming call
    Always,
}

impl CachePolicy {
    /// Whether a call with these properties may touch the cache
    #[must_use]
    pub fn allows(self, stream: bool, mutating: bool) -> bool {
        if stream {
            return false;
        }
        match self {
            Self::Disabled => false,
            Self::NonMutating => !mutating,
            Self::Always => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_tokens_clamp() {
        assert_eq!(MaxTokens::clamped(999_999, 8192).get(), 8192);
        assert_eq!(MaxTokens::clamped(0, 8192).get(), 1);
        assert_eq!(MaxTokens::clamped(50, 8192).get(), 50);
        assert_eq!(MaxTokens::from_f64(-5.0, 8192).get(), 1);
        assert_eq!(MaxTokens::from_f64(1e12, 8192).get(), 8192);
        assert_eq!(MaxTokens::from_f64(100.7, 8192).get(), 100);
    }

    #[test]
    fn test_temperature_clamp() {
        assert!((Temperature::clamped(1.7).get() - 1.0).abs() < f32::EPSILON);
        assert!(Temperature::clamped(-0.3).get().abs() < f32::EPSILON);
        assert!((Temperature::clamped(0.25).get() - 0.25).abs() < f32::EPSILON);
        assert!(Temperature::clamped(f64::NAN).get().abs() < f32::EPSILON);
    }

    #[test]
    fn test_cache_policy() {
        assert!(CachePolicy::NonMutating.allows(false, false));
        assert!(!CachePolicy::NonMutating.allows(false, true));
        assert!(!CachePolicy::NonMutating.allows(true, false));
        assert!(CachePolicy::Always.allows(false, true));
        assert!(!CachePolicy::Always.allows(true, false));
        assert!(!CachePolicy::Disabled.allows(false, false));
    }

    #[test]
    fn test_role_serialization() {
        let json = serde_json::to_string(&Message::user("hi")).expect("serialize");
        assert_eq!(json, r#"{"role":"user","content":"hi"}"#);
    }
}
