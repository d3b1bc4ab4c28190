//! Canonical request type.
//!
//! A [`CanonicalRequest`] is built once per inbound call and is immutable
//! afterwards: its fields are private and only exposed through accessors.

use crate::error::BridgeError;
use crate::types::{MaxTokens, Message, RequestId, Role, Temperature, DEFAULT_TOKEN_CEILING};
use serde::Serialize;

/// Dialect-independent request handed to backend adapters
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CanonicalRequest {
    id: RequestId,
    model: String,
    max_tokens: MaxTokens,
    temperature: Temperature,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<Vec<String>>,
}

impl CanonicalRequest {
    /// Create a new builder
    #[must_use]
    pub fn builder() -> CanonicalRequestBuilder {
        CanonicalRequestBuilder::default()
    }

    /// Correlation id
    #[must_use]
    pub fn id(&self) -> &RequestId {
        &self.id
    }

    /// Target model
    #[must_use]
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Clamped output token budget
    #[must_use]
    pub fn max_tokens(&self) -> u32 {
        self.max_tokens.get()
    }

    /// Clamped temperature
    #[must_use]
    pub fn temperature(&self) -> f32 {
        self.temperature.get()
    }

    /// Temperature as a newtype
    #[must_use]
    pub fn temperature_value(&self) -> Temperature {
        self.temperature
    }

    /// Ordered messages
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Optional system preamble
    #[must_use]
    pub fn system(&self) -> Option<&str> {
        self.system.as_deref()
    }

    /// Optional stop sequences
    #[must_use]
    pub fn stop_sequences(&self) -> Option<&[String]> {
        self.stop_sequences.as_deref()
    }

    /// Every system text that applies to this request: the preamble followed by
    /// system-role messages, with exact duplicates removed.
    #[must_use]
    pub fn system_texts(&self) -> Vec<&str> {
        let mut texts: Vec<&str> = Vec::new();
        let from_messages = self
            .messages
            .iter()
            .filter(|m| m.role == Role::System)
            .map(|m| m.content.as_str());

        for text in self.system.as_deref().into_iter().chain(from_messages) {
            if !text.is_empty() && !texts.contains(&text) {
                texts.push(text);
            }
        }
        texts
    }

    /// Messages with system-role entries removed
    pub fn conversation(&self) -> impl Iterator<Item = &Message> {
        self.messages.iter().filter(|m| m.role != Role::System)
    }
}

/// Builder for `CanonicalRequest`
#[derive(Debug)]
pub struct CanonicalRequestBuilder {
    id: Option<RequestId>,
    model: Option<String>,
    max_tokens: Option<u32>,
    temperature: Option<f64>,
    messages: Vec<Message>,
    system: Option<String>,
    stop_sequences: Option<Vec<String>>,
    token_ceiling: u32,
    default_max_tokens: u32,
    default_temperature: f64,
}

impl Default for CanonicalRequestBuilder {
    fn default() -> Self {
        Self {
            id: None,
            model: None,
            max_tokens: None,
            temperature: None,
            messages: Vec::new(),
            system: None,
            stop_sequences: None,
            token_ceiling: DEFAULT_TOKEN_CEILING,
            default_max_tokens: 4096,
            default_temperature: 0.7,
        }
    }
}

impl CanonicalRequestBuilder {
    /// Set the correlation id
    #[must_use]
    pub fn id(mut self, id: RequestId) -> Self {
        self.id = Some(id);
        self
    }

    /// Set the model
    #[must_use]
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    /// Set the raw token budget (clamped on build)
    #[must_use]
    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    /// Set the raw temperature (clamped on build)
    #[must_use]
    pub fn temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    /// Replace the messages
    #[must_use]
    pub fn messages(mut self, messages: Vec<Message>) -> Self {
        self.messages = messages;
        self
    }

    /// Append a message
    #[must_use]
    pub fn message(mut self, message: Message) -> Self {
        self.messages.push(message);
        self
    }

    /// Set the system preamble
    #[must_use]
    pub fn system(mut self, system: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self
    }

    /// Set stop sequences
    #[must_use]
    pub fn stop_sequences(mut self, stop: Vec<String>) -> Self {
        self.stop_sequences = Some(stop);
        self
    }

    /// Upstream ceiling for output tokens
    #[must_use]
    pub fn token_ceiling(mut self, ceiling: u32) -> Self {
        self.token_ceiling = ceiling;
        self
    }

    /// Budget used when none is given
    #[must_use]
    pub fn default_max_tokens(mut self, max_tokens: u32) -> Self {
        self.default_max_tokens = max_tokens;
        self
    }

    /// Temperature used when none is given
    #[must_use]
    pub fn default_temperature(mut self, temperature: f64) -> Self {
        self.default_temperature = temperature;
        self
    }

    /// Build the request
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the model is missing or there are no messages
    pub fn build(self) -> Result<CanonicalRequest, BridgeError> {
        let model = self
            .model
            .filter(|m| !m.trim().is_empty())
            .ok_or_else(|| BridgeError::invalid_request("model is required", Some("model")))?;

        if self.messages.is_empty() {
            return Err(BridgeError::invalid_request(
                "messages cannot be empty",
                Some("messages"),
            ));
        }

        let max_tokens = MaxTokens::clamped(
            self.max_tokens.unwrap_or(self.default_max_tokens),
            self.token_ceiling,
        );
        let temperature =
            Temperature::clamped(self.temperature.unwrap_or(self.default_temperature));

        Ok(CanonicalRequest {
            id: self.id.unwrap_or_else(RequestId::generate),
            model,
            max_tokens,
            temperature,
            messages: self.messages,
            system: self.system.filter(|s| !s.is_empty()),
            stop_sequences: self.stop_sequences.filter(|s| !s.is_empty()),
        })
    }
}
