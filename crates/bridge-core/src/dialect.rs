//! Client dialects and request normalization.
//!
//! Two dialects reach the bridge:
//! - `generic`: a message-completion API with role-tagged messages
//! - `ci-automation`: an instruction-oriented automation payload
//!
//! Both are normalized into one [`CanonicalRequest`]. Numeric fields are
//! clamped, never rejected.

use crate::error::BridgeError;
use crate::request::CanonicalRequest;
use crate::response::{CanonicalResponse, TokenUsage};
use crate::types::{MaxTokens, Message, RequestId, Role, DEFAULT_TOKEN_CEILING};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

/// Automation actions that only read; every other action is treated as mutating
const READ_ONLY_ACTIONS: &[&str] = &["query", "ask", "analyze", "review", "explain", "summarize"];

/// Client dialect tag handed over by the HTTP layer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Dialect {
    /// Generic message-completion API
    Generic,
    /// CI-automation dialect
    CiAutomation,
}

impl Dialect {
    /// Wire name of the dialect
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Generic => "generic",
            Self::CiAutomation => "ci-automation",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Dialect {
    type Err = BridgeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "generic" => Ok(Self::Generic),
            "ci-automation" => Ok(Self::CiAutomation),
            other => Err(BridgeError::invalid_request(
                format!("unknown dialect: {other}"),
                Some("dialect"),
            )),
        }
    }
}

/// Per-call options that are not part of the canonical request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CallOptions {
    /// Stream the output incrementally
    pub stream: bool,
    /// The call has side effects and must not be cached
    pub mutating: bool,
    /// Caller-supplied timeout for each adapter attempt
    pub timeout: Option<Duration>,
}

/// Normalizer output: the canonical request plus its call options
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedCall {
    /// Canonical request
    pub request: CanonicalRequest,
    /// Call options
    pub options: CallOptions,
    /// Dialect the call arrived in
    pub dialect: Dialect,
}

/// Message content as sent by generic-dialect clients: a string or text blocks
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

#[derive(Debug, Clone, Deserialize)]
struct WireBlock {
    #[serde(default)]
    text: Option<String>,
}

impl WireContent {
    fn into_text(self) -> String {
        match self {
            Self::Text(text) => text,
            Self::Blocks(blocks) => blocks
                .into_iter()
                .filter_map(|b| b.text)
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct WireMessage {
    role: Role,
    content: WireContent,
}

/// Generic-dialect payload
#[derive(Debug, Clone, Deserialize)]
pub struct GenericPayload {
    /// Target model
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    messages: Vec<WireMessage>,
    /// Raw token budget
    #[serde(default)]
    pub max_tokens: Option<f64>,
    /// Raw temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// System preamble
    #[serde(default)]
    pub system: Option<String>,
    /// Stop sequences
    #[serde(default)]
    pub stop_sequences: Option<Vec<String>>,
    /// Stream the response
    #[serde(default)]
    pub stream: bool,
    /// Explicit side-effect marker
    #[serde(default)]
    pub mutating: bool,
    /// Per-attempt timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

/// CI-automation payload
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AutomationPayload {
    /// Requested action; defaults to `query`
    #[serde(default)]
    pub action: Option<String>,
    /// Primary instruction
    #[serde(default)]
    pub direct_prompt: Option<String>,
    /// Prompt-equivalent fallback for the instruction
    #[serde(default)]
    pub prompt: Option<String>,
    /// System preamble
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Additional context placed before the instruction
    #[serde(default)]
    pub context: Option<String>,
    /// Target model
    #[serde(default)]
    pub model: Option<String>,
    /// Raw token budget
    #[serde(default)]
    pub max_tokens: Option<f64>,
    /// Raw temperature
    #[serde(default)]
    pub temperature: Option<f64>,
    /// Stream raw chunks
    #[serde(default)]
    pub stream: bool,
    /// Per-attempt timeout in milliseconds
    #[serde(default)]
    pub timeout_ms: Option<u64>,
}

impl AutomationPayload {
    /// Whether the action may have side effects
    #[must_use]
    pub fn is_mutating(&self) -> bool {
        match self.action.as_deref().map(str::trim) {
            None | Some("") => false,
            Some(action) => !READ_ONLY_ACTIONS
                .iter()
                .any(|a| a.eq_ignore_ascii_case(action)),
        }
    }
}

/// Defaults and limits applied during normalization
#[derive(Debug, Clone, PartialEq)]
pub struct NormalizerConfig {
    /// Model used when the payload names none
    pub default_model: String,
    /// Token budget used when the payload gives none
    pub default_max_tokens: u32,
    /// Upstream ceiling for output tokens
    pub token_ceiling: u32,
    /// Temperature used when the payload gives none
    pub default_temperature: f64,
}

impl Default for NormalizerConfig {
    fn default() -> Self {
        Self {
            default_model: "claude-3-5-sonnet-latest".to_string(),
            default_max_tokens: 4096,
            token_ceiling: DEFAULT_TOKEN_CEILING,
            default_temperature: 0.7,
        }
    }
}

/// Converts client payloads into canonical requests
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    config: NormalizerConfig,
}

impl Normalizer {
    /// Create a normalizer
    #[must_use]
    pub fn new(config: NormalizerConfig) -> Self {
        Self { config }
    }

    /// Normalizer limits
    #[must_use]
    pub fn config(&self) -> &NormalizerConfig {
        &self.config
    }

    /// Normalize a parsed payload in the given dialect
    ///
    /// # Errors
    /// Returns `InvalidRequest` if the payload does not match the dialect or
    /// lacks required content
    pub fn normalize(
        &self,
        payload: serde_json::Value,
        dialect: Dialect,
        id: RequestId,
    ) -> Result<NormalizedCall, BridgeError> {
        match dialect {
            Dialect::Generic => {
                let payload: GenericPayload = serde_json::from_value(payload).map_err(|e| {
                    BridgeError::invalid_request(format!("malformed generic payload: {e}"), None)
                })?;
                self.normalize_generic(payload, id)
            }
            Dialect::CiAutomation => {
                let payload: AutomationPayload = serde_json::from_value(payload).map_err(|e| {
                    BridgeError::invalid_request(
                        format!("malformed automation payload: {e}"),
                        None,
                    )
                })?;
                self.normalize_automation(payload, id)
            }
        }
    }

    /// Normalize a generic-dialect payload; messages are taken verbatim
    ///
    /// # Errors
    /// Returns `InvalidRequest` if there are no messages
    pub fn normalize_generic(
        &self,
        payload: GenericPayload,
        id: RequestId,
    ) -> Result<NormalizedCall, BridgeError> {
        let messages: Vec<Message> = payload
            .messages
            .into_iter()
            .map(|m| Message {
                role: m.role,
                content: m.content.into_text(),
            })
            .collect();

        let mut builder = self
            .builder(id, payload.model, payload.max_tokens, payload.temperature)
            .messages(messages);
        if let Some(system) = payload.system {
            builder = builder.system(system);
        }
        if let Some(stop) = payload.stop_sequences {
            builder = builder.stop_sequences(stop);
        }

        Ok(NormalizedCall {
            request: builder.build()?,
            options: CallOptions {
                stream: payload.stream,
                mutating: payload.mutating,
                timeout: payload.timeout_ms.map(Duration::from_millis),
            },
            dialect: Dialect::Generic,
        })
    }

    /// Normalize a CI-automation payload.
    ///
    /// Messages are synthesized in fixed order: system preamble, context, instruction.
    ///
    /// # Errors
    /// Returns `InvalidRequest` if neither `direct_prompt` nor `prompt` is present
    pub fn normalize_automation(
        &self,
        payload: AutomationPayload,
        id: RequestId,
    ) -> Result<NormalizedCall, BridgeError> {
        let mutating = payload.is_mutating();
        let instruction = non_blank(payload.direct_prompt)
            .or_else(|| non_blank(payload.prompt))
            .ok_or_else(|| {
                BridgeError::invalid_request(
                    "one of direct_prompt or prompt is required",
                    Some("direct_prompt"),
                )
            })?;
        let system = non_blank(payload.system_prompt);

        let mut messages = Vec::with_capacity(3);
        if let Some(ref system) = system {
            messages.push(Message::system(system.clone()));
        }
        if let Some(context) = non_blank(payload.context) {
            messages.push(Message::user(format!("Context:\n{context}")));
        }
        messages.push(Message::user(instruction));

        let mut builder = self
            .builder(id, payload.model, payload.max_tokens, payload.temperature)
            .messages(messages);
        if let Some(system) = system {
            builder = builder.system(system);
        }

        Ok(NormalizedCall {
            request: builder.build()?,
            options: CallOptions {
                stream: payload.stream,
                mutating,
                timeout: payload.timeout_ms.map(Duration::from_millis),
            },
            dialect: Dialect::CiAutomation,
        })
    }

    fn builder(
        &self,
        id: RequestId,
        model: Option<String>,
        max_tokens: Option<f64>,
        temperature: Option<f64>,
    ) -> crate::request::CanonicalRequestBuilder {
        let ceiling = self.config.token_ceiling;
        let mut builder = CanonicalRequest::builder()
            .id(id)
            .model(non_blank(model).unwrap_or_else(|| self.config.default_model.clone()))
            .token_ceiling(ceiling)
            .default_max_tokens(self.config.default_max_tokens)
            .default_temperature(self.config.default_temperature);

        if let Some(raw) = max_tokens {
            builder = builder.max_tokens(MaxTokens::from_f64(raw, ceiling).get());
        }
        if let Some(raw) = temperature {
            builder = builder.temperature(raw);
        }
        builder
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Non-streaming response shape for the CI-automation dialect:
/// `{action:"response", success, response, usage, model, metadata}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AutomationResponse {
    /// Always `"response"`
    pub action: String,
    /// Success flag
    pub success: bool,
    /// Concatenated response text
    pub response: String,
    /// Token usage
    pub usage: TokenUsage,
    /// Resolved model
    pub model: String,
    /// Response metadata
    pub metadata: BTreeMap<String, serde_json::Value>,
}

impl From<&CanonicalResponse> for AutomationResponse {
    fn from(response: &CanonicalResponse) -> Self {
        Self {
            action: "response".to_string(),
            success: response.is_success(),
            response: response.text(),
            usage: response.usage(),
            model: response.model().to_string(),
            metadata: response.metadata().clone(),
        }
    }
}

/// Render a response in the shape expected by the given dialect
///
/// # Errors
/// Returns `Internal` if serialization fails
pub fn render_response(
    dialect: Dialect,
    response: &CanonicalResponse,
) -> Result<serde_json::Value, BridgeError> {
    let rendered = match dialect {
        Dialect::Generic => serde_json::to_value(response),
        Dialect::CiAutomation => serde_json::to_value(AutomationResponse::from(response)),
    };
    rendered.map_err(|e| BridgeError::internal(format!("failed to render response: {e}")))
}
