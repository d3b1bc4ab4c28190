//! Direct API adapter.
//!
//! Calls the upstream Messages API over HTTP.
//!
//! # API Format
//! - `POST {base_url}/v1/messages` with `x-api-key` and `anthropic-version` headers
//! - Streaming responses are server-sent events (`message_start`,
//!   `content_block_delta`, `message_delta`, `message_stop`, `error`)

use crate::{role_name, stamp};
use async_stream::try_stream;
use async_trait::async_trait;
use bridge_core::{
    BackendAdapter, BackendKind, BridgeError, CanonicalRequest, CanonicalResponse, ContentSegment,
    EventStream, StreamEvent, TokenUsage,
};
use futures_util::StreamExt;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};
use tracing::{debug, error, trace};

/// API version header value
const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Direct API configuration
#[derive(Debug, Clone)]
pub struct DirectApiConfig {
    /// Upstream credential; the adapter is unavailable without one
    pub api_key: Option<SecretString>,
    /// API base URL
    pub base_url: String,
    /// HTTP client timeout
    pub timeout: Duration,
}

impl DirectApiConfig {
    /// Create a configuration
    #[must_use]
    pub fn new(api_key: Option<SecretString>, base_url: impl Into<String>) -> Self {
        Self {
            api_key,
            base_url: base_url.into(),
            timeout: Duration::from_secs(120),
        }
    }

    /// Set the HTTP client timeout
    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Adapter for the upstream Messages API
pub struct DirectApiAdapter {
    config: DirectApiConfig,
    client: Client,
    endpoint: String,
}

impl std::fmt::Debug for DirectApiAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectApiAdapter")
            .field("endpoint", &self.endpoint)
            .field("has_credential", &self.api_key().is_some())
            .finish_non_exhaustive()
    }
}

impl DirectApiAdapter {
    /// Create a new adapter
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: DirectApiConfig) -> Result<Self, BridgeError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .pool_max_idle_per_host(16)
            .build()
            .map_err(|e| BridgeError::internal(format!("Failed to create HTTP client: {e}")))?;

        let endpoint = format!("{}/v1/messages", config.base_url.trim_end_matches('/'));

        Ok(Self {
            config,
            client,
            endpoint,
        })
    }

    fn api_key(&self) -> Option<&str> {
        self.config
            .api_key
            .as_ref()
            .map(|k| k.expose_secret().as_str())
            .filter(|k| !k.trim().is_empty())
    }

    /// Transform a canonical request to the Messages API shape
    fn transform_request<'a>(request: &'a CanonicalRequest, stream: bool) -> MessagesRequest<'a> {
        let system = request.system_texts();
        MessagesRequest {
            model: request.model(),
            max_tokens: request.max_tokens(),
            temperature: request.temperature(),
            messages: request
                .conversation()
                .map(|m| WireMessage {
                    role: role_name(m.role),
                    content: &m.content,
                })
                .collect(),
            system: (!system.is_empty()).then(|| system.join("\n\n")),
            stop_sequences: request.stop_sequences(),
            stream,
        }
    }

    async fn send(
        &self,
        request: &CanonicalRequest,
        stream: bool,
    ) -> Result<reqwest::Response, BridgeError> {
        let api_key = self.api_key().ok_or_else(|| {
            BridgeError::rejected(self.name(), "no API credential configured", None)
        })?;

        debug!(
            backend = self.name(),
            request_id = %request.id(),
            model = %request.model(),
            max_tokens = request.max_tokens(),
            stream,
            "Sending messages request"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&Self::transform_request(request, stream))
            .send()
            .await
            .map_err(|e| self.transport_error(&e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(backend = self.name(), status = status.as_u16(), "Upstream returned error");
            return Err(self.parse_error(status.as_u16(), &body));
        }
        Ok(response)
    }

    fn transport_error(&self, e: &reqwest::Error) -> BridgeError {
        if e.is_timeout() {
            BridgeError::timeout(self.config.timeout)
        } else {
            BridgeError::transient(self.name(), format!("Request failed: {e}"), None)
        }
    }

    /// Map an HTTP error status and body to a bridge error
    fn parse_error(&self, status: u16, body: &str) -> BridgeError {
        let message = serde_json::from_str::<ErrorEnvelope>(body)
            .map(|e| format!("{}: {}", e.error.error_type, e.error.message))
            .unwrap_or_else(|_| format!("HTTP {status}: {body}"));

        match status {
            401 | 403 => BridgeError::rejected(self.name(), message, Some(status)),
            408 => BridgeError::timeout(self.config.timeout),
            429 | 500..=599 => BridgeError::transient(self.name(), message, Some(status)),
            400..=499 => BridgeError::invalid_request(message, None),
            _ => BridgeError::transient(self.name(), message, Some(status)),
        }
    }
}

/// Map an in-stream `error` event to a bridge error
fn stream_error(backend: &str, error: StreamErrorBody) -> BridgeError {
    let message = format!("{}: {}", error.error_type, error.message);
    match error.error_type.as_str() {
        "authentication_error" | "permission_error" => {
            BridgeError::rejected(backend, message, None)
        }
        "invalid_request_error" | "not_found_error" => BridgeError::invalid_request(message, None),
        _ => BridgeError::transient(backend, message, None),
    }
}

#[async_trait]
impl BackendAdapter for DirectApiAdapter {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectApi
    }

    async fn is_available(&self) -> bool {
        self.api_key().is_some()
    }

    async fn execute(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, BridgeError> {
        let started = Instant::now();
        let response = self.send(request, false).await?;

        let body = response.text().await.map_err(|e| {
            BridgeError::transient(self.name(), format!("Failed to read response: {e}"), None)
        })?;
        trace!(body = %body, "Received messages response");

        let parsed: MessagesResponse = serde_json::from_str(&body).map_err(|e| {
            BridgeError::transient(self.name(), format!("Invalid response JSON: {e}"), None)
        })?;

        let segments = parsed
            .content
            .into_iter()
            .filter_map(|block| block.text)
            .map(ContentSegment::text)
            .collect();

        let response = CanonicalResponse::completed(
            self.name(),
            parsed.model.unwrap_or_else(|| request.model().to_string()),
            segments,
            parsed.usage.map(Into::into).unwrap_or_default(),
        )?;
        Ok(stamp(response, started.elapsed(), parsed.id))
    }

    async fn execute_stream(&self, request: &CanonicalRequest) -> Result<EventStream, BridgeError> {
        let response = self.send(request, true).await?;
        let backend = self.name().to_string();
        let stream = try_stream! {
            let mut byte_stream = response.bytes_stream();
            let mut buffer: Vec<u8> = Vec::new();
            let mut usage = TokenUsage::default();
            let mut finished = false;

            'events: while let Some(chunk_result) = byte_stream.next().await {
                let chunk = chunk_result.map_err(|e| {
                    BridgeError::transient(backend.clone(), format!("Stream error: {e}"), None)
                })?;
                buffer.extend_from_slice(&chunk);

                // Only complete events are decoded, so a code point split
                // across chunks stays intact
                while let Some(event) = take_event(&mut buffer) {
                    for line in event.lines() {
                        let Some(data) = line.strip_prefix("data:") else {
                            continue;
                        };
                        let Ok(event) = serde_json::from_str::<SseEvent>(data.trim_start()) else {
                            trace!(data = %data, "Skipping unparsable SSE data");
                            continue;
                        };

                        match event {
                            SseEvent::MessageStart { message } => {
                                if let Some(u) = message.usage {
                                    usage.input_tokens = u.input_tokens.unwrap_or(0);
                                }
                                yield StreamEvent::start();
                            }
                            SseEvent::ContentBlockDelta { delta } => {
                                if let Some(text) = delta.text.filter(|t| !t.is_empty()) {
                                    yield StreamEvent::content(text);
                                }
                            }
                            SseEvent::MessageDelta { usage: Some(u) } => {
                                if let Some(output) = u.output_tokens {
                                    usage.output_tokens = output;
                                }
                            }
                            SseEvent::MessageStop => {
                                finished = true;
                                yield StreamEvent::stop(Some(usage));
                                break 'events;
                            }
                            SseEvent::Error { error } => {
                                Err::<(), BridgeError>(stream_error(&backend, error))?;
                            }
                            SseEvent::MessageDelta { usage: None } | SseEvent::Other => {}
                        }
                    }
                }
            }

            if !finished {
                Err::<(), BridgeError>(BridgeError::transient(
                    backend.clone(),
                    "stream ended before message_stop",
                    None,
                ))?;
            }
        };

        Ok(Box::pin(stream))
    }
}

/// Split the next complete server-sent event off the front of `buffer`.
///
/// Events end with a blank line (`\n\n` or `\r\n\r\n`). The event text is
/// decoded only once it is complete.
fn take_event(buffer: &mut Vec<u8>) -> Option<String> {
    let lf = find(buffer, b"\n\n").map(|pos| (pos, 2));
    let crlf = find(buffer, b"\r\n\r\n").map(|pos| (pos, 4));
    let (pos, delimiter) = match (lf, crlf) {
        (Some(a), Some(b)) => a.min(b),
        (a, b) => a.or(b)?,
    };

    let raw: Vec<u8> = buffer.drain(..pos + delimiter).take(pos).collect();
    Some(String::from_utf8_lossy(&raw).replace("\r\n", "\n"))
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

// Messages API types

#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<WireMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop_sequences: Option<&'a [String]>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

#[derive(Debug, Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    content: Vec<ResponseBlock>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct ResponseBlock {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: Option<u32>,
    #[serde(default)]
    output_tokens: Option<u32>,
}

impl From<WireUsage> for TokenUsage {
    fn from(u: WireUsage) -> Self {
        Self::new(u.input_tokens.unwrap_or(0), u.output_tokens.unwrap_or(0))
    }
}

#[derive(Debug, Deserialize)]
struct ErrorEnvelope {
    error: StreamErrorBody,
}

#[derive(Debug, Deserialize)]
struct StreamErrorBody {
    #[serde(rename = "type", default)]
    error_type: String,
    #[serde(default)]
    message: String,
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
struct TextDelta {
    #[serde(default)]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SseEvent {
    MessageStart {
        message: StartMessage,
    },
    ContentBlockDelta {
        delta: TextDelta,
    },
    MessageDelta {
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Error {
        error: StreamErrorBody,
    },
    #[serde(other)]
    Other,
}
