//! Retry policy with exponential backoff.
//!
//! One logical call is retried while its failures classify as retryable and
//! attempts remain. All retry state lives on the stack of the calling task.

use bridge_core::{BridgeError, RequestId};
use rand::Rng;
use std::future::Future;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};

/// Message fragments that mark an otherwise unclassified error as retryable
const RETRYABLE_HINTS: &[&str] = &[
    "rate limit",
    "rate_limit",
    "overloaded",
    "timed out",
    "timeout",
];

/// Retry configuration
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Attempts per logical call, including the first
    pub max_attempts: u32,
    /// Delay after the first failed attempt
    pub base_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Backoff multiplier
    pub multiplier: f64,
    /// Jitter factor (0.0 - 1.0)
    pub jitter: f64,
    /// Upstream status codes that are retryable regardless of error kind
    pub retry_on_status: Vec<u16>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 2.0,
            jitter: 0.0,
            retry_on_status: vec![408, 429, 500, 502, 503, 504],
        }
    }
}

/// Failure classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth another attempt
    Retryable,
    /// Propagate immediately
    Fatal,
}

/// Bookkeeping attached to a successful call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryOutcome {
    /// Attempts made, including the successful one
    pub attempts: u32,
    /// Sum of backoff sleeps
    pub total_delay: Duration,
}

/// A call that failed after classification or exhaustion
#[derive(Debug, Clone, Error)]
#[error("{error} (after {attempts} attempt(s))")]
pub struct RetryError {
    /// Last error seen
    pub error: BridgeError,
    /// Attempts made
    pub attempts: u32,
    /// Whether the caller may resubmit
    pub retryable: bool,
    /// Sum of backoff sleeps
    pub total_delay: Duration,
}

/// Retry policy implementation
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    config: RetryConfig,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl RetryPolicy {
    /// Create a new retry policy with the given configuration
    #[must_use]
    pub fn new(config: RetryConfig) -> Self {
        Self { config }
    }

    /// Create with default configuration
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(RetryConfig::default())
    }

    /// Create a policy with a custom attempt budget
    #[must_use]
    pub fn with_max_attempts(max_attempts: u32) -> Self {
        Self::new(RetryConfig {
            max_attempts,
            ..Default::default()
        })
    }

    /// Get a builder
    #[must_use]
    pub fn builder() -> RetryPolicyBuilder {
        RetryPolicyBuilder::new()
    }

    /// Delay after failed attempt `attempt` (1-indexed):
    /// `min(base_delay * multiplier^(attempt-1), max_delay)`, then jittered
    #[must_use]
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let max = self.config.max_delay.as_nanos() as f64;
        let delay =
            self.config.base_delay.as_nanos() as f64 * self.config.multiplier.powi(exponent);
        let delay = if delay.is_finite() { delay.clamp(0.0, max) } else { max };

        if self.config.jitter <= 0.0 {
            return Duration::from_nanos(delay.round() as u64);
        }

        let jitter_range = delay * self.config.jitter;
        let jitter = rand::thread_rng().gen_range(-jitter_range..=jitter_range);
        Duration::from_nanos((delay + jitter).clamp(0.0, max).round() as u64)
    }

    /// Classify an error
    #[must_use]
    pub fn classify(&self, error: &BridgeError) -> ErrorClass {
        match error {
            BridgeError::TransientUpstream { .. } | BridgeError::Timeout { .. } => {
                ErrorClass::Retryable
            }
            BridgeError::InvalidRequest { .. }
            | BridgeError::NoBackendAvailable
            | BridgeError::Configuration { .. } => ErrorClass::Fatal,
            BridgeError::UpstreamRejected {
                status_code: Some(code),
                ..
            } => {
                if self.config.retry_on_status.contains(code) {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
            BridgeError::UpstreamRejected {
                status_code: None,
                message,
                ..
            }
            | BridgeError::Internal { message } => {
                if has_retryable_hint(message) {
                    ErrorClass::Retryable
                } else {
                    ErrorClass::Fatal
                }
            }
        }
    }

    /// Check if an error is retryable
    #[must_use]
    pub fn is_retryable(&self, error: &BridgeError) -> bool {
        self.classify(error) == ErrorClass::Retryable
    }

    /// Execute an operation with the configured attempt budget
    ///
    /// # Errors
    /// Returns the last error if it is fatal or all attempts are exhausted
    pub async fn execute<F, Fut, T>(
        &self,
        correlation_id: &RequestId,
        operation: F,
    ) -> Result<(T, RetryOutcome), RetryError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        self.call_with_retry(correlation_id, self.config.max_attempts, operation)
            .await
    }

    /// Execute `operation` up to `max_attempts` times.
    ///
    /// `operation` receives the 1-indexed attempt number. A budget of zero is
    /// treated as one.
    ///
    /// # Errors
    /// Returns the last error if it is fatal or all attempts are exhausted
    pub async fn call_with_retry<F, Fut, T>(
        &self,
        correlation_id: &RequestId,
        max_attempts: u32,
        operation: F,
    ) -> Result<(T, RetryOutcome), RetryError>
    where
        F: Fn(u32) -> Fut,
        Fut: Future<Output = Result<T, BridgeError>>,
    {
        let max_attempts = max_attempts.max(1);
        let mut total_delay = Duration::ZERO;
        let mut attempt = 1;

        loop {
            match operation(attempt).await {
                Ok(value) => {
                    if attempt > 1 {
                        debug!(request_id = %correlation_id, attempt, "Retry succeeded");
                    }
                    return Ok((
                        value,
                        RetryOutcome {
                            attempts: attempt,
                            total_delay,
                        },
                    ));
                }
                Err(error) => {
                    if !self.is_retryable(&error) {
                        debug!(
                            request_id = %correlation_id,
                            attempt,
                            kind = %error.kind(),
                            "Fatal error, not retrying"
                        );
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                            retryable: false,
                            total_delay,
                        });
                    }

                    if attempt >= max_attempts {
                        // An exhausted timeout is surfaced as fatal
                        let retryable = !matches!(error, BridgeError::Timeout { .. });
                        warn!(
                            request_id = %correlation_id,
                            attempts = attempt,
                            retryable,
                            error = %error,
                            "Retry budget exhausted"
                        );
                        return Err(RetryError {
                            error,
                            attempts: attempt,
                            retryable,
                            total_delay,
                        });
                    }

                    let delay = self.delay_for_attempt(attempt);
                    warn!(
                        request_id = %correlation_id,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "Retrying after error"
                    );

                    tokio::time::sleep(delay).await;
                    total_delay += delay;
                    attempt += 1;
                }
            }
        }
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &RetryConfig {
        &self.config
    }
}

/// Builder for retry policy
#[derive(Debug, Default)]
pub struct RetryPolicyBuilder {
    config: RetryConfig,
}

impl RetryPolicyBuilder {
    /// Create a new builder
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the attempt budget
    #[must_use]
    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n;
        self
    }

    /// Set base delay
    #[must_use]
    pub fn base_delay(mut self, delay: Duration) -> Self {
        self.config.base_delay = delay;
        self
    }

    /// Set max delay
    #[must_use]
    pub fn max_delay(mut self, delay: Duration) -> Self {
        self.config.max_delay = delay;
        self
    }

    /// Set backoff multiplier
    #[must_use]
    pub fn multiplier(mut self, multiplier: f64) -> Self {
        self.config.multiplier = multiplier;
        self
    }

    /// Set jitter factor
    #[must_use]
    pub fn jitter(mut self, jitter: f64) -> Self {
        self.config.jitter = jitter.clamp(0.0, 1.0);
        self
    }

    /// Set upstream status codes to retry on
    #[must_use]
    pub fn retry_on_status(mut self, codes: Vec<u16>) -> Self {
        self.config.retry_on_status = codes;
        self
    }

    /// Build the policy
    #[must_use]
    pub fn build(self) -> RetryPolicy {
        RetryPolicy::new(self.config)
    }
}

/// Status-less errors fall back to the message text
fn has_retryable_hint(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    RETRYABLE_HINTS.iter().any(|hint| message.contains(hint))
}
