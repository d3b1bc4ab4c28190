//! The flat `BridgeConfig` value.

use crate::error::ConfigError;
use bridge_core::{CachePolicy, NormalizerConfig, DEFAULT_TOKEN_CEILING};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::time::Duration;

/// Bridge configuration, read once at startup
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Upstream credential; enables the direct API backend
    pub api_key: Option<SecretString>,
    /// Upstream API base URL
    pub api_base_url: String,
    /// Model used when a payload names none
    pub default_model: String,
    /// Upstream ceiling for output tokens
    pub max_tokens_ceiling: u32,
    /// Token budget used when a payload gives none
    pub default_max_tokens: u32,
    /// Temperature used when a payload gives none
    pub default_temperature: f64,

    /// Enable the response cache
    pub cache_enabled: bool,
    /// Cache entry time-to-live
    #[serde(with = "humantime_serde")]
    pub cache_ttl: Duration,
    /// Maximum number of cached responses
    pub cache_max_entries: usize,
    /// Interval of the background expiry sweep
    #[serde(with = "humantime_serde")]
    pub cache_sweep_interval: Duration,
    /// Which calls may use the cache
    pub cache_policy: CachePolicy,

    /// Attempts per logical call, including the first
    pub retry_max_attempts: u32,
    /// Backoff base delay
    #[serde(with = "humantime_serde")]
    pub retry_base_delay: Duration,
    /// Backoff delay cap
    #[serde(with = "humantime_serde")]
    pub retry_max_delay: Duration,
    /// Default timeout for each adapter attempt
    #[serde(with = "humantime_serde")]
    pub request_timeout: Duration,

    /// External command for the process backend
    pub cli_command: String,
    /// Extra arguments passed before the generated ones
    pub cli_args: Vec<String>,

    /// Listen host
    pub host: String,
    /// Listen port
    pub port: u16,

    /// Log level used when `RUST_LOG` is unset
    pub log_level: String,
    /// Emit JSON log lines
    pub log_json: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            api_base_url: "https://api.anthropic.com".to_string(),
            default_model: "claude-3-5-sonnet-latest".to_string(),
            max_tokens_ceiling: DEFAULT_TOKEN_CEILING,
            default_max_tokens: 4096,
            default_temperature: 0.7,
            cache_enabled: true,
            cache_ttl: Duration::from_secs(300),
            cache_max_entries: 1000,
            cache_sweep_interval: Duration::from_secs(60),
            cache_policy: CachePolicy::NonMutating,
            retry_max_attempts: 3,
            retry_base_delay: Duration::from_secs(1),
            retry_max_delay: Duration::from_secs(30),
            request_timeout: Duration::from_secs(120),
            cli_command: "claude".to_string(),
            cli_args: Vec::new(),
            host: "127.0.0.1".to_string(),
            port: 8787,
            log_level: "info".to_string(),
            log_json: false,
        }
    }
}

impl BridgeConfig {
    /// Whether a non-empty credential is configured
    #[must_use]
    pub fn has_credential(&self) -> bool {
        self.api_key
            .as_ref()
            .is_some_and(|k| !k.expose_secret().trim().is_empty())
    }

    /// Effective cache policy; a disabled cache overrides the policy
    #[must_use]
    pub fn effective_cache_policy(&self) -> CachePolicy {
        if self.cache_enabled {
            self.cache_policy
        } else {
            CachePolicy::Disabled
        }
    }

    /// Normalizer limits derived from this configuration
    #[must_use]
    pub fn normalizer_config(&self) -> NormalizerConfig {
        NormalizerConfig {
            default_model: self.default_model.clone(),
            default_max_tokens: self.default_max_tokens,
            token_ceiling: self.max_tokens_ceiling,
            default_temperature: self.default_temperature,
        }
    }

    /// `host:port` listen address
    #[must_use]
    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Validate the merged configuration.
    ///
    /// The default token budget is clamped to the ceiling; every other
    /// inconsistency is an error.
    ///
    /// # Errors
    /// Returns `ConfigError::Validation` describing the first problem found
    pub fn validate(&mut self) -> Result<(), ConfigError> {
        if self.max_tokens_ceiling == 0 {
            return Err(ConfigError::Validation(
                "max_tokens_ceiling must be positive".to_string(),
            ));
        }
        self.default_max_tokens = self.default_max_tokens.clamp(1, self.max_tokens_ceiling);

        if !(0.0..=1.0).contains(&self.default_temperature) {
            return Err(ConfigError::Validation(format!(
                "default_temperature must be within [0, 1], got {}",
                self.default_temperature
            )));
        }
        if self.retry_max_attempts == 0 {
            return Err(ConfigError::Validation(
                "retry_max_attempts must be at least 1".to_string(),
            ));
        }
        if self.retry_base_delay > self.retry_max_delay {
            return Err(ConfigError::Validation(
                "retry_base_delay must not exceed retry_max_delay".to_string(),
            ));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Validation(
                "request_timeout must be positive".to_string(),
            ));
        }
        if self.cache_enabled && self.cache_max_entries == 0 {
            return Err(ConfigError::Validation(
                "cache_max_entries must be positive when the cache is enabled".to_string(),
            ));
        }
        if self.default_model.trim().is_empty() {
            return Err(ConfigError::Validation(
                "default_model must not be empty".to_string(),
            ));
        }
        url::Url::parse(&self.api_base_url).map_err(|e| {
            ConfigError::Validation(format!("api_base_url {:?}: {e}", self.api_base_url))
        })?;
        Ok(())
    }
}
