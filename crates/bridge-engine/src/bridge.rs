//! The bridge request path.
//!
//! One inbound call flows through:
//! 1. normalization into a canonical request
//! 2. the cache, when the call's options and the policy allow it
//! 3. the pinned backend, under the retry controller with a per-attempt timeout
//! 4. the cache store and the metrics sink
//!
//! Failures leave as [`BridgeFailure`] carrying the request id, elapsed time,
//! attempts and the final retry decision.

use crate::relay::{relay_events, RelayOptions, RelaySummary, StreamHandle};
use bridge_backends::{select_backend, status, ActiveBackend, BackendStatus};
use bridge_config::BridgeConfig;
use bridge_core::{
    BackendAdapter, BackendKind, BridgeError, BridgeFailure, CachePolicy, CanonicalResponse,
    Dialect, NormalizedCall, Normalizer, NormalizerConfig, RequestId,
};
use bridge_resilience::{with_timeout, CacheConfig, CacheStats, ResponseCache, RetryPolicy};
use bridge_telemetry::{bridge_call_span, MetricsSink, MetricsSnapshot};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, Instrument};

/// Result of handling one inbound call
#[derive(Debug)]
pub enum BridgeReply {
    /// A complete response
    Complete(CanonicalResponse),
    /// An incremental response
    Stream(StreamHandle),
}

/// Snapshot for the status endpoint
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeStatus {
    /// Pinned backend
    pub active_backend: BackendKind,
    /// Fresh availability of every candidate
    pub backends: Vec<BackendStatus>,
    /// Cache counters
    pub cache: CacheStats,
    /// Effective cache policy
    pub cache_policy: CachePolicy,
}

/// The request bridge
pub struct Bridge {
    normalizer: Normalizer,
    active: ActiveBackend,
    candidates: Vec<Arc<dyn BackendAdapter>>,
    cache: Arc<ResponseCache>,
    cache_policy: CachePolicy,
    retry: RetryPolicy,
    request_timeout: Duration,
    metrics: Arc<MetricsSink>,
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Bridge")
            .field("active", &self.active)
            .field("cache_policy", &self.cache_policy)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl Bridge {
    /// Create a builder
    #[must_use]
    pub fn builder() -> BridgeBuilder {
        BridgeBuilder::default()
    }

    /// Pinned backend
    #[must_use]
    pub fn active_backend(&self) -> &ActiveBackend {
        &self.active
    }

    /// Request normalizer
    #[must_use]
    pub fn normalizer(&self) -> &Normalizer {
        &self.normalizer
    }

    /// Metrics sink
    #[must_use]
    pub fn metrics(&self) -> &MetricsSink {
        &self.metrics
    }

    /// Consistent copy of the metrics
    #[must_use]
    pub fn metrics_snapshot(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Cache counters
    #[must_use]
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Drop every cached response, returning how many were removed
    pub fn clear_cache(&self) -> usize {
        let removed = self.cache.clear();
        info!(removed, "Cache cleared");
        removed
    }

    /// Drop cached responses for one model
    pub fn invalidate_model(&self, model: &str) -> usize {
        self.cache.invalidate_model(model)
    }

    /// Run the cache sweeper until the bridge is dropped
    pub fn spawn_cache_sweeper(&self, interval: Duration) -> JoinHandle<()> {
        self.cache.spawn_sweeper(interval)
    }

    /// Status report: pinned backend, fresh availability checks and cache counters
    pub async fn status(&self) -> BridgeStatus {
        BridgeStatus {
            active_backend: self.active.kind(),
            backends: status(&self.candidates, &self.active).await,
            cache: self.cache.stats(),
            cache_policy: self.cache_policy,
        }
    }

    /// Normalize a payload in the given dialect
    ///
    /// # Errors
    /// Returns a non-retryable failure if the payload cannot be normalized
    pub fn normalize(
        &self,
        payload: serde_json::Value,
        dialect: Dialect,
        request_id: RequestId,
    ) -> Result<NormalizedCall, BridgeFailure> {
        let started = Instant::now();
        self.normalizer
            .normalize(payload, dialect, request_id.clone())
            .map_err(|e| self.fail_fast(e, request_id, started))
    }

    /// Normalize a payload and run it, streaming or not as the payload asks
    ///
    /// # Errors
    /// Returns the failure of normalization or of the backend call
    pub async fn handle(
        &self,
        payload: serde_json::Value,
        dialect: Dialect,
        request_id: RequestId,
    ) -> Result<BridgeReply, BridgeFailure> {
        let call = self.normalize(payload, dialect, request_id)?;
        if call.options.stream {
            self.stream(&call).await.map(BridgeReply::Stream)
        } else {
            self.execute(&call).await.map(BridgeReply::Complete)
        }
    }

    /// Run a normalized call to completion
    ///
    /// # Errors
    /// Returns a failure once the retry controller gives up or classifies the
    /// error as fatal
    pub async fn execute(&self, call: &NormalizedCall) -> Result<CanonicalResponse, BridgeFailure> {
        let request = &call.request;
        let span = bridge_call_span!(request.id(), self.active.kind(), call.dialect);

        async move {
            let started = Instant::now();
            let adapter = self
                .active
                .adapter()
                .map_err(|e| self.fail_fast(e, request.id().clone(), started))?;

            let cacheable = self
                .cache_policy
                .allows(call.options.stream, call.options.mutating);
            if cacheable {
                if let Some(hit) = self.cache.get(request) {
                    self.metrics.record_cache_hit();
                    self.metrics.record_request(&hit, started.elapsed());
                    debug!("Served from cache");
                    return Ok(hit);
                }
                self.metrics.record_cache_miss();
            }

            let timeout = call.options.timeout.unwrap_or(self.request_timeout);
            let result = self
                .retry
                .execute(request.id(), |_attempt| {
                    with_timeout(timeout, adapter.execute(request))
                })
                .await;
            let elapsed = started.elapsed();

            match result {
                Ok((response, outcome)) => {
                    if cacheable {
                        self.cache.put(request, response.clone());
                    }
                    self.metrics.record_request(&response, elapsed);
                    info!(
                        attempts = outcome.attempts,
                        duration_ms = elapsed.as_millis() as u64,
                        input_tokens = response.usage().input_tokens,
                        output_tokens = response.usage().output_tokens,
                        "Bridge call completed"
                    );
                    Ok(response)
                }
                Err(failed) => {
                    self.metrics.record_failure(elapsed);
                    self.metrics.record_error(failed.error.kind());
                    error!(
                        attempts = failed.attempts,
                        retryable = failed.retryable,
                        error = %failed.error,
                        "Bridge call failed"
                    );
                    Err(BridgeFailure {
                        error: failed.error,
                        request_id: request.id().clone(),
                        duration_ms: elapsed.as_millis() as u64,
                        attempts: failed.attempts,
                        retryable: failed.retryable,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Open a stream for a normalized call.
    ///
    /// Opening is retried like a complete call. Once open, events are relayed
    /// under the call's timeout as an overall deadline; streams never touch the
    /// cache.
    ///
    /// # Errors
    /// Returns a failure if the stream cannot be opened
    pub async fn stream(&self, call: &NormalizedCall) -> Result<StreamHandle, BridgeFailure> {
        let request = &call.request;
        let span = bridge_call_span!(request.id(), self.active.kind(), call.dialect);

        async move {
            let started = Instant::now();
            let adapter = self
                .active
                .adapter()
                .map_err(|e| self.fail_fast(e, request.id().clone(), started))?;

            let timeout = call.options.timeout.unwrap_or(self.request_timeout);
            let opened = self
                .retry
                .execute(request.id(), |_attempt| {
                    with_timeout(timeout, adapter.execute_stream(request))
                })
                .await;

            match opened {
                Ok((events, outcome)) => {
                    debug!(attempts = outcome.attempts, "Stream opened");
                    let metrics = Arc::clone(&self.metrics);
                    let remaining = timeout.saturating_sub(started.elapsed());
                    let open_time = started.elapsed();
                    Ok(relay_events(
                        events,
                        request.id().clone(),
                        RelayOptions::default().with_deadline(remaining),
                        move |summary| record_stream(&metrics, &summary, open_time),
                    ))
                }
                Err(failed) => {
                    let elapsed = started.elapsed();
                    self.metrics.record_failure(elapsed);
                    self.metrics.record_error(failed.error.kind());
                    error!(
                        attempts = failed.attempts,
                        error = %failed.error,
                        "Stream failed to open"
                    );
                    Err(BridgeFailure {
                        error: failed.error,
                        request_id: request.id().clone(),
                        duration_ms: elapsed.as_millis() as u64,
                        attempts: failed.attempts,
                        retryable: failed.retryable,
                    })
                }
            }
        }
        .instrument(span)
        .await
    }

    fn fail_fast(&self, error: BridgeError, request_id: RequestId, started: Instant) -> BridgeFailure {
        let elapsed = started.elapsed();
        self.metrics.record_failure(elapsed);
        self.metrics.record_error(error.kind());
        debug!(request_id = %request_id, error = %error, "Call rejected before reaching a backend");
        BridgeFailure::immediate(error, request_id, elapsed)
    }
}

fn record_stream(metrics: &MetricsSink, summary: &RelaySummary, open_time: Duration) {
    let latency = open_time + summary.elapsed;
    if summary.is_complete() {
        metrics.record_stream(summary.usage.unwrap_or_default(), latency);
    } else {
        metrics.record_failure(latency);
        if let Some(kind) = summary.error_kind {
            metrics.record_error(kind);
        }
    }
    debug!(
        chunks = summary.chunks,
        terminal = ?summary.terminal,
        duration_ms = latency.as_millis() as u64,
        "Stream finished"
    );
}

/// Builder for [`Bridge`]
#[derive(Default)]
pub struct BridgeBuilder {
    candidates: Vec<Arc<dyn BackendAdapter>>,
    normalizer: NormalizerConfig,
    cache: Option<CacheConfig>,
    cache_policy: CachePolicy,
    retry: Option<RetryPolicy>,
    request_timeout: Option<Duration>,
}

impl BridgeBuilder {
    /// Seed every setting from a loaded configuration
    #[must_use]
    pub fn from_config(config: &BridgeConfig) -> Self {
        Self {
            candidates: Vec::new(),
            normalizer: config.normalizer_config(),
            cache: Some(CacheConfig {
                ttl: config.cache_ttl,
                max_entries: config.cache_max_entries,
            }),
            cache_policy: config.effective_cache_policy(),
            retry: Some(
                RetryPolicy::builder()
                    .max_attempts(config.retry_max_attempts)
                    .base_delay(config.retry_base_delay)
                    .max_delay(config.retry_max_delay)
                    .build(),
            ),
            request_timeout: Some(config.request_timeout),
        }
    }

    /// Candidate backends in priority order
    #[must_use]
    pub fn candidates(mut self, candidates: Vec<Arc<dyn BackendAdapter>>) -> Self {
        self.candidates = candidates;
        self
    }

    /// Append one candidate backend
    #[must_use]
    pub fn candidate(mut self, adapter: Arc<dyn BackendAdapter>) -> Self {
        self.candidates.push(adapter);
        self
    }

    /// Normalizer defaults and limits
    #[must_use]
    pub fn normalizer(mut self, config: NormalizerConfig) -> Self {
        self.normalizer = config;
        self
    }

    /// Cache size and TTL
    #[must_use]
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Cache policy
    #[must_use]
    pub fn cache_policy(mut self, policy: CachePolicy) -> Self {
        self.cache_policy = policy;
        self
    }

    /// Retry policy
    #[must_use]
    pub fn retry(mut self, policy: RetryPolicy) -> Self {
        self.retry = Some(policy);
        self
    }

    /// Per-attempt timeout used when a call names none
    #[must_use]
    pub fn request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    /// Check the candidates, pin one and build the bridge
    ///
    /// # Errors
    /// Returns error if the metrics registry cannot be created
    pub async fn build(self) -> Result<Bridge, BridgeError> {
        let metrics = MetricsSink::new().map_err(|e| BridgeError::internal(e.to_string()))?;
        let active = select_backend(&self.candidates).await;

        Ok(Bridge {
            normalizer: Normalizer::new(self.normalizer),
            active,
            candidates: self.candidates,
            cache: Arc::new(ResponseCache::new(self.cache.unwrap_or_default())),
            cache_policy: self.cache_policy,
            retry: self.retry.unwrap_or_default(),
            request_timeout: self.request_timeout.unwrap_or(Duration::from_secs(120)),
            metrics: Arc::new(metrics),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_no_backend_fails_fast() {
        let bridge = Bridge::builder().build().await.expect("bridge");
        assert_eq!(bridge.active_backend().kind(), BackendKind::None);

        let failure = bridge
            .handle(
                json!({"messages": [{"role": "user", "content": "hi"}]}),
                Dialect::Generic,
                RequestId::from("req-1"),
            )
            .await
            .expect_err("no backend");

        assert!(matches!(failure.error, BridgeError::NoBackendAvailable));
        assert_eq!(failure.attempts, 0);
        assert!(!failure.retryable);
        assert_eq!(failure.request_id.as_str(), "req-1");
        assert_eq!(bridge.metrics_snapshot().errors, 1);
    }

    #[tokio::test]
    async fn test_invalid_payload_is_not_retryable() {
        let bridge = Bridge::builder().build().await.expect("bridge");
        let failure = bridge
            .handle(json!({"action": "query"}), Dialect::CiAutomation, RequestId::generate())
            .await
            .expect_err("missing prompt");

        assert!(matches!(failure.error, BridgeError::InvalidRequest { .. }));
        assert!(!failure.retryable);
        assert_eq!(failure.body().kind.as_str(), "invalid_request");
    }

    #[tokio::test]
    async fn test_builder_from_config() {
        let config = BridgeConfig {
            cache_enabled: false,
            ..BridgeConfig::default()
        };
        let bridge = BridgeBuilder::from_config(&config).build().await.expect("bridge");
        let status = bridge.status().await;

        assert_eq!(status.cache_policy, CachePolicy::Disabled);
        assert!(status.backends.is_empty());
        assert_eq!(bridge.normalizer().config().token_ceiling, 8192);
    }
}
