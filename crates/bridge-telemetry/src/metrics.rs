//! Metrics sink.
//!
//! Counters live behind one lock so a snapshot always observes a consistent
//! set. The same events are mirrored into a Prometheus registry for text
//! exposition.

use crate::TelemetryError;
use bridge_core::{CanonicalResponse, ErrorKind, TokenUsage};
use parking_lot::RwLock;
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, Opts, Registry, TextEncoder,
};
use serde::Serialize;
use std::time::Duration;

/// Latency buckets in seconds
const LATENCY_BUCKETS: &[f64] = &[0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0];

/// Point-in-time copy of the bridge counters
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    /// Requests answered, successfully or not
    pub total_requests: u64,
    /// Requests answered with a successful response
    pub successful_requests: u64,
    /// Requests answered with an error
    pub failed_requests: u64,
    /// Lookups served from the cache
    pub cache_hits: u64,
    /// Lookups that missed the cache
    pub cache_misses: u64,
    /// Errors recorded
    pub errors: u64,
    /// Prompt tokens across successful responses
    pub input_tokens: u64,
    /// Output tokens across successful responses
    pub output_tokens: u64,
    /// Running mean latency in milliseconds
    pub avg_latency_ms: f64,
}

impl MetricsSnapshot {
    /// Share of cache lookups that hit, in `[0, 1]`
    #[must_use]
    pub fn cache_hit_rate(&self) -> f64 {
        let lookups = self.cache_hits + self.cache_misses;
        if lookups == 0 {
            0.0
        } else {
            self.cache_hits as f64 / lookups as f64
        }
    }

    fn observe_latency(&mut self, latency: Duration) {
        let sample = latency.as_secs_f64() * 1000.0;
        let n = self.total_requests.max(1) as f64;
        self.avg_latency_ms += (sample - self.avg_latency_ms) / n;
    }
}

/// Prometheus mirror of the counters
struct PrometheusMetrics {
    registry: Registry,
    requests: IntCounterVec,
    cache_lookups: IntCounterVec,
    errors: IntCounterVec,
    tokens: IntCounterVec,
    latency: Histogram,
}

impl PrometheusMetrics {
    fn new() -> Result<Self, TelemetryError> {
        let registry = Registry::new_custom(Some("llm_bridge".to_string()), None)?;

        let requests = IntCounterVec::new(
            Opts::new("requests_total", "Requests answered by the bridge"),
            &["outcome"],
        )?;
        let cache_lookups = IntCounterVec::new(
            Opts::new("cache_lookups_total", "Response cache lookups"),
            &["result"],
        )?;
        let errors = IntCounterVec::new(
            Opts::new("errors_total", "Errors by kind"),
            &["kind"],
        )?;
        let tokens = IntCounterVec::new(
            Opts::new("tokens_total", "Tokens reported by the backend"),
            &["direction"],
        )?;
        let latency = Histogram::with_opts(
            HistogramOpts::new("request_duration_seconds", "Request latency in seconds")
                .buckets(LATENCY_BUCKETS.to_vec()),
        )?;

        registry.register(Box::new(requests.clone()))?;
        registry.register(Box::new(cache_lookups.clone()))?;
        registry.register(Box::new(errors.clone()))?;
        registry.register(Box::new(tokens.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            registry,
            requests,
            cache_lookups,
            errors,
            tokens,
            latency,
        })
    }

    fn counter(vec: &IntCounterVec, label: &str) -> IntCounter {
        vec.with_label_values(&[label])
    }
}

/// Request, cache, error and token counters plus running mean latency
pub struct MetricsSink {
    state: RwLock<MetricsSnapshot>,
    prometheus: PrometheusMetrics,
}

impl std::fmt::Debug for MetricsSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MetricsSink")
            .field("state", &*self.state.read())
            .finish_non_exhaustive()
    }
}

impl MetricsSink {
    /// Create a sink with its own Prometheus registry
    ///
    /// # Errors
    /// Returns an error if a metric cannot be registered
    pub fn new() -> Result<Self, TelemetryError> {
        Ok(Self {
            state: RwLock::new(MetricsSnapshot::default()),
            prometheus: PrometheusMetrics::new()?,
        })
    }

    /// Record an answered request
    pub fn record_request(&self, response: &CanonicalResponse, latency: Duration) {
        let usage = response.usage();
        {
            let mut state = self.state.write();
            state.total_requests += 1;
            if response.is_success() {
                state.successful_requests += 1;
            } else {
                state.failed_requests += 1;
            }
            state.input_tokens += u64::from(usage.input_tokens);
            state.output_tokens += u64::from(usage.output_tokens);
            state.observe_latency(latency);
        }

        let outcome = if response.is_success() { "success" } else { "failure" };
        PrometheusMetrics::counter(&self.prometheus.requests, outcome).inc();
        PrometheusMetrics::counter(&self.prometheus.tokens, "input")
            .inc_by(u64::from(usage.input_tokens));
        PrometheusMetrics::counter(&self.prometheus.tokens, "output")
            .inc_by(u64::from(usage.output_tokens));
        self.prometheus.latency.observe(latency.as_secs_f64());
    }

    /// Record a stream that reached its normal end
    pub fn record_stream(&self, usage: TokenUsage, latency: Duration) {
        {
            let mut state = self.state.write();
            state.total_requests += 1;
            state.successful_requests += 1;
            state.input_tokens += u64::from(usage.input_tokens);
            state.output_tokens += u64::from(usage.output_tokens);
            state.observe_latency(latency);
        }
        PrometheusMetrics::counter(&self.prometheus.requests, "success").inc();
        PrometheusMetrics::counter(&self.prometheus.tokens, "input")
            .inc_by(u64::from(usage.input_tokens));
        PrometheusMetrics::counter(&self.prometheus.tokens, "output")
            .inc_by(u64::from(usage.output_tokens));
        self.prometheus.latency.observe(latency.as_secs_f64());
    }

    /// Record a request that ended in an error
    pub fn record_failure(&self, latency: Duration) {
        {
            let mut state = self.state.write();
            state.total_requests += 1;
            state.failed_requests += 1;
            state.observe_latency(latency);
        }
        PrometheusMetrics::counter(&self.prometheus.requests, "failure").inc();
        self.prometheus.latency.observe(latency.as_secs_f64());
    }

    /// Record a cache hit
    pub fn record_cache_hit(&self) {
        self.state.write().cache_hits += 1;
        PrometheusMetrics::counter(&self.prometheus.cache_lookups, "hit").inc();
    }

    /// Record a cache miss
    pub fn record_cache_miss(&self) {
        self.state.write().cache_misses += 1;
        PrometheusMetrics::counter(&self.prometheus.cache_lookups, "miss").inc();
    }

    /// Record an error
    pub fn record_error(&self, kind: ErrorKind) {
        self.state.write().errors += 1;
        PrometheusMetrics::counter(&self.prometheus.errors, kind.as_str()).inc();
    }

    /// Consistent copy of the counters
    #[must_use]
    pub fn snapshot(&self) -> MetricsSnapshot {
        *self.state.read()
    }

    /// Prometheus text exposition
    ///
    /// # Errors
    /// Returns an error if encoding fails
    pub fn gather(&self) -> Result<String, TelemetryError> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.prometheus.registry.gather(), &mut buffer)?;
        String::from_utf8(buffer).map_err(|e| TelemetryError::Encoding(e.to_string()))
    }
}
