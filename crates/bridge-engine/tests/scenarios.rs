//! End-to-end bridge scenarios against scripted backends.

use async_trait::async_trait;
use bridge_core::{
    render_response, BackendAdapter, BackendKind, BridgeError, CachePolicy, CanonicalRequest,
    CanonicalResponse, ContentSegment, Dialect, EventStream, RequestId, StreamEvent,
    StreamEventKind, TokenUsage,
};
use bridge_engine::{Bridge, BridgeReply};
use bridge_resilience::{CacheConfig, RetryPolicy};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Backend whose replies are scripted per call
#[derive(Default)]
struct ScriptedBackend {
    replies: Mutex<VecDeque<Result<&'static str, BridgeError>>>,
    stream: Mutex<Vec<Result<StreamEvent, BridgeError>>>,
    delay: Option<Duration>,
    calls: AtomicU32,
    seen: Mutex<Vec<CanonicalRequest>>,
}

impl ScriptedBackend {
    fn replying(replies: Vec<Result<&'static str, BridgeError>>) -> Arc<Self> {
        Arc::new(Self {
            replies: Mutex::new(replies.into()),
            ..Self::default()
        })
    }

    fn streaming(events: Vec<Result<StreamEvent, BridgeError>>) -> Arc<Self> {
        Arc::new(Self {
            stream: Mutex::new(events),
            ..Self::default()
        })
    }

    fn slow(delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            delay: Some(delay),
            ..Self::default()
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }

    fn last_seen(&self) -> CanonicalRequest {
        self.seen.lock().last().cloned().expect("backend was called")
    }
}

#[async_trait]
impl BackendAdapter for ScriptedBackend {
    fn kind(&self) -> BackendKind {
        BackendKind::DirectApi
    }

    async fn is_available(&self) -> bool {
        true
    }

    async fn execute(&self, request: &CanonicalRequest) -> Result<CanonicalResponse, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let reply = self.replies.lock().pop_front().unwrap_or(Ok("hello"))?;
        CanonicalResponse::completed(
            "stub",
            request.model(),
            vec![ContentSegment::text(reply)],
            TokenUsage::new(3, 1),
        )
    }

    async fn execute_stream(&self, request: &CanonicalRequest) -> Result<EventStream, BridgeError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().push(request.clone());
        let events = self.stream.lock().clone();
        Ok(Box::pin(futures::stream::iter(events)))
    }
}

async fn bridge_with(backend: Arc<ScriptedBackend>, retry: RetryPolicy) -> Bridge {
    Bridge::builder()
        .candidate(backend)
        .cache(CacheConfig {
            ttl: Duration::from_secs(300),
            max_entries: 100,
        })
        .cache_policy(CachePolicy::NonMutating)
        .retry(retry)
        .request_timeout(Duration::from_secs(30))
        .build()
        .await
        .expect("bridge")
}

fn fast_retry(max_attempts: u32) -> RetryPolicy {
    RetryPolicy::builder()
        .max_attempts(max_attempts)
        .base_delay(Duration::from_secs(1))
        .build()
}

async fn complete(bridge: &Bridge, payload: Value, dialect: Dialect) -> CanonicalResponse {
    match bridge
        .handle(payload, dialect, RequestId::generate())
        .await
        .expect("call succeeds")
    {
        BridgeReply::Complete(response) => response,
        BridgeReply::Stream(_) => panic!("expected a complete response"),
    }
}

fn hi(max_tokens: u64) -> Value {
    json!({
        "model": "m1",
        "messages": [{"role": "user", "content": "hi"}],
        "max_tokens": max_tokens
    })
}

#[tokio::test]
async fn repeated_request_is_served_from_cache() {
    let backend = ScriptedBackend::replying(vec![]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;

    let first = complete(&bridge, hi(50), Dialect::Generic).await;
    let second = complete(&bridge, hi(50), Dialect::Generic).await;

    assert_eq!(backend.calls(), 1);
    assert_eq!(first.text(), "hello");
    assert_eq!(
        serde_json::to_vec(&first).expect("serialize"),
        serde_json::to_vec(&second).expect("serialize")
    );

    let stats = bridge.cache_stats();
    assert_eq!(stats.hit_count, 1);
    assert_eq!(stats.miss_count, 1);
    assert_eq!(stats.size, 1);

    let metrics = bridge.metrics_snapshot();
    assert_eq!(metrics.total_requests, 2);
    assert_eq!(metrics.cache_hits, 1);
}

#[tokio::test(start_paused = true)]
async fn expired_entry_is_a_miss() {
    let backend = ScriptedBackend::replying(vec![]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;

    complete(&bridge, hi(50), Dialect::Generic).await;
    tokio::time::advance(Duration::from_secs(301)).await;
    complete(&bridge, hi(50), Dialect::Generic).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(bridge.cache_stats().hit_count, 0);
}

#[tokio::test]
async fn token_budget_and_temperature_are_clamped() {
    let backend = ScriptedBackend::replying(vec![]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;

    let mut payload = hi(999_999);
    payload["temperature"] = json!(3.5);
    complete(&bridge, payload, Dialect::Generic).await;

    let seen = backend.last_seen();
    assert_eq!(seen.max_tokens(), 8192);
    assert!((seen.temperature() - 1.0).abs() < f32::EPSILON);
}

#[tokio::test(start_paused = true)]
async fn transient_failures_are_retried_with_backoff() {
    let backend = ScriptedBackend::replying(vec![
        Err(BridgeError::transient("stub", "overloaded", Some(529))),
        Err(BridgeError::transient("stub", "overloaded", Some(529))),
    ]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;

    let started = Instant::now();
    let response = complete(&bridge, hi(50), Dialect::Generic).await;
    let elapsed = started.elapsed();

    assert_eq!(response.text(), "hello");
    assert_eq!(backend.calls(), 3);
    // 1s + 2s of backoff
    assert!(elapsed >= Duration::from_secs(3));
    assert!(elapsed < Duration::from_millis(3100));
}

#[tokio::test(start_paused = true)]
async fn exhausted_budget_reports_retryable() {
    let backend = ScriptedBackend::replying(vec![
        Err(BridgeError::transient("stub", "rate limited", Some(429))),
        Err(BridgeError::transient("stub", "rate limited", Some(429))),
    ]);
    let bridge = bridge_with(backend.clone(), fast_retry(2)).await;

    let failure = bridge
        .handle(hi(50), Dialect::Generic, RequestId::from("req-9"))
        .await
        .expect_err("budget exhausted");

    assert_eq!(backend.calls(), 2);
    assert_eq!(failure.attempts, 2);
    assert!(failure.retryable);
    assert!(matches!(failure.error, BridgeError::TransientUpstream { .. }));

    let body = serde_json::to_value(failure.body()).expect("serialize");
    assert_eq!(body["requestId"], "req-9");
    assert_eq!(body["retryable"], true);
    assert!(body["durationMs"].as_u64().is_some());
}

#[tokio::test]
async fn authentication_failure_is_attempted_once() {
    let backend = ScriptedBackend::replying(vec![Err(BridgeError::rejected(
        "stub",
        "invalid x-api-key",
        Some(401),
    ))]);
    let bridge = bridge_with(backend.clone(), fast_retry(5)).await;

    let failure = bridge
        .handle(hi(50), Dialect::Generic, RequestId::generate())
        .await
        .expect_err("rejected");

    assert_eq!(backend.calls(), 1);
    assert_eq!(failure.attempts, 1);
    assert!(!failure.retryable);
    assert_eq!(bridge.metrics_snapshot().failed_requests, 1);
}

#[tokio::test(start_paused = true)]
async fn timeouts_are_retried_then_fatal() {
    let backend = ScriptedBackend::slow(Duration::from_secs(10));
    let bridge = bridge_with(backend.clone(), fast_retry(2)).await;

    let mut payload = hi(50);
    payload["timeout_ms"] = json!(100);
    let failure = bridge
        .handle(payload, Dialect::Generic, RequestId::generate())
        .await
        .expect_err("timed out");

    assert_eq!(backend.calls(), 2);
    assert!(matches!(failure.error, BridgeError::Timeout { .. }));
    assert!(!failure.retryable);
}

#[tokio::test]
async fn mutating_automation_calls_bypass_cache() {
    let backend = ScriptedBackend::replying(vec![]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;
    let payload = json!({"action": "apply-fix", "direct_prompt": "patch the bug"});

    complete(&bridge, payload.clone(), Dialect::CiAutomation).await;
    complete(&bridge, payload, Dialect::CiAutomation).await;

    assert_eq!(backend.calls(), 2);
    assert_eq!(bridge.cache_stats().size, 0);
}

#[tokio::test]
async fn automation_response_shape() {
    let backend = ScriptedBackend::replying(vec![Ok("looks good")]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;

    let response = complete(
        &bridge,
        json!({
            "action": "review",
            "prompt": "review this diff",
            "system_prompt": "you are a reviewer",
            "context": "diff --git a/x b/x"
        }),
        Dialect::CiAutomation,
    )
    .await;

    let seen = backend.last_seen();
    let contents: Vec<&str> = seen.messages().iter().map(|m| m.content.as_str()).collect();
    assert_eq!(
        contents,
        vec![
            "you are a reviewer",
            "Context:\ndiff --git a/x b/x",
            "review this diff"
        ]
    );

    let rendered = render_response(Dialect::CiAutomation, &response).expect("render");
    assert_eq!(rendered["action"], "response");
    assert_eq!(rendered["success"], true);
    assert_eq!(rendered["response"], "looks good");
    assert_eq!(rendered["metadata"]["backend"], "stub");
}

#[tokio::test]
async fn stream_forwards_chunks_in_order() {
    let backend = ScriptedBackend::streaming(vec![
        Ok(StreamEvent::start()),
        Ok(StreamEvent::content("one ")),
        Ok(StreamEvent::content("two ")),
        Ok(StreamEvent::content("three")),
        Ok(StreamEvent::stop(Some(TokenUsage::new(2, 3)))),
    ]);
    let bridge = bridge_with(backend.clone(), fast_retry(3)).await;

    let mut payload = hi(50);
    payload["stream"] = json!(true);
    let handle = match bridge
        .handle(payload.clone(), Dialect::Generic, RequestId::generate())
        .await
        .expect("stream opens")
    {
        BridgeReply::Stream(handle) => handle,
        BridgeReply::Complete(_) => panic!("expected a stream"),
    };

    let events: Vec<StreamEvent> = handle.collect().await;
    let text: String = events.iter().filter_map(|e| e.raw_chunk()).collect();
    assert_eq!(text, "one two three");
    assert_eq!(events.first().map(|e| e.kind), Some(StreamEventKind::Start));
    assert_eq!(
        events.iter().filter(|e| e.is_terminal()).count(),
        1,
        "exactly one terminal event"
    );
    assert_eq!(events.last().map(|e| e.kind), Some(StreamEventKind::Stop));

    // Streams never populate the cache
    assert_eq!(bridge.cache_stats().size, 0);
}

#[tokio::test]
async fn stream_failure_ends_with_error_event() {
    let backend = ScriptedBackend::streaming(vec![
        Ok(StreamEvent::start()),
        Ok(StreamEvent::content("partial")),
        Err(BridgeError::transient("stub", "connection reset", None)),
    ]);
    let bridge = bridge_with(backend, fast_retry(3)).await;

    let mut payload = hi(50);
    payload["stream"] = json!(true);
    let call = bridge
        .normalize(payload, Dialect::Generic, RequestId::from("req-s"))
        .expect("normalizes");
    let handle = bridge.stream(&call).await.expect("stream opens");
    assert_eq!(handle.request_id().as_str(), "req-s");

    let events: Vec<StreamEvent> = handle.collect().await;
    let kinds: Vec<StreamEventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(
        kinds,
        vec![
            StreamEventKind::Start,
            StreamEventKind::Content,
            StreamEventKind::Error
        ]
    );

    let envelope = events[2].to_sse_envelope(&RequestId::from("req-s"));
    let json = serde_json::to_value(&envelope).expect("serialize");
    assert_eq!(json["type"], "error");
    assert_eq!(json["correlationId"], "req-s");
}

#[tokio::test]
async fn concurrent_identical_requests_share_one_entry() {
    let backend = ScriptedBackend::replying(vec![]);
    let bridge = Arc::new(bridge_with(backend.clone(), fast_retry(3)).await);

    let mut handles = Vec::new();
    for _ in 0..8 {
        let bridge = Arc::clone(&bridge);
        handles.push(tokio::spawn(async move {
            complete(&bridge, hi(50), Dialect::Generic).await.text()
        }));
    }
    for handle in handles {
        assert_eq!(handle.await.expect("task"), "hello");
    }

    assert_eq!(bridge.cache_stats().size, 1);
    assert!(backend.calls() >= 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_does_not_block_other_requests() {
    let backend = ScriptedBackend::replying(vec![Err(BridgeError::transient(
        "stub",
        "overloaded",
        Some(529),
    ))]);
    let bridge = Arc::new(bridge_with(backend.clone(), fast_retry(3)).await);
    let started = Instant::now();

    let first = {
        let bridge = Arc::clone(&bridge);
        tokio::spawn(async move {
            let response = complete(&bridge, hi(50), Dialect::Generic).await;
            (response.text(), started.elapsed())
        })
    };

    // Let the first request fail once and enter its backoff sleep
    while backend.calls() < 1 {
        tokio::task::yield_now().await;
    }

    let second = complete(&bridge, hi(60), Dialect::Generic).await;
    assert_eq!(second.text(), "hello");
    assert!(started.elapsed() < Duration::from_secs(1));
    assert!(!first.is_finished());

    let (text, elapsed) = first.await.expect("task");
    assert_eq!(text, "hello");
    assert!(elapsed >= Duration::from_secs(1));
    assert_eq!(backend.calls(), 3);
}
