//! Route definitions for the bridge API.

use axum::{
    routing::{delete, get, post},
    Router,
};
use tower_http::{
    request_id::{PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};

use crate::{extractors::CallerRequestId, handlers, state::AppState};

/// Create the main API router
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // Health
        .route("/health", get(handlers::health_check))
        // Bridge calls
        .route("/v1/messages", post(handlers::messages))
        .route("/automation-bridge", post(handlers::automation_bridge))
        // Operations
        .route("/status", get(handlers::status))
        .route("/metrics", get(handlers::metrics))
        .route("/cache", delete(handlers::clear_cache))
        .route("/cache/stats", get(handlers::cache_stats))
        // Layers run bottom-up: the id is set before the trace span opens
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(CallerRequestId))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use axum::{
        body::{to_bytes, Body},
        http::{header, Request, StatusCode},
    };
    use bridge_core::{
        BackendAdapter, BackendKind, BridgeError, CanonicalRequest, CanonicalResponse,
        ContentSegment, EventStream, StreamEvent, TokenUsage,
    };
    use bridge_engine::Bridge;
    use futures::StreamExt;
    use serde_json::{json, Value};
    use std::sync::Arc;
    use tower::ServiceExt;

    struct EchoBackend;

    #[async_trait]
    impl BackendAdapter for EchoBackend {
        fn kind(&self) -> BackendKind {
            BackendKind::InProcessSdk
        }

        async fn is_available(&self) -> bool {
            true
        }

        async fn execute(
            &self,
            request: &CanonicalRequest,
        ) -> Result<CanonicalResponse, BridgeError> {
            CanonicalResponse::completed(
                self.name(),
                request.model(),
                vec![ContentSegment::text("hello from the bridge")],
                TokenUsage::new(12, 5),
            )
        }

        async fn execute_stream(
            &self,
            _request: &CanonicalRequest,
        ) -> Result<EventStream, BridgeError> {
            let events = vec![
                Ok(StreamEvent::start()),
                Ok(StreamEvent::content("hello ")),
                Ok(StreamEvent::content("world")),
                Ok(StreamEvent::stop(Some(TokenUsage::new(3, 2)))),
            ];
            Ok(futures::stream::iter(events).boxed())
        }
    }

    async fn app_with(candidates: Vec<Arc<dyn BackendAdapter>>) -> Router {
        let bridge = Bridge::builder()
            .candidates(candidates)
            .build()
            .await
            .expect("bridge");
        create_router(AppState::new(Arc::new(bridge)))
    }

    async fn app() -> Router {
        app_with(vec![Arc::new(EchoBackend)]).await
    }

    fn post_json(uri: &str, body: &Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn body_text(response: axum::response::Response) -> String {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    async fn body_json(response: axum::response::Response) -> Value {
        serde_json::from_str(&body_text(response).await).unwrap()
    }

    #[tokio::test]
    async fn test_health_endpoint() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["backend"], "in-process-sdk");
    }

    #[tokio::test]
    async fn test_generic_call() {
        let payload = json!({
            "model": "claude-test",
            "messages": [{"role": "user", "content": "hi"}]
        });
        let response = app()
            .await
            .oneshot(post_json("/v1/messages", &payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        assert!(response.headers().contains_key("x-request-id"));
        let body = body_json(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["model"], "claude-test");
        assert_eq!(body["content"][0]["text"], "hello from the bridge");
    }

    #[tokio::test]
    async fn test_malformed_json_is_structured() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("x-request-id", "caller-7")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "invalid_request");
        assert_eq!(body["requestId"], "caller-7");
        assert_eq!(body["retryable"], false);
    }

    #[tokio::test]
    async fn test_correlation_header_survives_router() {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("x-correlation-id", "corr-42")
            .body(Body::from("{not json"))
            .unwrap();
        let response = app().await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("corr-42")
        );
        let body = body_json(response).await;
        assert_eq!(body["requestId"], "corr-42");
    }

    #[tokio::test]
    async fn test_empty_messages_rejected() {
        let response = app()
            .await
            .oneshot(post_json("/v1/messages", &json!({"messages": []})))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "invalid_request");
    }

    #[tokio::test]
    async fn test_automation_shape() {
        let payload = json!({"action": "review", "direct_prompt": "look at this diff"});
        let response = app()
            .await
            .oneshot(post_json("/automation-bridge", &payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["action"], "response");
        assert_eq!(body["success"], true);
        assert_eq!(body["response"], "hello from the bridge");
        assert_eq!(body["usage"]["output_tokens"], 5);
    }

    #[tokio::test]
    async fn test_no_backend_is_unavailable() {
        let payload = json!({"messages": [{"role": "user", "content": "hi"}]});
        let response = app_with(Vec::new())
            .await
            .oneshot(post_json("/v1/messages", &payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = body_json(response).await;
        assert_eq!(body["kind"], "no_backend_available");
    }

    #[tokio::test]
    async fn test_sse_stream() {
        let payload = json!({
            "messages": [{"role": "user", "content": "hi"}],
            "stream": true
        });
        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("x-request-id", "stream-1")
            .body(Body::from(payload.to_string()))
            .unwrap();
        let response = app().await.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/event-stream"));

        let text = body_text(response).await;
        let envelopes: Vec<Value> = text
            .lines()
            .filter_map(|line| line.strip_prefix("data:"))
            .map(|data| serde_json::from_str(data.trim_start()).unwrap())
            .collect();

        let kinds: Vec<&str> = envelopes
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .collect();
        assert_eq!(kinds, vec!["start", "content", "content", "stop"]);
        assert_eq!(envelopes[1]["content"], "hello ");
        assert!(envelopes
            .iter()
            .all(|e| e["correlationId"] == "stream-1"));
    }

    #[tokio::test]
    async fn test_raw_automation_stream() {
        let payload = json!({"direct_prompt": "summarize", "stream": true});
        let response = app()
            .await
            .oneshot(post_json("/automation-bridge", &payload))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let content_type = response.headers()[header::CONTENT_TYPE].to_str().unwrap();
        assert!(content_type.starts_with("text/plain"));
        assert_eq!(body_text(response).await, "hello world");
    }

    #[tokio::test]
    async fn test_cache_endpoints() {
        let app = app().await;
        let payload = json!({"messages": [{"role": "user", "content": "cache me"}]});

        for _ in 0..2 {
            let response = app
                .clone()
                .oneshot(post_json("/v1/messages", &payload))
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let stats = app
            .clone()
            .oneshot(Request::builder().uri("/cache/stats").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let stats = body_json(stats).await;
        assert_eq!(stats["hitCount"], 1);
        assert_eq!(stats["size"], 1);

        let cleared = app
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/cache")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(cleared.status(), StatusCode::OK);
        assert_eq!(body_json(cleared).await["cleared"], 1);
    }

    #[tokio::test]
    async fn test_metrics_formats() {
        let app = app().await;
        let payload = json!({"messages": [{"role": "user", "content": "count me"}]});
        app.clone()
            .oneshot(post_json("/v1/messages", &payload))
            .await
            .unwrap();

        let json_metrics = app
            .clone()
            .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
            .await
            .unwrap();
        let body = body_json(json_metrics).await;
        assert_eq!(body["totalRequests"], 1);
        assert_eq!(body["successfulRequests"], 1);
        assert_eq!(body["cacheHitRate"], 0.0);

        let prometheus = app
            .oneshot(
                Request::builder()
                    .uri("/metrics?format=prometheus")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(prometheus.status(), StatusCode::OK);
        let text = body_text(prometheus).await;
        assert!(text.contains("llm_bridge_requests_total"));
    }

    #[tokio::test]
    async fn test_status_endpoint() {
        let response = app()
            .await
            .oneshot(Request::builder().uri("/status").body(Body::empty()).unwrap())
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = body_json(response).await;
        assert_eq!(body["activeBackend"], "in-process-sdk");
        assert_eq!(body["backends"][0]["available"], true);
        assert!(body["version"].is_string());
    }
}
