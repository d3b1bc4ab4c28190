//! HTTP request handlers.

use axum::{
    body::{Body, Bytes},
    extract::{Query, State},
    http::{header, HeaderValue, StatusCode},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    Json,
};
use bridge_core::{render_response, CanonicalResponse, Dialect, RequestId, StreamEventKind};
use bridge_engine::{BridgeReply, BridgeStatus, StreamHandle};
use bridge_telemetry::MetricsSnapshot;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::convert::Infallible;
use tracing::{debug, instrument};

use crate::{error::ApiError, extractors::CorrelationId, state::AppState};

/// Health check response
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// Service status
    pub status: String,
    /// Version
    pub version: String,
    /// Pinned backend
    pub backend: String,
}

/// Health check endpoint
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        backend: state.bridge.active_backend().kind().to_string(),
    })
}

/// `POST /v1/messages`
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn messages(
    State(state): State<AppState>,
    CorrelationId(request_id): CorrelationId,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch(&state, Dialect::Generic, request_id, &body).await
}

/// `POST /automation-bridge`
#[instrument(skip_all, fields(request_id = %request_id))]
pub async fn automation_bridge(
    State(state): State<AppState>,
    CorrelationId(request_id): CorrelationId,
    body: Bytes,
) -> Result<Response, ApiError> {
    dispatch(&state, Dialect::CiAutomation, request_id, &body).await
}

async fn dispatch(
    state: &AppState,
    dialect: Dialect,
    request_id: RequestId,
    body: &[u8],
) -> Result<Response, ApiError> {
    let payload: serde_json::Value = serde_json::from_slice(body)
        .map_err(|e| ApiError::malformed_body(e, request_id.clone()))?;

    debug!(dialect = %dialect, "Dispatching bridge call");

    match state.bridge.handle(payload, dialect, request_id.clone()).await? {
        BridgeReply::Complete(response) => complete_response(dialect, &response, request_id),
        BridgeReply::Stream(handle) => Ok(match dialect {
            Dialect::Generic => sse_response(handle),
            Dialect::CiAutomation => chunked_response(handle),
        }),
    }
}

fn complete_response(
    dialect: Dialect,
    response: &CanonicalResponse,
    request_id: RequestId,
) -> Result<Response, ApiError> {
    let rendered = render_response(dialect, response)
        .map_err(|e| ApiError::internal(e.to_string(), request_id))?;
    Ok(Json(rendered).into_response())
}

/// Interactive callers get one SSE envelope per event
fn sse_response(handle: StreamHandle) -> Response {
    let request_id = handle.request_id().clone();
    let header_value = HeaderValue::from_str(request_id.as_str()).ok();

    let events = handle.map(move |event| {
        let envelope = event.to_sse_envelope(&request_id);
        let data = serde_json::to_string(&envelope).unwrap_or_default();
        Ok::<_, Infallible>(Event::default().data(data))
    });

    let mut response = Sse::new(events)
        .keep_alive(KeepAlive::default())
        .into_response();
    if let Some(value) = header_value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Automation callers get raw text; an error is written as a final marked line
fn chunked_response(handle: StreamHandle) -> Response {
    let header_value = HeaderValue::from_str(handle.request_id().as_str()).ok();

    let chunks = handle.filter_map(|event| {
        let chunk = match event.kind {
            StreamEventKind::Error => Some(format!("\n[bridge error] {}\n", event.text)),
            _ => event.raw_chunk().map(str::to_string),
        };
        futures::future::ready(chunk.map(|c| Ok::<_, Infallible>(Bytes::from(c))))
    });

    let mut response = (
        [(header::CONTENT_TYPE, "text/plain; charset=utf-8")],
        Body::from_stream(chunks),
    )
        .into_response();
    if let Some(value) = header_value {
        response.headers_mut().insert("x-request-id", value);
    }
    response
}

/// Status response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusResponse {
    /// Version
    pub version: String,
    /// Bridge status
    #[serde(flatten)]
    pub bridge: BridgeStatus,
}

/// `GET /status`
pub async fn status(State(state): State<AppState>) -> Json<StatusResponse> {
    Json(StatusResponse {
        version: env!("CARGO_PKG_VERSION").to_string(),
        bridge: state.bridge.status().await,
    })
}

/// Query for `GET /metrics`
#[derive(Debug, Default, Deserialize)]
pub struct MetricsQuery {
    /// `prometheus` for text exposition, JSON otherwise
    #[serde(default)]
    pub format: Option<String>,
}

/// JSON metrics response
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsResponse {
    /// Counters
    #[serde(flatten)]
    pub snapshot: MetricsSnapshot,
    /// Share of cache lookups that hit
    pub cache_hit_rate: f64,
}

/// `GET /metrics`
pub async fn metrics(
    State(state): State<AppState>,
    CorrelationId(request_id): CorrelationId,
    Query(query): Query<MetricsQuery>,
) -> Result<Response, ApiError> {
    if query.format.as_deref() == Some("prometheus") {
        let text = state
            .bridge
            .metrics()
            .gather()
            .map_err(|e| ApiError::internal(e.to_string(), request_id))?;
        return Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], text).into_response());
    }

    let snapshot = state.bridge.metrics_snapshot();
    Ok(Json(MetricsResponse {
        cache_hit_rate: snapshot.cache_hit_rate(),
        snapshot,
    })
    .into_response())
}

/// Cache flush response
#[derive(Debug, Serialize)]
pub struct CacheClearResponse {
    /// Entries removed
    pub cleared: usize,
}

/// `DELETE /cache`
pub async fn clear_cache(State(state): State<AppState>) -> Json<CacheClearResponse> {
    Json(CacheClearResponse {
        cleared: state.bridge.clear_cache(),
    })
}

/// `GET /cache/stats`
pub async fn cache_stats(State(state): State<AppState>) -> impl IntoResponse {
    (StatusCode::OK, Json(state.bridge.cache_stats()))
}
