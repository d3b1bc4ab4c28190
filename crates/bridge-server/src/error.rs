//! HTTP error responses.
//!
//! Every failure answers with the structured body
//! `{error, kind, requestId, durationMs, retryable}`.

use axum::{
    http::{HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bridge_core::{BridgeError, BridgeFailure, RequestId};
use std::time::Duration;
use tracing::warn;

/// Error returned by handlers
#[derive(Debug)]
pub struct ApiError {
    failure: BridgeFailure,
}

impl ApiError {
    /// A request body that is not valid JSON
    #[must_use]
    pub fn malformed_body(message: impl std::fmt::Display, request_id: RequestId) -> Self {
        Self {
            failure: BridgeFailure::immediate(
                BridgeError::invalid_request(format!("malformed JSON body: {message}"), None),
                request_id,
                Duration::ZERO,
            ),
        }
    }

    /// An unexpected server-side failure on the call identified by `request_id`
    #[must_use]
    pub fn internal(message: impl Into<String>, request_id: RequestId) -> Self {
        Self {
            failure: BridgeFailure::immediate(
                BridgeError::internal(message),
                request_id,
                Duration::ZERO,
            ),
        }
    }

    /// The wrapped failure
    #[must_use]
    pub fn failure(&self) -> &BridgeFailure {
        &self.failure
    }

    /// HTTP status for the failure
    #[must_use]
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.failure.error.http_status())
            .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

impl From<BridgeFailure> for ApiError {
    fn from(failure: BridgeFailure) -> Self {
        Self { failure }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            warn!(
                request_id = %self.failure.request_id,
                kind = %self.failure.kind(),
                status = status.as_u16(),
                "Request failed"
            );
        }

        let mut response = (status, Json(self.failure.body())).into_response();
        if let Ok(value) = HeaderValue::from_str(self.failure.request_id.as_str()) {
            response.headers_mut().insert("x-request-id", value);
        }
        response
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        let err = ApiError::malformed_body("eof", RequestId::from("r1"));
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);
        assert_eq!(err.failure().request_id.as_str(), "r1");

        let err = ApiError::from(BridgeFailure::immediate(
            BridgeError::NoBackendAvailable,
            RequestId::generate(),
            Duration::ZERO,
        ));
        assert_eq!(err.status(), StatusCode::SERVICE_UNAVAILABLE);

        let err = ApiError::internal("boom", RequestId::from("r3"));
        assert_eq!(err.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.failure().request_id.as_str(), "r3");
    }

    #[test]
    fn test_internal_failure_keeps_call_id() {
        let response =
            ApiError::internal("render failed", RequestId::from("call-5")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("call-5")
        );
    }

    #[test]
    fn test_response_carries_request_id() {
        let response = ApiError::malformed_body("eof", RequestId::from("r2")).into_response();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            response.headers().get("x-request-id").and_then(|v| v.to_str().ok()),
            Some("r2")
        );
    }
}
