//! Custom Axum extractors.

use axum::{
    async_trait,
    extract::FromRequestParts,
    http::{request::Parts, Request},
};
use bridge_core::RequestId;
use std::convert::Infallible;
use tower_http::request_id::{MakeRequestId, MakeRequestUuid, RequestId as HeaderRequestId};

/// Header names checked for a caller-supplied correlation id
const REQUEST_ID_HEADERS: &[&str] = &["x-request-id", "x-correlation-id"];

/// Correlation id from the request headers, or a fresh one
#[derive(Debug, Clone)]
pub struct CorrelationId(pub RequestId);

#[async_trait]
impl<S> FromRequestParts<S> for CorrelationId
where
    S: Send + Sync,
{
    type Rejection = Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        let id = REQUEST_ID_HEADERS
            .iter()
            .filter_map(|name| parts.headers.get(*name))
            .filter_map(|value| value.to_str().ok())
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map_or_else(RequestId::generate, RequestId::from);

        Ok(Self(id))
    }
}

/// Request id generator for `SetRequestIdLayer`.
///
/// Only runs when `x-request-id` is absent; a caller's `x-correlation-id` is
/// reused before a fresh UUID is minted.
#[derive(Debug, Clone, Copy, Default)]
pub struct CallerRequestId;

impl MakeRequestId for CallerRequestId {
    fn make_request_id<B>(&mut self, request: &Request<B>) -> Option<HeaderRequestId> {
        request
            .headers()
            .get("x-correlation-id")
            .filter(|value| value.to_str().is_ok_and(|v| !v.trim().is_empty()))
            .map(|value| HeaderRequestId::new(value.clone()))
            .or_else(|| MakeRequestUuid.make_request_id(request))
    }
}
