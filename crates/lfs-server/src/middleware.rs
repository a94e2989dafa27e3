//! HTTP middleware for request ids, access logs, rate limiting and media types

use crate::{ApiError, LfsErrorCode};
use axum::{
    body::Body,
    extract::State,
    http::{header, HeaderValue, Request},
    middleware::Next,
    response::Response,
};
use governor::{state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use lfs_core::{Actor, MEDIA_TYPE};
use std::num::NonZeroU32;
use std::sync::Arc;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Rate limiter type
pub type KeyedRateLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, governor::clock::DefaultClock>;

/// Create a rate limiter; `None` when limiting is off
pub fn create_rate_limiter(requests_per_second: u32) -> Option<Arc<KeyedRateLimiter>> {
    let rps = NonZeroU32::new(requests_per_second)?;
    Some(Arc::new(RateLimiter::keyed(Quota::per_second(rps))))
}

/// Rate limiting middleware, keyed by caller
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<KeyedRateLimiter>>,
    request: Request<Body>,
    next: Next,
) -> Result<Response, ApiError> {
    let key = request
        .extensions()
        .get::<Actor>()
        .map(Actor::rate_key)
        .unwrap_or_else(|| Actor::Anonymous.rate_key());

    if limiter.check_key(&key).is_err() {
        tracing::debug!(key = %key, "rate limit exceeded");
        let mut err = ApiError::new(LfsErrorCode::SlowDown, "Please reduce your request rate");
        if let Some(id) = request.extensions().get::<RequestId>() {
            err = err.with_request_id(id.0.clone());
        }
        return Err(err);
    }

    Ok(next.run(request).await)
}

/// Request ID middleware - reuses or assigns `x-request-id`
pub async fn request_id_middleware(mut request: Request<Body>, next: Next) -> Response {
    let request_id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|h| h.to_str().ok())
        .filter(|id| !id.is_empty() && id.len() <= 128)
        .map(str::to_string)
        .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    request.extensions_mut().insert(RequestId(request_id.clone()));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&request_id) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

/// Request ID extension
#[derive(Clone, Debug)]
pub struct RequestId(pub String);

/// Logging middleware
pub async fn logging_middleware(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let request_id = request.extensions().get::<RequestId>().map(|id| id.0.clone());
    let start = std::time::Instant::now();

    let response = next.run(request).await;

    tracing::info!(
        method = %method,
        uri = %uri,
        status = response.status().as_u16(),
        duration_ms = start.elapsed().as_millis() as u64,
        request_id = request_id.as_deref().unwrap_or("-"),
        "request completed"
    );

    response
}

/// Reject protocol requests that do not accept the LFS media type
pub async fn accept_media_type_middleware(request: Request<Body>, next: Next) -> Result<Response, ApiError> {
    let accepted = request
        .headers()
        .get(header::ACCEPT)
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.split(';').next())
        .is_some_and(|media| media.trim() == MEDIA_TYPE);

    if !accepted {
        tracing::trace!(uri = %request.uri(), "request without the LFS media type");
        return Err(ApiError::new(
            LfsErrorCode::UnsupportedMediaType,
            format!("Accept header must be {MEDIA_TYPE}"),
        ));
    }
    Ok(next.run(request).await)
}
