//! Axum middleware applying the rate limiter to inbound requests.

use axum::extract::{ConnectInfo, Request, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::RateLimitingConfig;
use crate::error::Result;
use crate::ratelimit::{resolve_from_headers, RateLimiter};

/// Client cap applied when the configured value is not positive.
pub const DEFAULT_MAX_CLIENT_KEYS: usize = 500;

/// Advisory `Retry-After` value, in seconds, sent with 429 responses.
pub const RETRY_AFTER_SECS: &str = "60";

/// Shared state for the rate limit middleware.
pub struct RateLimitState {
    limiter: Arc<RateLimiter>,
    trusted_header: String,
}

impl RateLimitState {
    /// Build the limiter from configuration and start its cleanup task.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: &RateLimitingConfig, cancel: Option<CancellationToken>) -> Result<Self> {
        let max_clients = if config.max_client_keys > 0 {
            config.max_client_keys as usize
        } else {
            DEFAULT_MAX_CLIENT_KEYS
        };

        let limiter = RateLimiter::new(cancel, config.requests_per_minute)?
            .with_max_clients(max_clients)
            .with_cleanup_interval(config.cleanup_interval())
            .with_stale_after(config.stale_after())
            .with_cleanup_batch_size(config.cleanup_batch_size);
        let limiter = Arc::new(limiter);
        limiter.start_cleanup();

        info!(
            requests_per_minute = limiter.capacity(),
            max_clients = limiter.max_clients(),
            trusted_header = %config.trusted_header(),
            "Rate limit middleware initialized"
        );

        Ok(Self {
            limiter,
            trusted_header: config.trusted_header().to_string(),
        })
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    pub fn trusted_header(&self) -> &str {
        &self.trusted_header
    }
}

/// Axum middleware enforcing the per-client rate limit.
///
/// The peer address comes from `ConnectInfo<SocketAddr>`, so the server must
/// be started with `into_make_service_with_connect_info::<SocketAddr>()`.
pub async fn rate_limit(
    State(state): State<Arc<RateLimitState>>,
    req: Request,
    next: Next,
) -> Response {
    let remote_addr = req
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ConnectInfo(addr)| addr.to_string())
        .unwrap_or_default();

    let Some(client_key) = resolve_from_headers(req.headers(), &remote_addr, &state.trusted_header)
    else {
        warn!(
            remote_addr = %remote_addr,
            header = %state.trusted_header,
            "Could not determine client address; rejecting request"
        );
        return bad_request();
    };

    if !state.limiter.allow(&client_key) {
        debug!(key = %client_key, path = %req.uri().path(), "Rate limit exceeded");
        return too_many_requests();
    }

    next.run(req).await
}

/// 400 response with a JSON error body.
pub fn bad_request() -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(json!({ "error": "bad request" })),
    )
        .into_response()
}

/// 429 response with a JSON error body and a `Retry-After` header.
pub fn too_many_requests() -> Response {
    let mut response = (
        StatusCode::TOO_MANY_REQUESTS,
        Json(json!({ "error": "too many requests" })),
    )
        .into_response();
    response
        .headers_mut()
        .insert(header::RETRY_AFTER, HeaderValue::from_static(RETRY_AFTER_SECS));
    response
}
