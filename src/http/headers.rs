//! Header hygiene filters.
//!
//! Each filter is an independent axum middleware guarding one header. They
//! share no state with the rate limiter and can be layered in any order.

use axum::extract::{Request, State};
use axum::http::HeaderMap;
use axum::middleware::Next;
use axum::response::Response;
use tracing::debug;

use super::middleware::bad_request;

/// Reject requests whose header value is longer than `max_len` bytes.
#[derive(Debug, Clone)]
pub struct MaxHeaderLength {
    pub header: String,
    pub max_len: usize,
}

/// Name of a header guarded by a byte-level filter.
#[derive(Debug, Clone)]
pub struct GuardedHeader(pub String);

/// Whether `value` holds a byte that is a control character, DEL, or non-ASCII.
pub fn has_forbidden_bytes(value: &[u8]) -> bool {
    value.iter().any(|&b| b <= 0x1f || b == 0x7f || b >= 0x80)
}

/// Whether `value` is a non-empty token of `[A-Za-z0-9-_.#]`.
pub fn is_token(value: &[u8]) -> bool {
    !value.is_empty()
        && value
            .iter()
            .all(|&b| b.is_ascii_alphanumeric() || matches!(b, b'-' | b'_' | b'.' | b'#'))
}

/// Whether the first value of `header` exceeds `max_len` bytes.
///
/// An empty header name or a zero limit disables the check.
pub fn exceeds_max_length(headers: &HeaderMap, header: &str, max_len: usize) -> bool {
    if header.is_empty() || max_len == 0 {
        return false;
    }
    headers
        .get(header)
        .is_some_and(|value| value.len() > max_len)
}

/// Axum middleware enforcing [`MaxHeaderLength`].
pub async fn max_header_length(
    State(rule): State<MaxHeaderLength>,
    req: Request,
    next: Next,
) -> Response {
    if exceeds_max_length(req.headers(), &rule.header, rule.max_len) {
        debug!(header = %rule.header, max_len = rule.max_len, "Header too long");
        return bad_request();
    }
    next.run(req).await
}

/// Axum middleware rejecting control and non-ASCII bytes in a header.
pub async fn control_chars(
    State(GuardedHeader(header)): State<GuardedHeader>,
    req: Request,
    next: Next,
) -> Response {
    if !header.is_empty()
        && req
            .headers()
            .get_all(header.as_str())
            .iter()
            .any(|value| has_forbidden_bytes(value.as_bytes()))
    {
        debug!(header = %header, "Header contains forbidden bytes");
        return bad_request();
    }
    next.run(req).await
}

/// Axum middleware requiring every value of a header to be a token.
pub async fn token_header(
    State(GuardedHeader(header)): State<GuardedHeader>,
    req: Request,
    next: Next,
) -> Response {
    if !header.is_empty()
        && req
            .headers()
            .get_all(header.as_str())
            .iter()
            .any(|value| !is_token(value.as_bytes()))
    {
        debug!(header = %header, "Header is not a valid token");
        return bad_request();
    }
    next.run(req).await
}
