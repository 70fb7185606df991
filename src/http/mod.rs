//! HTTP middleware built on axum.

mod headers;
mod middleware;

pub use headers::{
    control_chars, exceeds_max_length, has_forbidden_bytes, is_token, max_header_length,
    token_header, GuardedHeader, MaxHeaderLength,
};
pub use middleware::{
    bad_request, rate_limit, too_many_requests, RateLimitState, DEFAULT_MAX_CLIENT_KEYS,
    RETRY_AFTER_SECS,
};
