//! Rate limiting logic and state management.

mod identity;
mod limiter;
mod store;
mod sweeper;
mod visitor;

pub use identity::{canonical_ip, resolve_client_key, resolve_from_headers, strip_port};
pub use limiter::{
    normalize_requests_per_minute, refill_interval, RateLimiter, DEFAULT_CLEANUP_BATCH_SIZE,
    DEFAULT_CLEANUP_INTERVAL, DEFAULT_REQUESTS_PER_MINUTE, DEFAULT_STALE_AFTER,
    MAX_CLEANUP_INTERVAL, MAX_REQUESTS_PER_MINUTE,
};
pub use store::{Entry, VisitorStore};
pub use visitor::Visitor;
