//! Token bucket rate limiter keyed by client identity.

use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::store::{Entry, VisitorStore};
use crate::error::{Result, TollgateError};

/// Requests per minute used when a non-positive value is configured.
pub const DEFAULT_REQUESTS_PER_MINUTE: u32 = 30;
/// Upper bound on requests per minute.
pub const MAX_REQUESTS_PER_MINUTE: u32 = 1_000_000;

/// Default period between eviction sweeps.
pub const DEFAULT_CLEANUP_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Default idle time after which a visitor may be evicted.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(10 * 60);
/// Default number of keys inspected per sweep.
pub const DEFAULT_CLEANUP_BATCH_SIZE: usize = 100;
/// Longest accepted sweep period. Longer values would overflow the ticker's
/// instant arithmetic.
pub const MAX_CLEANUP_INTERVAL: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Normalize a configured requests-per-minute value.
///
/// Non-positive values fall back to [`DEFAULT_REQUESTS_PER_MINUTE`] and values
/// above [`MAX_REQUESTS_PER_MINUTE`] are clamped.
pub fn normalize_requests_per_minute(requests_per_minute: i64) -> u32 {
    if requests_per_minute <= 0 {
        DEFAULT_REQUESTS_PER_MINUTE
    } else if requests_per_minute > MAX_REQUESTS_PER_MINUTE as i64 {
        MAX_REQUESTS_PER_MINUTE
    } else {
        requests_per_minute as u32
    }
}

/// Time needed to earn one token at the given rate. Never zero.
pub fn refill_interval(requests_per_minute: u32) -> Duration {
    let rate = Duration::from_secs(60) / requests_per_minute.max(1);
    rate.max(Duration::from_nanos(1))
}

/// Per-client token bucket rate limiter.
///
/// Every client key gets a bucket holding up to `capacity` tokens that refills
/// at one token per `rate`. The limiter is thread-safe and is meant to be
/// shared behind an `Arc`; the background eviction sweep is started
/// separately with [`RateLimiter::start_cleanup`].
pub struct RateLimiter {
    pub(super) store: VisitorStore,
    /// Interval that yields exactly one token
    pub(super) rate: Duration,
    /// Bucket size, equal to the normalized requests per minute
    pub(super) capacity: u32,
    pub(super) cancel: CancellationToken,
    pub(super) cleanup_interval: Duration,
    pub(super) stale_after: Duration,
    pub(super) cleanup_batch_size: usize,
    /// Position in the key snapshot where the next sweep starts
    pub(super) cleanup_cursor: AtomicUsize,
    pub(super) cleanup_started: AtomicBool,
}

impl RateLimiter {
    /// Create a rate limiter allowing `requests_per_minute` per client.
    ///
    /// The sweep is bound to `cancel` and is not started yet. A missing token
    /// is an error: the limiter must always be stoppable.
    pub fn new(cancel: Option<CancellationToken>, requests_per_minute: i64) -> Result<Self> {
        let cancel = cancel.ok_or(TollgateError::InvalidContext)?;

        let normalized = normalize_requests_per_minute(requests_per_minute);
        if requests_per_minute > MAX_REQUESTS_PER_MINUTE as i64 {
            warn!(
                requested = requests_per_minute,
                max = MAX_REQUESTS_PER_MINUTE,
                "requests_per_minute too large; clamping"
            );
        }

        Ok(Self {
            store: VisitorStore::new(0),
            rate: refill_interval(normalized),
            capacity: normalized,
            cancel,
            cleanup_interval: DEFAULT_CLEANUP_INTERVAL,
            stale_after: DEFAULT_STALE_AFTER,
            cleanup_batch_size: DEFAULT_CLEANUP_BATCH_SIZE,
            cleanup_cursor: AtomicUsize::new(0),
            cleanup_started: AtomicBool::new(false),
        })
    }

    /// Cap the number of distinct clients tracked at once. 0 means unbounded.
    pub fn with_max_clients(mut self, max_clients: usize) -> Self {
        self.store.set_max_clients(max_clients);
        self
    }

    /// Set the sweep period. A zero duration keeps the current value and
    /// values above [`MAX_CLEANUP_INTERVAL`] are clamped.
    pub fn with_cleanup_interval(mut self, interval: Duration) -> Self {
        if interval > MAX_CLEANUP_INTERVAL {
            warn!(
                requested = ?interval,
                max = ?MAX_CLEANUP_INTERVAL,
                "cleanup interval too large; clamping"
            );
            self.cleanup_interval = MAX_CLEANUP_INTERVAL;
        } else if !interval.is_zero() {
            self.cleanup_interval = interval;
        }
        self
    }

    /// Set the idle time after which visitors are evicted. A zero duration
    /// keeps the current value.
    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        if !stale_after.is_zero() {
            self.stale_after = stale_after;
        }
        self
    }

    /// Set the number of keys inspected per sweep. Zero keeps the current value.
    pub fn with_cleanup_batch_size(mut self, batch_size: usize) -> Self {
        if batch_size > 0 {
            self.cleanup_batch_size = batch_size;
        }
        self
    }

    /// Decide whether a request from `client_key` may proceed.
    ///
    /// Empty or whitespace-only keys are always rejected without touching
    /// the store.
    pub fn allow(&self, client_key: &str) -> bool {
        if client_key.trim().is_empty() {
            warn!("Rate limiter called with empty client key; rejecting");
            return false;
        }

        let now = Instant::now();
        let visitor = match self.store.get_or_create(client_key, self.capacity, now) {
            Entry::Existing(visitor) => visitor,
            Entry::Created => {
                debug!(
                    key = %client_key,
                    capacity = self.capacity,
                    "Created visitor"
                );
                return true;
            }
            Entry::Full => {
                warn!(
                    key = %client_key,
                    max_clients = self.store.max_clients(),
                    "Rate limiter max clients reached; rejecting new key"
                );
                return false;
            }
        };

        let allowed = visitor.try_acquire(now, self.rate, self.capacity);
        if !allowed {
            debug!(key = %client_key, "Rate limit exceeded");
        }
        allowed
    }

    /// Maximum tokens a bucket can hold.
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Time needed to earn one token.
    pub fn rate(&self) -> Duration {
        self.rate
    }

    pub fn max_clients(&self) -> usize {
        self.store.max_clients()
    }

    pub fn cleanup_interval(&self) -> Duration {
        self.cleanup_interval
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn cleanup_batch_size(&self) -> usize {
        self.cleanup_batch_size
    }

    /// Number of clients currently tracked.
    pub fn visitor_count(&self) -> usize {
        self.store.len()
    }

    /// Whether `client_key` is currently tracked.
    pub fn contains(&self, client_key: &str) -> bool {
        self.store.contains(client_key)
    }

    /// Remaining tokens for `client_key`, without refilling.
    pub fn tokens(&self, client_key: &str) -> Option<u32> {
        self.store.get(client_key).map(|v| v.tokens())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(requests_per_minute: i64) -> RateLimiter {
        RateLimiter::new(Some(CancellationToken::new()), requests_per_minute).unwrap()
    }

    #[test]
    fn test_normalize_requests_per_minute() {
        assert_eq!(normalize_requests_per_minute(0), 30);
        assert_eq!(normalize_requests_per_minute(-5), 30);
        assert_eq!(normalize_requests_per_minute(120), 120);
        assert_eq!(normalize_requests_per_minute(1_000_000), 1_000_000);
        assert_eq!(normalize_requests_per_minute(i64::MAX), MAX_REQUESTS_PER_MINUTE);
    }

    #[test]
    fn test_refill_interval() {
        assert_eq!(refill_interval(60), Duration::from_secs(1));
        assert_eq!(refill_interval(30), Duration::from_secs(2));
        assert_eq!(refill_interval(MAX_REQUESTS_PER_MINUTE), Duration::from_micros(60));
        assert!(refill_interval(0) > Duration::ZERO);
    }

    #[test]
    fn test_missing_cancellation_token_is_error() {
        let result = RateLimiter::new(None, 10);
        assert!(matches!(result, Err(TollgateError::InvalidContext)));
    }

    #[test]
    fn test_non_positive_rate_uses_default() {
        for rpm in [0, -1, i64::MIN] {
            let limiter = limiter(rpm);
            assert_eq!(limiter.capacity(), 30);
            assert_eq!(limiter.rate(), Duration::from_secs(2));
            assert!(limiter.allow("127.0.0.1"));
        }
    }

    #[test]
    fn test_huge_rate_is_clamped() {
        let limiter = limiter(5_000_000_000);
        assert_eq!(limiter.capacity(), MAX_REQUESTS_PER_MINUTE);
        assert!(limiter.rate() > Duration::ZERO);
        assert!(limiter.allow("127.0.0.1"));
    }

    /// Collects formatted log output for assertions.
    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<parking_lot::Mutex<Vec<u8>>>);

    impl std::io::Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl CapturedLogs {
        fn contents(&self) -> String {
            String::from_utf8_lossy(&self.0.lock()).into_owned()
        }
    }

    fn with_captured_warnings(f: impl FnOnce()) -> String {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::WARN)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        logs.contents()
    }

    #[test]
    fn test_huge_rate_clamp_logs_warning() {
        let output = with_captured_warnings(|| {
            limiter(5_000_000_000);
        });
        assert!(output.contains("WARN"));
        assert!(output.contains("requests_per_minute too large; clamping"));
        assert!(output.contains("requested=5000000000"));

        let output = with_captured_warnings(|| {
            limiter(120);
        });
        assert!(!output.contains("clamping"));
    }

    #[test]
    fn test_huge_cleanup_interval_clamp_logs_warning() {
        let output = with_captured_warnings(|| {
            let limiter = limiter(60).with_cleanup_interval(Duration::from_secs(u64::MAX));
            assert_eq!(limiter.cleanup_interval(), MAX_CLEANUP_INTERVAL);
        });
        assert!(output.contains("cleanup interval too large; clamping"));
    }

    #[test]
    fn test_defaults() {
        let limiter = limiter(10);
        assert_eq!(limiter.max_clients(), 0);
        assert_eq!(limiter.cleanup_interval(), DEFAULT_CLEANUP_INTERVAL);
        assert_eq!(limiter.stale_after(), DEFAULT_STALE_AFTER);
        assert_eq!(limiter.cleanup_batch_size(), DEFAULT_CLEANUP_BATCH_SIZE);
    }

    #[test]
    fn test_zero_tunables_keep_defaults() {
        let limiter = limiter(10)
            .with_cleanup_interval(Duration::ZERO)
            .with_stale_after(Duration::ZERO)
            .with_cleanup_batch_size(0);
        assert_eq!(limiter.cleanup_interval(), DEFAULT_CLEANUP_INTERVAL);
        assert_eq!(limiter.stale_after(), DEFAULT_STALE_AFTER);
        assert_eq!(limiter.cleanup_batch_size(), DEFAULT_CLEANUP_BATCH_SIZE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exact_budget() {
        let limiter = limiter(5);
        for _ in 0..5 {
            assert!(limiter.allow("127.0.0.1"));
        }
        assert!(!limiter.allow("127.0.0.1"));
        assert_eq!(limiter.tokens("127.0.0.1"), Some(0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_refill_after_one_interval() {
        // 60 rpm refills one token per second
        let limiter = limiter(60);
        for _ in 0..60 {
            assert!(limiter.allow("127.0.0.1"));
        }
        assert!(!limiter.allow("127.0.0.1"));

        tokio::time::advance(Duration::from_millis(999)).await;
        assert!(!limiter.allow("127.0.0.1"));

        tokio::time::advance(Duration::from_millis(1)).await;
        assert!(limiter.allow("127.0.0.1"));
        assert!(!limiter.allow("127.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_long_idle_refills_one_bucket() {
        let limiter = limiter(2);
        assert!(limiter.allow("127.0.0.1"));
        assert!(limiter.allow("127.0.0.1"));
        assert!(!limiter.allow("127.0.0.1"));

        tokio::time::advance(Duration::from_secs(3600)).await;
        assert!(limiter.allow("127.0.0.1"));
        assert!(limiter.allow("127.0.0.1"));
        assert!(!limiter.allow("127.0.0.1"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keys_are_isolated() {
        let limiter = limiter(2);
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.1"));
        assert!(!limiter.allow("10.0.0.1"));

        assert!(limiter.allow("10.0.0.2"));
        assert!(limiter.allow("10.0.0.2"));
        assert!(!limiter.allow("10.0.0.2"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_max_clients() {
        let limiter = limiter(3).with_max_clients(2);
        assert!(limiter.allow("10.0.0.1"));
        assert!(limiter.allow("10.0.0.2"));
        assert!(!limiter.allow("10.0.0.3"));
        assert!(!limiter.contains("10.0.0.3"));

        // Existing clients keep their own budgets
        assert!(limiter.allow("10.0.0.1"));
        assert_eq!(limiter.tokens("10.0.0.1"), Some(1));
        assert!(limiter.allow("10.0.0.2"));
        assert_eq!(limiter.visitor_count(), 2);
    }

    #[test]
    fn test_empty_key_rejected_without_state() {
        let limiter = limiter(10);
        assert!(!limiter.allow(""));
        assert!(!limiter.allow("   "));
        assert!(!limiter.allow("\t\n"));
        assert_eq!(limiter.visitor_count(), 0);
    }

    #[test]
    fn test_concurrent_first_requests_share_one_bucket() {
        let limiter = Arc::new(limiter(100));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let limiter = Arc::clone(&limiter);
                std::thread::spawn(move || (0..10).filter(|_| limiter.allow("10.0.0.1")).count())
            })
            .collect();

        let admitted: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
        assert_eq!(limiter.visitor_count(), 1);
        // 80 requests against a 100 token bucket all fit
        assert_eq!(admitted, 80);
    }
}
