//! Per-client token bucket state.

use parking_lot::Mutex;
use std::time::Duration;
use tokio::time::Instant;

/// Token bucket state for a single client.
///
/// Both fields are only touched while holding the visitor's own lock, never
/// the store lock, so admission checks for different clients do not contend.
#[derive(Debug)]
pub struct Visitor {
    state: Mutex<Bucket>,
}

#[derive(Debug)]
struct Bucket {
    /// Spendable tokens, `0 <= tokens <= capacity`
    tokens: u32,
    /// Instant up to which refill has been accounted
    last_refill: Instant,
}

impl Visitor {
    /// Create a visitor for a client's first request.
    ///
    /// The first request consumes a token immediately.
    pub fn new(capacity: u32, now: Instant) -> Self {
        Self {
            state: Mutex::new(Bucket {
                tokens: capacity.saturating_sub(1),
                last_refill: now,
            }),
        }
    }

    /// Refill the bucket for the time elapsed since the last accounting, then
    /// try to take one token.
    ///
    /// Returns `true` if a token was consumed.
    pub fn try_acquire(&self, now: Instant, rate: Duration, capacity: u32) -> bool {
        let mut bucket = self.state.lock();

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let earned = elapsed.as_nanos() / rate.as_nanos().max(1);
        // A long idle gap refills at most one full bucket.
        let added = earned.min(capacity as u128) as u32;

        if added > 0 {
            bucket.tokens = bucket.tokens.saturating_add(added).min(capacity);
            // Only the time that produced whole tokens is consumed; the
            // remainder carries over to the next check.
            bucket.last_refill += rate * added;

            // A full bucket earns nothing while it stays full.
            if bucket.tokens == capacity && bucket.last_refill < now {
                bucket.last_refill = now;
            }
        }

        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Instant up to which refill has been accounted.
    pub fn last_refill(&self) -> Instant {
        self.state.lock().last_refill
    }

    /// Whether the visitor has been idle since before `cutoff`.
    pub fn is_stale(&self, cutoff: Instant) -> bool {
        self.last_refill() < cutoff
    }

    /// Current token count.
    pub fn tokens(&self) -> u32 {
        self.state.lock().tokens
    }
}
