//! Token Bucket algorithm implementation

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::time::SystemTime;

/// Token precision: one token is this many units.
const SCALE: u64 = 1000;

/// Token bucket refilled at a per-minute rate.
///
/// Lock-free: the token count and refill timestamp are atomics, and a
/// consume is a compare-and-swap loop.
#[derive(Debug)]
pub struct TokenBucket {
    /// Current tokens, scaled by `SCALE` so slow refill rates accumulate
    tokens: AtomicU64,
    /// Last refill timestamp (Unix milliseconds)
    last_refill: AtomicI64,
    capacity: u64,
    per_minute: u64,
}

impl TokenBucket {
    /// A full bucket holding `capacity` tokens, refilled at `per_minute`.
    pub fn new(capacity: u32, per_minute: u32) -> Self {
        let capacity = capacity as u64 * SCALE;
        Self {
            tokens: AtomicU64::new(capacity),
            last_refill: AtomicI64::new(Self::now_millis()),
            capacity,
            per_minute: per_minute as u64,
        }
    }

    /// Get current time in milliseconds
    pub fn now_millis() -> i64 {
        SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as i64
    }

    /// Try to take one token. Returns false when the bucket is empty.
    pub fn try_consume(&self) -> bool {
        let now = Self::now_millis();
        let last = self.last_refill.swap(now, Ordering::AcqRel);
        let refill = self.refill_since(last, now);

        loop {
            let current = self.tokens.load(Ordering::Acquire);
            let refilled = (current + refill).min(self.capacity);

            let (next, allowed) = if refilled >= SCALE {
                (refilled - SCALE, true)
            } else {
                (refilled, false)
            };

            if self
                .tokens
                .compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
            {
                return allowed;
            }
        }
    }

    /// Whole tokens currently available
    pub fn available(&self) -> u32 {
        let now = Self::now_millis();
        let refill = self.refill_since(self.last_refill.load(Ordering::Acquire), now);
        let current = self.tokens.load(Ordering::Acquire);
        ((current + refill).min(self.capacity) / SCALE) as u32
    }

    /// Seconds until one token is available
    pub fn retry_after(&self) -> u64 {
        if self.available() > 0 || self.per_minute == 0 {
            return 0;
        }
        (60 / self.per_minute).max(1)
    }

    /// Get the last activity time
    pub fn last_activity(&self) -> i64 {
        self.last_refill.load(Ordering::Acquire)
    }

    fn refill_since(&self, last: i64, now: i64) -> u64 {
        let elapsed_ms = (now - last).max(0) as u64;
        // SCALE units per token, 60_000 ms per minute
        elapsed_ms * self.per_minute * SCALE / 60_000
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_token_bucket_basic() {
        let bucket = TokenBucket::new(10, 60);

        // Should be able to consume up to capacity
        for _ in 0..10 {
            assert!(bucket.try_consume());
        }

        // Should be empty now
        assert!(!bucket.try_consume());
        assert_eq!(bucket.available(), 0);
        assert_eq!(bucket.retry_after(), 1);
    }

    #[test]
    fn test_token_bucket_refill() {
        // 60_000 per minute is one token per millisecond
        let bucket = TokenBucket::new(5, 60_000);

        for _ in 0..5 {
            assert!(bucket.try_consume());
        }

        std::thread::sleep(Duration::from_millis(10));
        assert!(bucket.try_consume());
    }

    #[test]
    fn test_denied_attempts_do_not_lose_refill() {
        // 600 per minute: one token every 100ms
        let bucket = TokenBucket::new(1, 600);
        assert!(bucket.try_consume());

        // Frequent denied attempts must still accumulate partial tokens.
        let mut allowed = false;
        for _ in 0..30 {
            std::thread::sleep(Duration::from_millis(10));
            if bucket.try_consume() {
                allowed = true;
                break;
            }
        }
        assert!(allowed);
    }
}
