//! Shared token bucket over the provider's quota units
//!
//! One instance is shared by every code path that talks to the provider
//! (periodic ticks and manual triggers alike), so nothing can bypass the
//! project-wide quota. Refill is lazy: computed on acquire, no timer thread.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Bucket counters, guarded by the limiter's mutex.
struct Bucket {
    /// Currently available quota units. Always in `0.0..=capacity`.
    available: f64,
    /// When `available` was last brought up to date.
    last_refill: Instant,
}

/// Process-wide token bucket enforcing the provider's quota ceiling.
///
/// Costs are in the provider's quota units (see [`crate::provider::quota`]),
/// not raw request counts.
pub struct RateLimiter {
    capacity: f64,
    refill_rate: f64,
    bucket: Mutex<Bucket>,
}

impl RateLimiter {
    /// Create a limiter with the given burst capacity (quota units) and
    /// refill rate (quota units per second). The bucket starts full.
    pub fn new(capacity: f64, refill_rate: f64) -> Self {
        Self {
            capacity,
            refill_rate,
            bucket: Mutex::new(Bucket {
                available: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Block until `cost` quota units are available, then debit them.
    ///
    /// If the bucket cannot cover the cost, the caller sleeps for exactly
    /// the time the deficit takes to refill and the bucket is then emptied,
    /// treating the sleep as having consumed what was needed. This is
    /// deliberately pessimistic so a long wait cannot be followed by a
    /// burst release.
    pub fn acquire(&self, cost: f64) {
        let wait = {
            let mut bucket = self.bucket.lock().unwrap();
            self.refill(&mut bucket);

            if bucket.available >= cost {
                bucket.available -= cost;
                return;
            }

            Duration::from_secs_f64((cost - bucket.available) / self.refill_rate)
        };

        log::debug!("[QUOTA] waiting {:?} for {} quota units", wait, cost);
        std::thread::sleep(wait);

        let mut bucket = self.bucket.lock().unwrap();
        bucket.available = 0.0;
        bucket.last_refill = Instant::now();
    }

    /// Force the bucket to empty.
    ///
    /// Called by whoever just observed a provider-side quota error, so every
    /// other in-flight caller is pushed to wait instead of racing the same
    /// exhausted window. Never fails.
    pub fn drain(&self) {
        let mut bucket = self.bucket.lock().unwrap();
        bucket.available = 0.0;
        bucket.last_refill = Instant::now();
    }

    /// Currently available quota units (refreshed before reading).
    pub fn available(&self) -> f64 {
        let mut bucket = self.bucket.lock().unwrap();
        self.refill(&mut bucket);
        bucket.available
    }

    /// Bring `available` up to date with the time elapsed since last refill.
    fn refill(&self, bucket: &mut Bucket) {
        let now = Instant::now();
        let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
        bucket.available = self.capacity.min(bucket.available + elapsed * self.refill_rate);
        bucket.last_refill = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Instant;

    #[test]
    fn test_acquire_within_capacity_never_blocks() {
        let limiter = RateLimiter::new(10.0, 1.0);
        let start = Instant::now();

        // Total cost 10 == capacity, bucket starts full.
        for _ in 0..5 {
            limiter.acquire(2.0);
        }

        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_acquire_blocks_after_drain() {
        // 50 units/sec, so 1 unit refills in ~20ms.
        let limiter = RateLimiter::new(10.0, 50.0);
        limiter.drain();

        let start = Instant::now();
        limiter.acquire(1.0);

        assert!(start.elapsed() >= Duration::from_millis(15));
    }

    #[test]
    fn test_drain_empties_bucket() {
        let limiter = RateLimiter::new(100.0, 0.001);
        limiter.acquire(1.0);
        limiter.drain();
        assert!(limiter.available() < 1.0);
    }

    #[test]
    fn test_available_never_exceeds_capacity() {
        let limiter = RateLimiter::new(5.0, 1000.0);
        std::thread::sleep(Duration::from_millis(20));
        assert!(limiter.available() <= 5.0);
    }

    #[test]
    fn test_pessimistic_release_after_wait() {
        let limiter = RateLimiter::new(10.0, 100.0);
        limiter.drain();

        // Waits ~10ms for 1 unit, then the bucket must be empty again.
        limiter.acquire(1.0);
        assert!(limiter.available() < 1.0);
    }

    #[test]
    fn test_concurrent_acquire_never_oversubscribes() {
        use std::sync::Arc;

        let limiter = Arc::new(RateLimiter::new(4.0, 20.0));
        let mut handles = Vec::new();

        for _ in 0..8 {
            let limiter = Arc::clone(&limiter);
            handles.push(std::thread::spawn(move || limiter.acquire(1.0)));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        // 8 units acquired against capacity 4: the extra 4 must have been
        // paid for by refill time, and the bucket can never go negative.
        assert!(limiter.available() >= 0.0);
        assert!(limiter.available() <= 4.0);
    }
}
