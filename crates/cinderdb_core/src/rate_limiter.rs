//! Token-bucket rate limiter for compaction I/O.
//!
//! Shapes the compactor's copy throughput in bytes per second so a merge
//! run cannot saturate the disk under client traffic. Tokens refill on
//! demand from elapsed time; the bucket holds at most one second of burst.
//!
//! `acquire` is blocking: a request is granted immediately against the
//! current balance (which may go negative), and the *next* caller sleeps
//! off the debt. This smooths large records instead of stalling on them.

use parking_lot::Mutex;
use std::thread;
use std::time::{Duration, Instant};

/// Blocking token bucket in bytes per second.
pub struct RateLimiter {
    bytes_per_sec: f64,
    state: Mutex<BucketState>,
}

struct BucketState {
    /// Available bytes; negative when in debt.
    tokens: f64,
    last_refill: Instant,
}

impl RateLimiter {
    /// Creates a limiter with a full one-second burst allowance.
    #[must_use]
    pub fn new(bytes_per_sec: u64) -> Self {
        let rate = bytes_per_sec as f64;
        Self {
            bytes_per_sec: rate,
            state: Mutex::new(BucketState {
                tokens: rate,
                last_refill: Instant::now(),
            }),
        }
    }

    /// Takes `bytes` from the bucket, sleeping first if earlier requests
    /// left it in debt.
    pub fn acquire(&self, bytes: u64) {
        let wait = {
            let mut state = self.state.lock();

            let now = Instant::now();
            let elapsed = now.duration_since(state.last_refill).as_secs_f64();
            state.last_refill = now;
            state.tokens = (state.tokens + elapsed * self.bytes_per_sec).min(self.bytes_per_sec);

            let wait = if state.tokens < 0.0 {
                Duration::from_secs_f64(-state.tokens / self.bytes_per_sec)
            } else {
                Duration::ZERO
            };

            state.tokens -= bytes as f64;
            wait
        };

        if !wait.is_zero() {
            thread::sleep(wait);
        }
    }
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("bytes_per_sec", &self.bytes_per_sec)
            .finish_non_exhaustive()
    }
}
