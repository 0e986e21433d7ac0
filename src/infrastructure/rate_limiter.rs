//! Rate Limiter
//!
//! Token-bucket limiter for a single server. The bucket's burst capacity
//! and refill rate are both the server's effective QPS: the absolute
//! ceiling divided by the number of live proxies, recomputed on proxy
//! membership changes via `set_rate`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

/// Per-server token bucket.
///
/// Lock-free: tokens are refilled lazily on each `allow` call and consumed
/// with a CAS loop.
#[derive(Debug)]
pub struct QpsLimiter {
    /// Tokens added per second; also the bucket capacity
    rate: AtomicU64,
    tokens: AtomicU64,
    last_refill_ms: AtomicU64,
}

impl QpsLimiter {
    /// Create a limiter with a full bucket.
    pub fn new(qps: u64) -> Self {
        Self {
            rate: AtomicU64::new(qps),
            tokens: AtomicU64::new(qps),
            last_refill_ms: AtomicU64::new(Self::now_ms()),
        }
    }

    fn now_ms() -> u64 {
        static START: std::sync::OnceLock<Instant> = std::sync::OnceLock::new();
        let start = START.get_or_init(Instant::now);
        start.elapsed().as_millis() as u64
    }

    /// Current burst capacity (the effective QPS).
    pub fn burst(&self) -> u64 {
        self.rate.load(Ordering::Relaxed)
    }

    /// Replace the effective QPS, clamping stored tokens to the new
    /// capacity.
    pub fn set_rate(&self, qps: u64) {
        self.rate.store(qps, Ordering::Relaxed);
        let mut current = self.tokens.load(Ordering::Relaxed);
        while current > qps {
            match self.tokens.compare_exchange_weak(
                current,
                qps,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(c) => current = c,
            }
        }
    }

    /// Take one token if available.
    pub fn allow(&self) -> bool {
        let rate = self.rate.load(Ordering::Relaxed);
        if rate == 0 {
            return false;
        }

        let now_ms = Self::now_ms();
        let last_refill = self.last_refill_ms.load(Ordering::Relaxed);
        let elapsed_ms = now_ms.saturating_sub(last_refill);

        let tokens_to_add = elapsed_ms * rate / 1000;
        if tokens_to_add > 0 {
            let current = self.tokens.load(Ordering::Relaxed);
            let refilled = (current + tokens_to_add).min(rate);
            self.tokens.store(refilled, Ordering::Relaxed);
            self.last_refill_ms.store(now_ms, Ordering::Relaxed);
        }

        let mut current = self.tokens.load(Ordering::Relaxed);
        loop {
            if current == 0 {
                return false;
            }

            match self.tokens.compare_exchange_weak(
                current,
                current - 1,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return true,
                Err(c) => current = c,
            }
        }
    }
}
