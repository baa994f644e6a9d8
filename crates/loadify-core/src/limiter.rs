//! Aggregate bandwidth limiter shared by every active transfer.
//!
//! Token bucket holding at most one second of allowance. Workers call
//! `consume(len)` before writing each chunk; callers race for tokens and the
//! aggregate throughput converges to the configured rate regardless of how
//! many workers run or how large their chunks are.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Upper bound for a single sleep inside `consume`, so a reconfiguration
/// (rate change or disable) is picked up without waiting out a long shortfall.
const MAX_SLEEP: Duration = Duration::from_millis(250);

#[derive(Debug)]
struct Bucket {
    /// Bytes per second; <= 0 means disabled.
    rate: f64,
    /// Available allowance in bytes, in [0, rate].
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * self.rate).min(self.rate);
            self.last_refill = now;
        }
    }
}

/// Token-bucket bandwidth limiter. Share it as `Arc<BandwidthLimiter>`.
#[derive(Debug)]
pub struct BandwidthLimiter {
    bucket: Mutex<Bucket>,
}

impl Default for BandwidthLimiter {
    fn default() -> Self {
        Self::disabled()
    }
}

impl BandwidthLimiter {
    /// A limiter that lets everything through until configured.
    pub fn disabled() -> Self {
        Self {
            bucket: Mutex::new(Bucket {
                rate: 0.0,
                tokens: 0.0,
                last_refill: Instant::now(),
            }),
        }
    }

    /// A limiter capped at `rate_bytes_per_sec` (<= 0 disables it).
    pub fn new(rate_bytes_per_sec: f64) -> Self {
        let limiter = Self::disabled();
        limiter.configure(rate_bytes_per_sec > 0.0, rate_bytes_per_sec);
        limiter
    }

    /// Replace the rate and refill the bucket to one full second of allowance.
    pub fn configure(&self, enabled: bool, rate_bytes_per_sec: f64) {
        let rate = if enabled && rate_bytes_per_sec > 0.0 {
            rate_bytes_per_sec
        } else {
            0.0
        };
        let mut bucket = self.lock();
        bucket.rate = rate;
        bucket.tokens = rate;
        bucket.last_refill = Instant::now();
        drop(bucket);
        if rate > 0.0 {
            tracing::info!("speed limit enabled at {:.0} B/s", rate);
        } else {
            tracing::info!("speed limit disabled");
        }
    }

    /// Current rate in bytes per second (0 when disabled).
    pub fn rate(&self) -> f64 {
        self.lock().rate
    }

    pub fn is_enabled(&self) -> bool {
        self.rate() > 0.0
    }

    /// Block until `amount` bytes of allowance have been taken. Returns immediately
    /// when the limiter is disabled.
    pub fn consume(&self, amount: usize) {
        let mut needed = amount as f64;
        while needed > 0.0 {
            let rate = {
                let mut bucket = self.lock();
                if bucket.rate <= 0.0 {
                    return;
                }
                bucket.refill(Instant::now());
                let take = needed.min(bucket.tokens);
                if take > 0.0 {
                    bucket.tokens -= take;
                    needed -= take;
                }
                bucket.rate
            };
            if needed > 0.0 {
                let wait = Duration::from_secs_f64(needed / rate).min(MAX_SLEEP);
                std::thread::sleep(wait);
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|e| e.into_inner())
    }

    #[cfg(test)]
    fn tokens(&self) -> f64 {
        self.lock().tokens
    }
}
