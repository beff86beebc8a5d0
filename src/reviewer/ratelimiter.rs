//! Token-bucket rate limiter for provider requests.
//!
//! One bucket per reviewer instance. Tokens refill continuously at
//! `requests_per_minute / 60` per second, capped at `burst`. All state
//! mutation is serialized by a single mutex; the empty-bucket sleep happens
//! outside the lock so waiting callers never block token refills.

use std::sync::Mutex;
use std::time::Duration;

use tokio::time::Instant;
use tracing::trace;

/// Snapshot of the limiter's current state.
#[derive(Debug, Clone)]
pub struct RateLimiterSnapshot {
    pub requests_per_minute: u32,
    pub burst: u32,
    pub available_tokens: u32,
    pub last_refill: Instant,
    pub wait_hint: Duration,
}

struct Bucket {
    requests_per_minute: u32,
    burst: u32,
    tokens: u32,
    last_refill: Instant,
}

impl Bucket {
    /// Refill tokens based on elapsed time, advancing `last_refill` only
    /// when at least one whole token accrued.
    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill);
        let per_second = f64::from(self.requests_per_minute) / 60.0;
        let to_add = (elapsed.as_secs_f64() * per_second) as u32;
        if to_add > 0 {
            self.tokens = (self.tokens + to_add).min(self.burst);
            self.last_refill = now;
        }
    }
}

/// Token-bucket limiter granting one permit per upstream request.
pub struct RateLimiter {
    bucket: Mutex<Bucket>,
    wait_hint: Duration,
}

fn default_burst(requests_per_minute: u32) -> u32 {
    (requests_per_minute / 10).max(1)
}

impl RateLimiter {
    /// Create a limiter. A zero `burst` derives the capacity from the rate
    /// (`rpm / 10`, minimum 1). The bucket starts full.
    pub fn new(requests_per_minute: u32, burst: u32, wait_hint: Duration) -> Self {
        let burst = if burst == 0 {
            default_burst(requests_per_minute)
        } else {
            burst
        };
        Self {
            bucket: Mutex::new(Bucket {
                requests_per_minute,
                burst,
                tokens: burst,
                last_refill: Instant::now(),
            }),
            wait_hint,
        }
    }

    /// Advisory back-off unit for callers that retry.
    pub fn wait_hint(&self) -> Duration {
        self.wait_hint
    }

    /// Acquire a permit, suspending until one is available.
    ///
    /// Cancel-safe: dropping the returned future while it sleeps releases
    /// nothing, since no token was consumed yet.
    pub async fn acquire(&self) {
        let wait = {
            let mut bucket = self.lock_bucket();
            bucket.refill(Instant::now());
            if bucket.tokens > 0 {
                bucket.tokens -= 1;
                return;
            }
            // Empty bucket: wait one token interval.
            Duration::from_secs_f64(60.0 / f64::from(bucket.requests_per_minute))
        };

        trace!(wait_ms = wait.as_millis() as u64, "rate limiter waiting");
        tokio::time::sleep(wait).await;
    }

    /// Consume a permit without waiting. Returns `true` iff one was taken.
    pub fn try_acquire(&self) -> bool {
        let mut bucket = self.lock_bucket();
        bucket.refill(Instant::now());
        if bucket.tokens > 0 {
            bucket.tokens -= 1;
            true
        } else {
            false
        }
    }

    /// Atomically update the rate parameters. The current token count is
    /// re-capped against the new burst but never pushed below zero.
    pub fn reconfigure(&self, requests_per_minute: u32, burst: u32) {
        let mut bucket = self.lock_bucket();
        bucket.refill(Instant::now());
        bucket.requests_per_minute = requests_per_minute;
        if burst > 0 {
            bucket.burst = burst;
        } else {
            bucket.burst = default_burst(requests_per_minute);
        }
        bucket.tokens = bucket.tokens.min(bucket.burst);
    }

    /// Current state, refilled to the moment of the call.
    pub fn snapshot(&self) -> RateLimiterSnapshot {
        let mut bucket = self.lock_bucket();
        bucket.refill(Instant::now());
        RateLimiterSnapshot {
            requests_per_minute: bucket.requests_per_minute,
            burst: bucket.burst,
            available_tokens: bucket.tokens,
            last_refill: bucket.last_refill,
            wait_hint: self.wait_hint,
        }
    }

    fn lock_bucket(&self) -> std::sync::MutexGuard<'_, Bucket> {
        self.bucket.lock().unwrap_or_else(|poisoned| {
            tracing::error!("rate limiter mutex poisoned, recovering");
            poisoned.into_inner()
        })
    }
}
