use std::collections::HashMap;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;

use crate::SignalError;

/// Per-source quota: sustained requests per second plus burst headroom.
#[derive(Debug, Clone, Copy)]
pub struct Quota {
    pub rps: f64,
    pub burst: f64,
}

impl Quota {
    pub fn per_minute(requests: f64) -> Self {
        Self {
            rps: requests / 60.0,
            burst: requests.max(1.0),
        }
    }

    pub fn per_hour(requests: f64) -> Self {
        Self {
            rps: requests / 3600.0,
            burst: requests.max(1.0),
        }
    }
}

#[derive(Debug)]
struct Bucket {
    quota: Quota,
    tokens: f64,
    last_refill: Instant,
}

impl Bucket {
    fn new(quota: Quota) -> Self {
        Self {
            quota,
            tokens: quota.burst,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.quota.rps).min(self.quota.burst);
        self.last_refill = now;
    }

    /// Take a token, or report how long until one is available.
    fn try_take(&mut self, now: Instant) -> Result<(), Duration> {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            return Ok(());
        }
        let deficit = 1.0 - self.tokens;
        let wait_s = if self.quota.rps > 0.0 {
            deficit / self.quota.rps
        } else {
            // Zero sustained rate: nothing will ever refill
            f64::MAX
        };
        Err(Duration::from_secs_f64(wait_s.min(86_400.0)))
    }
}

/// Token-bucket gate keyed by source name. `acquire` blocks until a token is
/// granted or the deadline passes; it never silently drops a request.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, Bucket>>,
    default_quota: Quota,
}

impl RateLimiter {
    pub fn new(default_quota: Quota) -> Self {
        Self {
            buckets: Mutex::new(HashMap::new()),
            default_quota,
        }
    }

    /// Pin a specific quota for a named source.
    pub async fn register(&self, source: &str, quota: Quota) {
        let mut buckets = self.buckets.lock().await;
        buckets.insert(source.to_string(), Bucket::new(quota));
    }

    /// Block until a token is granted, without bound.
    pub async fn acquire(&self, source: &str) {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(source.to_string())
                    .or_insert_with(|| Bucket::new(self.default_quota));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return,
                    Err(wait) => wait,
                }
            };
            tokio::time::sleep(wait).await;
        }
    }

    /// Block until a token is granted or the deadline passes. The deadline
    /// maps to `SignalError::Cancelled` so callers can distinguish a quota
    /// wait from an upstream failure.
    pub async fn acquire_until(
        &self,
        source: &str,
        deadline: Instant,
    ) -> Result<(), SignalError> {
        loop {
            let wait = {
                let mut buckets = self.buckets.lock().await;
                let bucket = buckets
                    .entry(source.to_string())
                    .or_insert_with(|| Bucket::new(self.default_quota));
                match bucket.try_take(Instant::now()) {
                    Ok(()) => return Ok(()),
                    Err(wait) => wait,
                }
            };

            let now = Instant::now();
            if now + wait > deadline {
                return Err(SignalError::Cancelled(format!(
                    "rate limit wait for '{}' exceeds deadline",
                    source
                )));
            }
            tokio::time::sleep(wait).await;
        }
    }
}
