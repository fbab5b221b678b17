use super::types::{retry_after_secs, Decision, LimiterConfig};
use super::{AdmissionController, AdmissionError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// State of a single token bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TokenBucket {
    tokens: u64,
    last_refill_ms: u64,
}

impl TokenBucket {
    /// A full bucket
    pub fn full(capacity: u64, now_ms: u64) -> Self {
        Self {
            tokens: capacity,
            last_refill_ms: now_ms,
        }
    }

    pub fn tokens(&self) -> u64 {
        self.tokens
    }

    /// Refill by whole tokens elapsed, then take `cost` tokens if available.
    ///
    /// `refill = floor(elapsed / interval_ms * capacity)`; the refill clock only
    /// advances when at least one token was added.
    pub fn take(&mut self, cost: u64, capacity: u64, interval_ms: u64, now_ms: u64) -> Decision {
        let elapsed = now_ms.saturating_sub(self.last_refill_ms);
        let refill = (elapsed.min(interval_ms) as u128 * capacity as u128
            / interval_ms.max(1) as u128) as u64;

        if refill > 0 {
            self.tokens = capacity.min(self.tokens.saturating_add(refill));
            self.last_refill_ms = now_ms;
        }

        let limit = capacity.min(u32::MAX as u64) as u32;
        if self.tokens >= cost && cost <= capacity {
            self.tokens -= cost;
            Decision::allowed(self.tokens, limit)
        } else {
            let since_refill = now_ms.saturating_sub(self.last_refill_ms);
            Decision::denied(self.tokens, limit, retry_after_secs(interval_ms, since_refill))
        }
    }
}

/// Local (in-memory) rate limiter using token bucket algorithm
///
/// Buckets live only in this process. With several gateway instances each
/// one enforces its own independent quota.
pub struct LocalTokenBucket {
    /// Map of buckets per key
    buckets: DashMap<String, TokenBucket>,
    capacity: u64,
    interval_ms: u64,
    origin: Instant,
}

impl LocalTokenBucket {
    /// Create a new local rate limiter
    pub fn new(config: &LimiterConfig) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: config.requests as u64,
            interval_ms: config.interval_ms(),
            origin: Instant::now(),
        }
    }

    fn now_ms(&self) -> u64 {
        self.origin.elapsed().as_millis() as u64
    }

    /// Check a key at an explicit point in time (milliseconds since creation)
    pub fn allow_at(&self, key: &str, cost: u32, now_ms: u64) -> Decision {
        // The entry guard holds the shard lock, so refill and take are one step
        let mut bucket = self.buckets.entry(key.to_string()).or_insert_with(|| {
            debug!("Creating new token bucket for key: {}", key);
            TokenBucket::full(self.capacity, now_ms)
        });

        let decision = bucket.take(cost as u64, self.capacity, self.interval_ms, now_ms);

        if decision.allowed {
            debug!(
                "Token bucket check passed for key: {}, remaining: {}",
                key, decision.remaining
            );
        } else {
            warn!("Rate limit exceeded for key: {} (local token bucket)", key);
        }

        decision
    }

    /// Drop buckets that would be full again on their next check.
    ///
    /// Returns the number of buckets removed.
    pub fn prune_idle(&self) -> usize {
        let now_ms = self.now_ms();
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| now_ms.saturating_sub(bucket.last_refill_ms) < self.interval_ms);
        before.saturating_sub(self.buckets.len())
    }

    /// Get the number of active buckets (for testing/monitoring)
    pub fn active_buckets(&self) -> usize {
        self.buckets.len()
    }

    /// Interval after which an untouched bucket is full again
    pub fn idle_after(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

#[async_trait]
impl AdmissionController for LocalTokenBucket {
    async fn allow(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError> {
        Ok(self.allow_at(key, cost, self.now_ms()))
    }

    fn strategy(&self) -> &'static str {
        "local_token_bucket"
    }

    async fn prune(&self) -> Result<usize, AdmissionError> {
        Ok(self.prune_idle())
    }
}
