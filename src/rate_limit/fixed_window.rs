use super::scripts::FIXED_WINDOW_SCRIPT;
use super::types::{Decision, LimiterConfig};
use super::{AdmissionController, AdmissionError};
use async_trait::async_trait;
use dashmap::DashMap;
use redis::{aio::ConnectionManager, Script};
use std::time::{Duration, Instant};
use tracing::{debug, error, warn};

/// Counter value after an increment
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowCount {
    /// Counter value including this increment
    pub count: u64,
    /// Time until the counter resets
    pub reset_after: Duration,
}

/// Store of expiring counters with atomic increment-and-fetch
#[async_trait]
pub trait CounterStore: Send + Sync {
    /// Add `cost` to the counter for `key`, creating it with an expiry of
    /// `window` when absent, and return the new value.
    async fn increment(
        &self,
        key: &str,
        cost: u64,
        window: Duration,
    ) -> Result<WindowCount, AdmissionError>;

    fn backend(&self) -> &'static str;

    /// Drop counters whose window has ended
    fn prune(&self) -> usize {
        0
    }
}

/// Fixed window limiter over any [`CounterStore`]
///
/// `allowed = count <= limit`. Rejected requests still count toward the
/// window, matching the counter semantics of the shared store.
pub struct FixedWindowLimiter<S: CounterStore> {
    store: S,
    limit: u32,
    window: Duration,
}

impl<S: CounterStore> FixedWindowLimiter<S> {
    pub fn new(store: S, config: &LimiterConfig) -> Self {
        Self {
            store,
            limit: config.requests,
            window: config.window(),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    fn decide(&self, key: &str, counted: WindowCount) -> Decision {
        let limit = self.limit as u64;
        let retry_after = (counted.reset_after.as_millis() as u64).div_ceil(1000);

        if counted.count <= limit {
            debug!(
                "Fixed window check passed for key {}: count={}, reset_after={:?}",
                key, counted.count, counted.reset_after
            );
            Decision::allowed(limit - counted.count, self.limit)
        } else {
            warn!("Rate limit exceeded for key: {} (fixed window)", key);
            Decision::denied(0, self.limit, retry_after)
        }
    }
}

#[async_trait]
impl<S: CounterStore> AdmissionController for FixedWindowLimiter<S> {
    async fn allow(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError> {
        let counted = self.store.increment(key, cost as u64, self.window).await?;
        Ok(self.decide(key, counted))
    }

    fn strategy(&self) -> &'static str {
        match self.store.backend() {
            "redis" => "fixed_window",
            _ => "local_fixed_window",
        }
    }

    async fn prune(&self) -> Result<usize, AdmissionError> {
        Ok(self.store.prune())
    }
}

/// A counter and the instant it resets
#[derive(Debug, Clone, Copy)]
struct RateWindow {
    count: u64,
    reset_at: Instant,
}

/// In-process counter store
///
/// Each increment runs under the key's shard lock. Like every in-process
/// limiter state, the counters are per instance.
#[derive(Debug, Default)]
pub struct MemoryCounterStore {
    windows: DashMap<String, RateWindow>,
}

impl MemoryCounterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment at an explicit point in time
    pub fn increment_at(&self, key: &str, cost: u64, window: Duration, now: Instant) -> WindowCount {
        let mut entry = self.windows.entry(key.to_string()).or_insert(RateWindow {
            count: 0,
            reset_at: now + window,
        });

        if now >= entry.reset_at {
            entry.count = 0;
            entry.reset_at = now + window;
        }

        entry.count = entry.count.saturating_add(cost);

        WindowCount {
            count: entry.count,
            reset_after: entry.reset_at.saturating_duration_since(now),
        }
    }

    /// Drop windows that have already reset
    pub fn prune_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.windows.len();
        self.windows.retain(|_, w| w.reset_at > now);
        before.saturating_sub(self.windows.len())
    }

    pub fn len(&self) -> usize {
        self.windows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.windows.is_empty()
    }
}

#[async_trait]
impl CounterStore for MemoryCounterStore {
    async fn increment(
        &self,
        key: &str,
        cost: u64,
        window: Duration,
    ) -> Result<WindowCount, AdmissionError> {
        Ok(self.increment_at(key, cost, window, Instant::now()))
    }

    fn backend(&self) -> &'static str {
        "memory"
    }

    fn prune(&self) -> usize {
        self.prune_expired()
    }
}

/// Redis counter store; increment, expiry and TTL lookup run in one script
pub struct RedisCounterStore {
    connection: ConnectionManager,
    prefix: String,
    script: Script,
}

impl RedisCounterStore {
    pub fn new(connection: ConnectionManager, prefix: &str) -> Self {
        Self {
            connection,
            prefix: prefix.to_string(),
            script: Script::new(FIXED_WINDOW_SCRIPT),
        }
    }
}

#[async_trait]
impl CounterStore for RedisCounterStore {
    async fn increment(
        &self,
        key: &str,
        cost: u64,
        window: Duration,
    ) -> Result<WindowCount, AdmissionError> {
        // ConnectionManager is a cheap handle onto one multiplexed connection
        let mut connection = self.connection.clone();
        let redis_key = format!("{}:{}", self.prefix, key);

        let (count, ttl_ms) = self
            .script
            .key(&redis_key)
            .arg(cost)
            .arg(window.as_millis() as u64)
            .invoke_async::<_, (i64, i64)>(&mut connection)
            .await
            .map_err(|e| {
                error!("Redis error during rate limit check: {}", e);
                AdmissionError::Unavailable(e.to_string())
            })?;

        Ok(WindowCount {
            count: count.max(0) as u64,
            reset_after: Duration::from_millis(ttl_ms.max(0) as u64),
        })
    }

    fn backend(&self) -> &'static str {
        "redis"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(requests: u32, window_secs: u64) -> FixedWindowLimiter<MemoryCounterStore> {
        FixedWindowLimiter::new(
            MemoryCounterStore::new(),
            &LimiterConfig::new(requests, window_secs),
        )
    }

    #[tokio::test]
    async fn test_fixed_window_allows_up_to_limit() {
        let limiter = limiter(20, 10);

        for i in 0..20 {
            let result = limiter.allow("acme:cortes-premium", 1).await.unwrap();
            assert!(result.allowed, "Request {} should be allowed", i);
            assert_eq!(result.remaining, 19 - i);
        }

        let result = limiter.allow("acme:cortes-premium", 1).await.unwrap();
        assert!(!result.allowed);
        assert!(result.retry_after_secs > 0);
        assert!(result.retry_after_secs <= 10);
    }

    #[test]
    fn test_window_resets_at_boundary() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(10);
        let start = Instant::now();

        for _ in 0..3 {
            store.increment_at("k", 1, window, start);
        }
        let mid = store.increment_at("k", 1, window, start + Duration::from_millis(9_999));
        assert_eq!(mid.count, 4);
        assert_eq!(mid.reset_after, Duration::from_millis(1));

        // At the reset instant the counter starts over with a fresh window
        let fresh = store.increment_at("k", 1, window, start + window);
        assert_eq!(fresh.count, 1);
        assert_eq!(fresh.reset_after, window);
    }

    #[test]
    fn test_reset_at_never_moves_backwards() {
        let store = MemoryCounterStore::new();
        let window = Duration::from_secs(5);
        let start = Instant::now();

        let mut last_reset = start;
        for step in 0..40u64 {
            let now = start + Duration::from_millis(step * 700);
            let counted = store.increment_at("k", 1, window, now);
            let reset_at = now + counted.reset_after;
            assert!(reset_at >= last_reset);
            last_reset = reset_at;
        }
    }

    #[test]
    fn test_at_most_limit_admissions_per_window() {
        let limiter = limiter(5, 10);
        let start = Instant::now();
        let window = Duration::from_secs(10);

        let admitted = (0..50)
            .map(|i| {
                let counted = limiter.store().increment_at(
                    "k",
                    1,
                    window,
                    start + Duration::from_millis(i * 100),
                );
                limiter.decide("k", counted).allowed
            })
            .filter(|allowed| *allowed)
            .count();

        assert_eq!(admitted, 5);
    }

    #[tokio::test]
    async fn test_keys_are_independent() {
        let limiter = limiter(1, 60);

        assert!(limiter.allow("acme:shop", 1).await.unwrap().allowed);
        assert!(!limiter.allow("acme:shop", 1).await.unwrap().allowed);
        assert!(limiter.allow("globex:shop", 1).await.unwrap().allowed);
        assert_eq!(limiter.store().len(), 2);
    }

    #[test]
    fn test_prune_expired() {
        let store = MemoryCounterStore::new();
        store.increment_at("old", 1, Duration::from_secs(1), Instant::now() - Duration::from_secs(5));
        store.increment_at("new", 1, Duration::from_secs(60), Instant::now());

        assert_eq!(store.prune_expired(), 1);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_strategy_name() {
        assert_eq!(limiter(1, 1).strategy(), "local_fixed_window");
    }

    // Note: These tests require a running Redis instance
    // They are ignored by default. Run with: cargo test -- --ignored

    async fn create_redis_limiter(requests: u32, window_secs: u64) -> FixedWindowLimiter<RedisCounterStore> {
        let client = redis::Client::open("redis://127.0.0.1:6379").unwrap();
        let connection = ConnectionManager::new(client)
            .await
            .expect("Failed to connect to Redis");
        FixedWindowLimiter::new(
            RedisCounterStore::new(connection, "gateway-test"),
            &LimiterConfig::new(requests, window_secs),
        )
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window() {
        let limiter = create_redis_limiter(10, 60).await;
        let key = format!("test-fw-{}", rand::random::<u32>());

        for i in 0..10 {
            let result = limiter.allow(&key, 1).await.unwrap();
            assert!(result.allowed, "Request {} should be allowed", i);
        }

        // 11th request should be denied
        let result = limiter.allow(&key, 1).await.unwrap();
        assert!(!result.allowed);
        assert!(result.retry_after_secs >= 1);
    }

    #[tokio::test]
    #[ignore]
    async fn test_redis_fixed_window_resets() {
        let limiter = create_redis_limiter(1, 1).await;
        let key = format!("test-fw-reset-{}", rand::random::<u32>());

        assert!(limiter.allow(&key, 1).await.unwrap().allowed);
        assert!(!limiter.allow(&key, 1).await.unwrap().allowed);

        tokio::time::sleep(Duration::from_millis(1_100)).await;

        assert!(limiter.allow(&key, 1).await.unwrap().allowed);
    }
}
