//! Read-through cache in front of the resource store
//!
//! [`CacheGateway`] answers reads from a [`CacheStore`] and falls back to a
//! caller-supplied loader on a miss. Failed loads are never cached, and a
//! cache backend failure degrades to a direct load instead of failing the
//! read.

pub mod key;
pub mod store;

use crate::backends::{bounded, SharedBackends};
use crate::error::{GatewayError, Result};
use crate::metrics;
use crate::rate_limit::FailurePolicy;
use bytes::Bytes;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

pub use key::CacheKey;
pub use store::{CacheError, CacheStore, MemoryCacheStore, RedisCacheStore};

/// Where cached values live
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    Redis,
}

/// Cache configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    #[serde(default)]
    pub backend: CacheBackend,
    /// Time-to-live for cache entries in seconds
    #[serde(default = "default_ttl_secs")]
    pub ttl_secs: u64,
    /// Maximum number of entries held by the in-process backend
    #[serde(default = "default_max_capacity")]
    pub max_capacity: u64,
    /// Deadline for each cache backend call
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    /// Serialize concurrent misses for the same key within this instance
    #[serde(default)]
    pub single_flight: bool,
    /// What a write does when its cache entry cannot be invalidated
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

fn default_ttl_secs() -> u64 {
    300 // 5 minutes
}

fn default_max_capacity() -> u64 {
    10_000
}

fn default_timeout_ms() -> u64 {
    100
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            backend: CacheBackend::default(),
            ttl_secs: default_ttl_secs(),
            max_capacity: default_max_capacity(),
            timeout_ms: default_timeout_ms(),
            single_flight: false,
            failure_policy: FailurePolicy::default(),
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Whether a read was served from the cache
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheSource {
    Hit,
    Miss,
}

impl CacheSource {
    /// Value of the `X-Cache` response header
    pub fn header_value(&self) -> &'static str {
        match self {
            CacheSource::Hit => "HIT",
            CacheSource::Miss => "MISS",
        }
    }
}

/// Read-through cache with explicit invalidation
pub struct CacheGateway {
    store: Arc<dyn CacheStore>,
    ttl: Duration,
    timeout: Duration,
    failure_policy: FailurePolicy,
    inflight: Option<DashMap<String, Arc<Mutex<()>>>>,
}

impl CacheGateway {
    pub fn new(store: Arc<dyn CacheStore>, config: &CacheConfig) -> Self {
        info!(
            backend = store.backend(),
            ttl_secs = config.ttl_secs,
            single_flight = config.single_flight,
            "Initialized cache gateway"
        );

        Self {
            store,
            ttl: config.ttl(),
            timeout: config.timeout(),
            failure_policy: config.failure_policy,
            inflight: config.single_flight.then(DashMap::new),
        }
    }

    /// Build the store selected by `config.backend`
    pub fn from_config(config: &CacheConfig, backends: &SharedBackends) -> Result<Self> {
        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => Arc::new(MemoryCacheStore::new(config.max_capacity)),
            CacheBackend::Redis => {
                let (connection, prefix) = backends.redis().ok_or_else(|| {
                    GatewayError::Config(
                        "cache backend is redis but no redis section is configured".to_string(),
                    )
                })?;
                Arc::new(RedisCacheStore::new(connection, prefix))
            }
        };
        Ok(Self::new(store, config))
    }

    pub fn backend(&self) -> &'static str {
        self.store.backend()
    }

    /// Return the cached value for `key`, or load, cache and return it.
    ///
    /// Loader errors are returned unchanged and leave the cache untouched.
    pub async fn get<F, Fut, E>(&self, key: &CacheKey, loader: F) -> std::result::Result<(Bytes, CacheSource), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Bytes, E>>,
    {
        let store_key = key.to_store_key();

        if let Some(value) = self.lookup(&store_key).await {
            return Ok((value, CacheSource::Hit));
        }

        let Some(inflight) = &self.inflight else {
            return self.load(&store_key, loader).await;
        };

        let lock = inflight
            .entry(store_key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.clone().lock_owned().await;

        // Another caller may have filled the entry while we waited
        let result = match self.lookup(&store_key).await {
            Some(value) => Ok((value, CacheSource::Hit)),
            None => self.load(&store_key, loader).await,
        };

        drop(guard);
        drop(lock);
        inflight.remove_if(&store_key, |_, waiters| Arc::strong_count(waiters) == 1);

        result
    }

    /// Store a value under `key` with the configured TTL
    pub async fn set(&self, key: &CacheKey, value: Bytes) {
        self.store_value(&key.to_store_key(), value).await;
    }

    /// Remove the entry for `key`
    ///
    /// With a closed failure policy a backend failure or timeout is returned
    /// as `Unavailable`. With an open policy it is logged and the stale entry
    /// lives until its TTL.
    pub async fn invalidate(&self, key: &CacheKey) -> Result<()> {
        let store_key = key.to_store_key();
        let reason = match bounded(self.timeout, "cache delete", self.store.delete(&store_key)).await {
            Ok(()) => {
                debug!(key = %store_key, "Invalidated cache entry");
                return Ok(());
            }
            Err(reason) => reason,
        };

        metrics::record_cache_store_failure("delete");
        match self.failure_policy {
            FailurePolicy::Closed => {
                error!(key = %store_key, reason = %reason, "Cache invalidation failed");
                Err(GatewayError::Unavailable(reason))
            }
            FailurePolicy::Open => {
                warn!(
                    key = %store_key,
                    reason = %reason,
                    "Cache invalidation failed, entry stays until its TTL (fail-open)"
                );
                Ok(())
            }
        }
    }

    async fn lookup(&self, store_key: &str) -> Option<Bytes> {
        match bounded(self.timeout, "cache get", self.store.get(store_key)).await {
            Ok(Some(value)) => {
                metrics::record_cache_lookup("hit");
                debug!(key = %store_key, "Cache hit");
                Some(value)
            }
            Ok(None) => {
                metrics::record_cache_lookup("miss");
                None
            }
            Err(reason) => {
                metrics::record_cache_lookup("error");
                warn!(key = %store_key, reason = %reason, "Cache read failed, loading from store");
                None
            }
        }
    }

    async fn load<F, Fut, E>(&self, store_key: &str, loader: F) -> std::result::Result<(Bytes, CacheSource), E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = std::result::Result<Bytes, E>>,
    {
        let value = loader().await?;
        self.store_value(store_key, value.clone()).await;
        Ok((value, CacheSource::Miss))
    }

    async fn store_value(&self, store_key: &str, value: Bytes) {
        if let Err(reason) = bounded(self.timeout, "cache set", self.store.set(store_key, value, self.ttl)).await {
            metrics::record_cache_store_failure("set");
            warn!(key = %store_key, reason = %reason, "Failed to cache value");
        }
    }
}
