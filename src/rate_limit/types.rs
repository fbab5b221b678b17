use crate::resource::ResourceKey;
use crate::tenant::TenantContext;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Which limiter a check belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdmissionScope {
    /// Per client identity, across all tenants
    Global,
    /// Per tenant and resource key
    Resource,
}

impl AdmissionScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdmissionScope::Global => "global",
            AdmissionScope::Resource => "resource",
        }
    }
}

impl fmt::Display for AdmissionScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Backend strategy for a limiter
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum LimiterStrategy {
    /// In-process token bucket; quota is per instance
    #[default]
    LocalTokenBucket,
    /// Token bucket persisted in PostgreSQL
    PersistentTokenBucket,
    /// Fixed window counter in Redis
    FixedWindow,
    /// Fixed window counter held in process memory
    LocalFixedWindow,
}

/// What to do when the limiter backend cannot be reached
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum FailurePolicy {
    /// Admit the request and log the outage
    Open,
    /// Reject the request as unavailable
    #[default]
    Closed,
}

/// Limiter configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Backend strategy
    #[serde(default)]
    pub strategy: LimiterStrategy,
    /// Maximum number of requests (bucket capacity / window limit)
    pub requests: u32,
    /// Refill interval or window length (in seconds)
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
    /// Behavior when the backend is unreachable
    #[serde(default)]
    pub failure_policy: FailurePolicy,
    /// Deadline for a single check against the backend (in milliseconds)
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_window_secs() -> u64 {
    60
}

fn default_timeout_ms() -> u64 {
    250
}

impl LimiterConfig {
    /// Create a config with default strategy and policy
    pub fn new(requests: u32, window_secs: u64) -> Self {
        Self {
            strategy: LimiterStrategy::default(),
            requests,
            window_secs,
            failure_policy: FailurePolicy::default(),
            timeout_ms: default_timeout_ms(),
        }
    }

    /// Get the window as a Duration
    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Get the window in milliseconds
    pub fn interval_ms(&self) -> u64 {
        self.window_secs.saturating_mul(1000)
    }

    /// Get the backend deadline as a Duration
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Outcome of an admission check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    /// Whether the request is allowed
    pub allowed: bool,
    /// Seconds to wait before retrying (0 when allowed)
    pub retry_after_secs: u64,
    /// Remaining requests in the current bucket or window
    pub remaining: u64,
    /// Configured limit
    pub limit: u32,
}

impl Decision {
    /// Create an allowed decision
    pub fn allowed(remaining: u64, limit: u32) -> Self {
        Self {
            allowed: true,
            retry_after_secs: 0,
            remaining,
            limit,
        }
    }

    /// Create a denied decision; the retry hint is never below one second
    pub fn denied(remaining: u64, limit: u32, retry_after_secs: u64) -> Self {
        Self {
            allowed: false,
            retry_after_secs: retry_after_secs.max(1),
            remaining,
            limit,
        }
    }
}

/// Retry hint for a token bucket that has not refilled yet:
/// `ceil((interval - elapsed) / 1000)`, at least one second.
pub fn retry_after_secs(interval_ms: u64, elapsed_ms: u64) -> u64 {
    interval_ms.saturating_sub(elapsed_ms).div_ceil(1000).max(1)
}

/// Rate limit key. Resource-scoped keys can only be built from a resolved
/// tenant, so quota is never shared between tenants.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AdmissionKey {
    Global { client: String },
    Resource { tenant: String, key: String },
}

impl AdmissionKey {
    /// Key for the global limiter
    pub fn global(client: &str) -> Self {
        AdmissionKey::Global {
            client: client.to_string(),
        }
    }

    /// Key for the resource-scoped limiter
    pub fn resource(tenant: &TenantContext, key: &ResourceKey) -> Self {
        AdmissionKey::Resource {
            tenant: tenant.tenant_id().to_string(),
            key: key.as_str().to_string(),
        }
    }

    pub fn scope(&self) -> AdmissionScope {
        match self {
            AdmissionKey::Global { .. } => AdmissionScope::Global,
            AdmissionKey::Resource { .. } => AdmissionScope::Resource,
        }
    }

    /// Convert to the key used by limiter backends
    pub fn to_store_key(&self) -> String {
        match self {
            AdmissionKey::Global { client } => format!("ratelimit:global:{}", client),
            AdmissionKey::Resource { tenant, key } => {
                format!("ratelimit:resource:{}:{}", tenant, key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admission_key_to_store_key() {
        let key = AdmissionKey::global("192.168.1.1");
        assert_eq!(key.to_store_key(), "ratelimit:global:192.168.1.1");
        assert_eq!(key.scope(), AdmissionScope::Global);

        let tenant = TenantContext::parse("acme").unwrap();
        let resource = ResourceKey::parse("cortes-premium").unwrap();
        let key = AdmissionKey::resource(&tenant, &resource);
        assert_eq!(key.to_store_key(), "ratelimit:resource:acme:cortes-premium");
        assert_eq!(key.scope(), AdmissionScope::Resource);
    }

    #[test]
    fn test_resource_keys_differ_per_tenant() {
        let resource = ResourceKey::parse("cortes-premium").unwrap();
        let a = AdmissionKey::resource(&TenantContext::parse("acme").unwrap(), &resource);
        let b = AdmissionKey::resource(&TenantContext::parse("globex").unwrap(), &resource);

        assert_ne!(a.to_store_key(), b.to_store_key());
    }

    #[test]
    fn test_limiter_config_defaults() {
        let config: LimiterConfig = serde_yaml::from_str("requests: 20").unwrap();

        assert_eq!(config.strategy, LimiterStrategy::LocalTokenBucket);
        assert_eq!(config.failure_policy, FailurePolicy::Closed);
        assert_eq!(config.window(), Duration::from_secs(60));
        assert_eq!(config.interval_ms(), 60_000);
        assert_eq!(config.timeout(), Duration::from_millis(250));
    }

    #[test]
    fn test_limiter_strategy_names() {
        let config: LimiterConfig =
            serde_yaml::from_str("requests: 5\nstrategy: persistent_token_bucket\nfailure_policy: open")
                .unwrap();

        assert_eq!(config.strategy, LimiterStrategy::PersistentTokenBucket);
        assert_eq!(config.failure_policy, FailurePolicy::Open);
    }

    #[test]
    fn test_decision() {
        let allowed = Decision::allowed(50, 100);
        assert!(allowed.allowed);
        assert_eq!(allowed.remaining, 50);
        assert_eq!(allowed.retry_after_secs, 0);

        let denied = Decision::denied(0, 100, 0);
        assert!(!denied.allowed);
        assert_eq!(denied.retry_after_secs, 1);
    }

    #[test]
    fn test_retry_after_secs() {
        assert_eq!(retry_after_secs(10_000, 0), 10);
        assert_eq!(retry_after_secs(10_000, 1), 10);
        assert_eq!(retry_after_secs(10_000, 9_001), 1);
        assert_eq!(retry_after_secs(10_000, 10_000), 1);
        assert_eq!(retry_after_secs(10_000, 50_000), 1);
        assert_eq!(retry_after_secs(1_500, 0), 2);
    }
}
