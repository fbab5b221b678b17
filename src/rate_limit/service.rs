use super::fixed_window::{FixedWindowLimiter, MemoryCounterStore, RedisCounterStore};
use super::local::LocalTokenBucket;
use super::persistent::PersistentTokenBucket;
use super::types::{AdmissionKey, AdmissionScope, Decision, FailurePolicy, LimiterConfig, LimiterStrategy};
use super::{AdmissionController, AdmissionError};
use crate::backends::SharedBackends;
use crate::error::{GatewayError, Result};
use crate::metrics;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Applies one limiter to requests, including its failure policy
pub struct AdmissionService {
    scope: AdmissionScope,
    controller: Arc<dyn AdmissionController>,
    failure_policy: FailurePolicy,
    timeout: Duration,
    limit: u32,
}

impl AdmissionService {
    /// Wrap an existing controller
    pub fn new(
        scope: AdmissionScope,
        controller: Arc<dyn AdmissionController>,
        config: &LimiterConfig,
    ) -> Self {
        info!(
            scope = %scope,
            strategy = controller.strategy(),
            requests = config.requests,
            window_secs = config.window_secs,
            failure_policy = ?config.failure_policy,
            "Initializing admission controller"
        );

        Self {
            scope,
            controller,
            failure_policy: config.failure_policy,
            timeout: config.timeout(),
            limit: config.requests,
        }
    }

    /// Build the controller selected by `config.strategy`
    pub async fn from_config(
        scope: AdmissionScope,
        config: &LimiterConfig,
        backends: &SharedBackends,
    ) -> Result<Self> {
        let controller: Arc<dyn AdmissionController> = match config.strategy {
            LimiterStrategy::LocalTokenBucket => Arc::new(LocalTokenBucket::new(config)),
            LimiterStrategy::LocalFixedWindow => Arc::new(FixedWindowLimiter::new(
                MemoryCounterStore::new(),
                config,
            )),
            LimiterStrategy::FixedWindow => {
                let (connection, prefix) = backends.redis().ok_or_else(|| {
                    GatewayError::Config(format!(
                        "{} limiter uses fixed_window but no redis section is configured",
                        scope
                    ))
                })?;
                Arc::new(FixedWindowLimiter::new(
                    RedisCounterStore::new(connection, prefix),
                    config,
                ))
            }
            LimiterStrategy::PersistentTokenBucket => {
                let pool = backends.postgres().ok_or_else(|| {
                    GatewayError::Config(format!(
                        "{} limiter uses persistent_token_bucket but no postgres section is configured",
                        scope
                    ))
                })?;
                let limiter = PersistentTokenBucket::new(pool, scope, config);
                if backends.migrate() {
                    limiter
                        .migrate()
                        .await
                        .map_err(|e| GatewayError::Unavailable(e.to_string()))?;
                }
                Arc::new(limiter)
            }
        };

        Ok(Self::new(scope, controller, config))
    }

    /// Admit a request or explain why not.
    ///
    /// Returns `RateLimited` on denial and `Unavailable` when the backend is
    /// unreachable under a fail-closed policy.
    pub async fn admit(&self, key: &AdmissionKey, cost: u32) -> Result<Decision> {
        let store_key = key.to_store_key();
        let outcome = match tokio::time::timeout(self.timeout, self.controller.allow(&store_key, cost)).await {
            Ok(result) => result,
            Err(_) => Err(AdmissionError::Unavailable(format!(
                "admission check timed out after {}ms",
                self.timeout.as_millis()
            ))),
        };

        match outcome {
            Ok(decision) if decision.allowed => {
                metrics::record_admission(self.scope, "allowed");
                debug!(scope = %self.scope, remaining = decision.remaining, "Admission granted");
                Ok(decision)
            }
            Ok(decision) => {
                metrics::record_admission(self.scope, "denied");
                warn!(
                    scope = %self.scope,
                    key = %store_key,
                    retry_after = decision.retry_after_secs,
                    "Rate limit exceeded"
                );
                Err(GatewayError::RateLimited {
                    retry_after: decision.retry_after_secs.max(1),
                    limit: decision.limit,
                })
            }
            Err(AdmissionError::Unavailable(reason)) => match self.failure_policy {
                FailurePolicy::Open => {
                    metrics::record_admission(self.scope, "fail_open");
                    warn!(
                        scope = %self.scope,
                        strategy = self.controller.strategy(),
                        reason = %reason,
                        "Admission backend unavailable, failing open"
                    );
                    Ok(Decision::allowed(0, self.limit))
                }
                FailurePolicy::Closed => {
                    metrics::record_admission(self.scope, "unavailable");
                    warn!(
                        scope = %self.scope,
                        strategy = self.controller.strategy(),
                        reason = %reason,
                        "Admission backend unavailable, failing closed"
                    );
                    Err(GatewayError::Unavailable(reason))
                }
            },
        }
    }

    /// Drop idle limiter state; a backend failure is logged and counts as zero
    pub async fn prune(&self) -> usize {
        match tokio::time::timeout(self.timeout, self.controller.prune()).await {
            Ok(Ok(removed)) => {
                if removed > 0 {
                    debug!(scope = %self.scope, removed, "Pruned idle limiter state");
                }
                removed
            }
            Ok(Err(e)) => {
                warn!(scope = %self.scope, error = %e, "Limiter prune failed");
                0
            }
            Err(_) => {
                warn!(scope = %self.scope, "Limiter prune timed out");
                0
            }
        }
    }

    pub fn scope(&self) -> AdmissionScope {
        self.scope
    }

    pub fn strategy(&self) -> &'static str {
        self.controller.strategy()
    }

    pub fn failure_policy(&self) -> FailurePolicy {
        self.failure_policy
    }
}
