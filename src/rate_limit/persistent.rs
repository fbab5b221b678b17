use super::scripts::{
    TOKEN_BUCKET_CALL, TOKEN_BUCKET_FUNCTION, TOKEN_BUCKET_PRUNE, TOKEN_BUCKET_TABLE,
};
use super::types::{retry_after_secs, AdmissionScope, Decision, LimiterConfig};
use super::{AdmissionController, AdmissionError};
use async_trait::async_trait;
use deadpool_postgres::Pool;
use std::time::SystemTime;
use tracing::{debug, error, info, warn};

/// PostgreSQL-backed token bucket shared by every gateway instance
///
/// Each check is one call to `gateway_take_tokens`, which locks the bucket row
/// while it refills, takes, and writes back. Both limiter scopes share the
/// table; pruning only touches rows under this limiter's key prefix.
pub struct PersistentTokenBucket {
    pool: Pool,
    capacity: i64,
    interval_ms: i64,
    key_pattern: String,
}

impl PersistentTokenBucket {
    pub fn new(pool: Pool, scope: AdmissionScope, config: &LimiterConfig) -> Self {
        Self {
            pool,
            capacity: config.requests as i64,
            interval_ms: config.interval_ms() as i64,
            key_pattern: format!("ratelimit:{}:%", scope.as_str()),
        }
    }

    /// Create the bucket table and function
    pub async fn migrate(&self) -> Result<(), AdmissionError> {
        let client = self.pool.get().await.map_err(unavailable)?;
        client
            .batch_execute(TOKEN_BUCKET_TABLE)
            .await
            .map_err(unavailable)?;
        client
            .batch_execute(TOKEN_BUCKET_FUNCTION)
            .await
            .map_err(unavailable)?;

        info!("Ensured gateway_rate_buckets table and gateway_take_tokens function exist");
        Ok(())
    }

    /// Check a key at an explicit point in time (epoch milliseconds)
    pub async fn allow_at(
        &self,
        key: &str,
        cost: u32,
        now_ms: i64,
    ) -> Result<Decision, AdmissionError> {
        let client = self.pool.get().await.map_err(unavailable)?;
        let row = client
            .query_one(
                TOKEN_BUCKET_CALL,
                &[
                    &key,
                    &self.capacity,
                    &(cost as i64),
                    &now_ms,
                    &self.interval_ms,
                ],
            )
            .await
            .map_err(unavailable)?;

        let admitted: bool = row.get(0);
        let remaining: i64 = row.get(1);
        let refilled_at_ms: i64 = row.get(2);
        let limit = self.capacity as u32;

        debug!(
            "Persistent token bucket check for key {}: admitted={}, remaining={}",
            key, admitted, remaining
        );

        if admitted {
            Ok(Decision::allowed(remaining.max(0) as u64, limit))
        } else {
            warn!("Rate limit exceeded for key: {} (persistent token bucket)", key);
            let elapsed = now_ms.saturating_sub(refilled_at_ms).max(0) as u64;
            Ok(Decision::denied(
                remaining.max(0) as u64,
                limit,
                retry_after_secs(self.interval_ms as u64, elapsed),
            ))
        }
    }

    /// Delete buckets untouched for a full interval before `now_ms`
    pub async fn prune_at(&self, now_ms: i64) -> Result<usize, AdmissionError> {
        let cutoff = now_ms.saturating_sub(self.interval_ms);
        let client = self.pool.get().await.map_err(unavailable)?;
        let removed = client
            .execute(TOKEN_BUCKET_PRUNE, &[&self.key_pattern, &cutoff])
            .await
            .map_err(unavailable)?;

        Ok(removed as usize)
    }
}

fn unavailable<E: std::fmt::Display>(e: E) -> AdmissionError {
    error!("Postgres error during rate limit check: {}", e);
    AdmissionError::Unavailable(e.to_string())
}

fn epoch_ms() -> i64 {
    SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl AdmissionController for PersistentTokenBucket {
    async fn allow(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError> {
        self.allow_at(key, cost, epoch_ms()).await
    }

    fn strategy(&self) -> &'static str {
        "persistent_token_bucket"
    }

    async fn prune(&self) -> Result<usize, AdmissionError> {
        self.prune_at(epoch_ms()).await
    }
}
