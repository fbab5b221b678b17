//! Connections to the shared backends
//!
//! - [`postgres`]: durable store for persistent token buckets and resources
//! - [`redis`]: fast store for fixed-window counters and the shared cache
//!
//! Every remote call made through these connections is bounded by
//! [`bounded`], which turns both timeouts and backend errors into a message
//! the calling adapter maps onto its own "unavailable" error.

pub mod postgres;
pub mod redis;

use deadpool_postgres::Pool;
use ::redis::aio::ConnectionManager;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

/// Connections opened at startup and shared by limiters, cache and store
#[derive(Clone, Default)]
pub struct SharedBackends {
    redis: Option<(ConnectionManager, String)>,
    postgres: Option<Pool>,
    migrate: bool,
}

impl SharedBackends {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_redis(mut self, connection: ConnectionManager, prefix: &str) -> Self {
        self.redis = Some((connection, prefix.to_string()));
        self
    }

    pub fn with_postgres(mut self, pool: Pool, migrate: bool) -> Self {
        self.postgres = Some(pool);
        self.migrate = migrate;
        self
    }

    /// Redis connection handle and key prefix, if configured
    pub fn redis(&self) -> Option<(ConnectionManager, &str)> {
        self.redis
            .as_ref()
            .map(|(connection, prefix)| (connection.clone(), prefix.as_str()))
    }

    /// PostgreSQL pool, if configured
    pub fn postgres(&self) -> Option<Pool> {
        self.postgres.clone()
    }

    /// Whether tables and functions should be created on startup
    pub fn migrate(&self) -> bool {
        self.migrate
    }
}

/// Run a backend call with a deadline.
///
/// Returns the backend error (or a timeout description) as a string.
pub async fn bounded<T, E, F>(timeout: Duration, operation: &str, fut: F) -> Result<T, String>
where
    F: Future<Output = Result<T, E>>,
    E: Display,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(format!("{} failed: {}", operation, e)),
        Err(_) => Err(format!(
            "{} timed out after {}ms",
            operation,
            timeout.as_millis()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_bounded_passes_value_through() {
        let result = bounded(Duration::from_millis(50), "op", async {
            Ok::<_, std::io::Error>(42)
        })
        .await;

        assert_eq!(result, Ok(42));
    }

    #[tokio::test]
    async fn test_bounded_reports_backend_error() {
        let result: Result<(), String> = bounded(Duration::from_millis(50), "ping", async {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "refused"))
        })
        .await;

        assert_eq!(result, Err("ping failed: refused".to_string()));
    }

    #[tokio::test]
    async fn test_bounded_times_out() {
        let result: Result<(), String> = bounded(Duration::from_millis(10), "slow", async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, std::io::Error>(())
        })
        .await;

        assert_eq!(result, Err("slow timed out after 10ms".to_string()));
    }
}
