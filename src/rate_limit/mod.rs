//! Rate limiting module
//!
//! Admission control runs twice per read: once against a *global* limiter
//! keyed by client identity, then against a *resource-scoped* limiter keyed
//! by tenant and resource. Both sit behind the same [`AdmissionController`]
//! trait, implemented by:
//!
//! - **Local Token Bucket**: in-process, quota is per instance
//! - **Persistent Token Bucket**: PostgreSQL, evaluated by one server-side
//!   function call so concurrent instances cannot over-admit
//! - **Fixed Window**: atomic counters in Redis (or in-process for a single
//!   instance)
//!
//! # Features
//!
//! - Explicit fail-open / fail-closed policy when a backend is unreachable
//! - Bounded backend calls
//! - Rate limit headers in responses (`X-RateLimit-*`, `Retry-After`)
//!
//! # Example
//!
//! ```rust,no_run
//! use tenant_gateway::rate_limit::{AdmissionController, LimiterConfig, LocalTokenBucket};
//!
//! #[tokio::main]
//! async fn main() {
//!     let limiter = LocalTokenBucket::new(&LimiterConfig::new(20, 10));
//!     let decision = limiter.allow("ratelimit:global:10.0.0.1", 1).await.unwrap();
//!     assert!(decision.allowed);
//! }
//! ```

pub mod fixed_window;
pub mod headers;
pub mod local;
pub mod persistent;
pub mod scripts;
pub mod service;
pub mod types;

use async_trait::async_trait;
use thiserror::Error;

// Re-export commonly used types
pub use fixed_window::{CounterStore, FixedWindowLimiter, MemoryCounterStore, RedisCounterStore};
pub use headers::{add_rate_limit_headers, client_identity};
pub use local::LocalTokenBucket;
pub use persistent::PersistentTokenBucket;
pub use service::AdmissionService;
pub use types::{
    AdmissionKey, AdmissionScope, Decision, FailurePolicy, LimiterConfig, LimiterStrategy,
};

/// Errors raised by a limiter backend
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("rate limit backend unavailable: {0}")]
    Unavailable(String),
}

/// Admission control contract shared by every limiter backend
#[async_trait]
pub trait AdmissionController: Send + Sync {
    /// Consume `cost` units of quota for `key` if available.
    ///
    /// A denial is a successful call returning `allowed == false`; `Err` means
    /// the backend could not decide.
    async fn allow(&self, key: &str, cost: u32) -> Result<Decision, AdmissionError>;

    /// Strategy name for logs and metrics
    fn strategy(&self) -> &'static str;

    /// Drop state that no longer affects decisions.
    ///
    /// Returns the number of entries removed. Backends whose state expires on
    /// its own keep the default.
    async fn prune(&self) -> Result<usize, AdmissionError> {
        Ok(0)
    }
}
