use crate::backends::postgres::PostgresConfig;
use crate::backends::redis::RedisConfig;
use crate::cache::{CacheBackend, CacheConfig};
use crate::error::{GatewayError, Result};
use crate::rate_limit::types::{LimiterConfig, LimiterStrategy};
use crate::tenant::{is_valid_slug, TenantConfig};
use axum::http::HeaderName;
use serde::Deserialize;
use std::path::Path;

/// Prefix for environment overrides, e.g. `GATEWAY__SERVER__PORT=9090`
pub const ENV_PREFIX: &str = "GATEWAY";

/// Main gateway configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Tenant resolution
    #[serde(default)]
    pub tenant: TenantConfig,
    /// Global and resource-scoped limiters
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    /// Resource store selection
    #[serde(default)]
    pub store: StoreConfig,
    /// Redis connection, required by `fixed_window` limiters and the redis cache
    #[serde(default)]
    pub redis: Option<RedisConfig>,
    /// PostgreSQL connection, required by persistent buckets and the postgres store
    #[serde(default)]
    pub postgres: Option<PostgresConfig>,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,
    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// Internal error details are only rendered outside production
    #[serde(default)]
    pub environment: Environment,
}

/// Log output format
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Compact,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub format: LogFormat,
}

/// The two admission controllers applied to reads
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitingConfig {
    /// Keyed by client identity, shared across tenants
    #[serde(default = "default_global_limiter")]
    pub global: LimiterConfig,
    /// Keyed by tenant and resource
    #[serde(default = "default_resource_limiter")]
    pub resource: LimiterConfig,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            global: default_global_limiter(),
            resource: default_resource_limiter(),
        }
    }
}

/// Where resources are persisted
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    #[default]
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// Deadline for each store call in milliseconds
    #[serde(default = "default_store_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_timeout() -> u64 {
    30
}

fn default_global_limiter() -> LimiterConfig {
    LimiterConfig::new(100, 60)
}

fn default_resource_limiter() -> LimiterConfig {
    LimiterConfig::new(20, 10)
}

fn default_store_timeout_ms() -> u64 {
    2_000
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            timeout_secs: default_timeout(),
            environment: Environment::default(),
        }
    }
}

impl StoreConfig {
    pub fn timeout(&self) -> std::time::Duration {
        std::time::Duration::from_millis(self.timeout_ms.max(1))
    }
}

impl GatewayConfig {
    /// Load configuration from a YAML file, then apply `GATEWAY__*`
    /// environment overrides
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let settings = ::config::Config::builder()
            .add_source(
                ::config::File::from(path.as_ref()).format(::config::FileFormat::Yaml),
            )
            .add_source(
                ::config::Environment::with_prefix(ENV_PREFIX)
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .map_err(|e| GatewayError::Config(format!("Failed to read config file: {}", e)))?;

        settings
            .try_deserialize()
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Parse configuration from YAML string
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if HeaderName::try_from(self.tenant.header.as_str()).is_err() {
            return Err(GatewayError::Config(format!(
                "Invalid tenant header name: {}",
                self.tenant.header
            )));
        }
        if !is_valid_slug(&self.tenant.default_tenant) {
            return Err(GatewayError::Config(format!(
                "Default tenant '{}' is not a valid slug",
                self.tenant.default_tenant
            )));
        }

        for (name, limiter) in self.limiters() {
            if limiter.requests == 0 {
                return Err(GatewayError::Config(format!(
                    "{} rate limit requests must be > 0",
                    name
                )));
            }
            if limiter.window_secs == 0 {
                return Err(GatewayError::Config(format!(
                    "{} rate limit window must be > 0",
                    name
                )));
            }
            if limiter.timeout_ms == 0 {
                return Err(GatewayError::Config(format!(
                    "{} rate limit timeout must be > 0",
                    name
                )));
            }
        }

        if self.cache.ttl_secs == 0 {
            return Err(GatewayError::Config("Cache TTL must be > 0".to_string()));
        }
        if self.cache.max_capacity == 0 {
            return Err(GatewayError::Config(
                "Cache capacity must be > 0".to_string(),
            ));
        }
        if self.cache.timeout_ms == 0 {
            return Err(GatewayError::Config("Cache timeout must be > 0".to_string()));
        }

        if self.needs_redis() && self.redis.is_none() {
            return Err(GatewayError::Config(
                "A fixed_window limiter or redis cache requires a redis section".to_string(),
            ));
        }
        if self.needs_postgres() && self.postgres.is_none() {
            return Err(GatewayError::Config(
                "A persistent_token_bucket limiter or postgres store requires a postgres section"
                    .to_string(),
            ));
        }

        Ok(())
    }

    /// Whether internal error details may be sent to clients
    pub fn expose_error_detail(&self) -> bool {
        self.server.environment != Environment::Production
    }

    /// Address to bind
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    fn limiters(&self) -> [(&'static str, &LimiterConfig); 2] {
        [
            ("Global", &self.rate_limiting.global),
            ("Resource", &self.rate_limiting.resource),
        ]
    }

    /// Whether any component talks to Redis
    pub fn needs_redis(&self) -> bool {
        self.cache.backend == CacheBackend::Redis
            || self
                .limiters()
                .iter()
                .any(|(_, l)| l.strategy == LimiterStrategy::FixedWindow)
    }

    /// Whether any component talks to PostgreSQL
    pub fn needs_postgres(&self) -> bool {
        self.store.backend == StoreBackend::Postgres
            || self
                .limiters()
                .iter()
                .any(|(_, l)| l.strategy == LimiterStrategy::PersistentTokenBucket)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rate_limit::types::FailurePolicy;
    use crate::tenant::MissingTenantPolicy;
    use std::io::Write;

    #[test]
    fn test_parse_valid_config() {
        let yaml = r#"
server:
  host: "127.0.0.1"
  port: 8080
  timeout_secs: 30
  environment: production

logging:
  format: json

tenant:
  header: "X-Tenant"
  on_missing_read: reject

rate_limiting:
  global:
    requests: 500
    window_secs: 60
  resource:
    strategy: fixed_window
    requests: 20
    window_secs: 10
    failure_policy: open
    timeout_ms: 50

cache:
  backend: redis
  ttl_secs: 120
  single_flight: true

redis:
  url: "redis://127.0.0.1:6379"
"#;

        let config = GatewayConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.environment, Environment::Production);
        assert_eq!(config.logging.format, LogFormat::Json);
        assert_eq!(config.tenant.header, "X-Tenant");
        assert_eq!(config.tenant.on_missing_read, MissingTenantPolicy::Reject);
        assert_eq!(config.rate_limiting.global.requests, 500);
        assert_eq!(
            config.rate_limiting.resource.strategy,
            LimiterStrategy::FixedWindow
        );
        assert_eq!(
            config.rate_limiting.resource.failure_policy,
            FailurePolicy::Open
        );
        assert_eq!(config.cache.backend, CacheBackend::Redis);
        assert!(config.cache.single_flight);
        assert!(config.validate().is_ok());
        assert!(!config.expose_error_detail());
    }

    #[test]
    fn test_default_values() {
        let config = GatewayConfig::from_yaml("{}").unwrap();
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.timeout_secs, 30);
        assert_eq!(config.server.environment, Environment::Development);
        assert_eq!(config.tenant.default_tenant, "public");
        assert_eq!(config.rate_limiting.resource.requests, 20);
        assert_eq!(config.rate_limiting.resource.window_secs, 10);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert!(config.redis.is_none());
        assert!(config.validate().is_ok());
        assert!(config.expose_error_detail());
    }

    #[test]
    fn test_validate_zero_limits() {
        let mut config = GatewayConfig::default();
        config.rate_limiting.global.requests = 0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));

        let mut config = GatewayConfig::default();
        config.rate_limiting.resource.window_secs = 0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));

        let mut config = GatewayConfig::default();
        config.cache.ttl_secs = 0;
        assert!(matches!(config.validate(), Err(GatewayError::Config(_))));
    }

    #[test]
    fn test_validate_default_tenant() {
        let mut config = GatewayConfig::default();
        config.tenant.default_tenant = "no".to_string();
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.tenant.header = "bad header".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_backends() {
        let mut config = GatewayConfig::default();
        config.rate_limiting.global.strategy = LimiterStrategy::FixedWindow;
        assert!(config.needs_redis());
        assert!(config.validate().is_err());

        let mut config = GatewayConfig::default();
        config.store.backend = StoreBackend::Postgres;
        assert!(config.needs_postgres());
        assert!(config.validate().is_err());

        config.postgres = Some(PostgresConfig::default());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(
            file,
            "server:\n  port: 9191\nrate_limiting:\n  global:\n    requests: 7"
        )
        .unwrap();

        let config = GatewayConfig::from_file(file.path()).unwrap();
        assert_eq!(config.server.port, 9191);
        assert_eq!(config.rate_limiting.global.requests, 7);
        assert_eq!(config.bind_addr(), "0.0.0.0:9191");
    }

    #[test]
    fn test_environment_overrides_file() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "cache:\n  ttl_secs: 60").unwrap();

        std::env::set_var("GATEWAY__CACHE__MAX_CAPACITY", "42");
        let config = GatewayConfig::from_file(file.path());
        std::env::remove_var("GATEWAY__CACHE__MAX_CAPACITY");

        let config = config.unwrap();
        assert_eq!(config.cache.ttl_secs, 60);
        assert_eq!(config.cache.max_capacity, 42);
    }

    #[test]
    fn test_missing_file_is_config_error() {
        let result = GatewayConfig::from_file("/nonexistent/gateway.yaml");
        assert!(matches!(result, Err(GatewayError::Config(_))));
    }
}
