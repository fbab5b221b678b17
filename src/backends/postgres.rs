use crate::error::{GatewayError, Result};
use deadpool_postgres::{Config, ManagerConfig, Pool, RecyclingMethod, Runtime};
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tokio_postgres::NoTls;
use tracing::info;

/// PostgreSQL connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct PostgresConfig {
    /// PostgreSQL host
    #[serde(default = "default_host")]
    pub host: String,
    /// PostgreSQL port
    #[serde(default = "default_port")]
    pub port: u16,
    /// Database name
    #[serde(default = "default_dbname")]
    pub dbname: String,
    /// Database user
    #[serde(default = "default_user")]
    pub user: String,
    /// Database password
    #[serde(default = "default_password")]
    pub password: SecretString,
    /// Maximum pool size
    #[serde(default = "default_max_size")]
    pub max_size: usize,
    /// Create the gateway tables on startup if they are missing
    #[serde(default)]
    pub migrate: bool,
}

fn default_host() -> String {
    "localhost".to_string()
}

fn default_port() -> u16 {
    5432
}

fn default_dbname() -> String {
    "gateway".to_string()
}

fn default_user() -> String {
    "postgres".to_string()
}

fn default_password() -> SecretString {
    SecretString::new(String::new())
}

fn default_max_size() -> usize {
    16
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            dbname: default_dbname(),
            user: default_user(),
            password: default_password(),
            max_size: default_max_size(),
            migrate: false,
        }
    }
}

impl PostgresConfig {
    /// Create a connection pool from this configuration.
    ///
    /// Connections are established lazily on first use.
    pub fn create_pool(&self) -> Result<Pool> {
        let mut cfg = Config::new();
        cfg.host = Some(self.host.clone());
        cfg.port = Some(self.port);
        cfg.dbname = Some(self.dbname.clone());
        cfg.user = Some(self.user.clone());
        cfg.password = Some(self.password.expose_secret().clone());
        cfg.pool = Some(deadpool_postgres::PoolConfig::new(self.max_size));

        cfg.manager = Some(ManagerConfig {
            recycling_method: RecyclingMethod::Fast,
        });

        let pool = cfg
            .create_pool(Some(Runtime::Tokio1), NoTls)
            .map_err(|e| GatewayError::Config(format!("Failed to create Postgres pool: {}", e)))?;

        info!(
            host = %self.host,
            port = self.port,
            dbname = %self.dbname,
            max_size = self.max_size,
            "Created Postgres connection pool"
        );

        Ok(pool)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_postgres_defaults() {
        let config: PostgresConfig = serde_yaml::from_str("{}").unwrap();
        assert_eq!(config.host, "localhost");
        assert_eq!(config.port, 5432);
        assert_eq!(config.max_size, 16);
        assert!(!config.migrate);
    }

    #[tokio::test]
    async fn test_pool_is_created_lazily() {
        let config = PostgresConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            ..Default::default()
        };

        let pool = config.create_pool().unwrap();
        assert_eq!(pool.status().size, 0);
    }
}
