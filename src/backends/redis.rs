use crate::error::{GatewayError, Result};
use redis::aio::ConnectionManager;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::info;

/// Redis connection settings
#[derive(Debug, Clone, Deserialize)]
pub struct RedisConfig {
    /// Redis connection URL (may carry credentials)
    pub url: SecretString,
    /// Prefix applied to every key the gateway writes
    #[serde(default = "default_prefix")]
    pub prefix: String,
}

fn default_prefix() -> String {
    "gateway".to_string()
}

impl RedisConfig {
    /// Open a managed, automatically reconnecting connection.
    pub async fn connect(&self) -> Result<ConnectionManager> {
        let client = redis::Client::open(self.url.expose_secret().as_str())
            .map_err(|e| GatewayError::Config(format!("Invalid Redis URL: {}", e)))?;

        let mut connection = ConnectionManager::new(client)
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Redis connection failed: {}", e)))?;

        ping(&mut connection)
            .await
            .map_err(|e| GatewayError::Unavailable(format!("Redis PING failed: {}", e)))?;

        info!(prefix = %self.prefix, "Connected to Redis");

        Ok(connection)
    }
}

async fn ping(connection: &mut ConnectionManager) -> std::result::Result<(), redis::RedisError> {
    redis::cmd("PING").query_async(connection).await
}
