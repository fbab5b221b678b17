pub mod backends;
pub mod cache;
pub mod config;
pub mod error;
pub mod gateway;
pub mod metrics;
pub mod observability;
pub mod rate_limit;
pub mod resource;
pub mod tenant;

use crate::backends::SharedBackends;
use crate::cache::CacheGateway;
use crate::config::{GatewayConfig, StoreBackend};
use crate::error::{GatewayError, Result};
use crate::gateway::{build_router, GatewayState};
use crate::metrics::MetricsService;
use crate::rate_limit::{AdmissionScope, AdmissionService};
use crate::resource::{MemoryResourceStore, PostgresResourceStore, ResourceStore};
use crate::tenant::TenantResolver;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{debug, info};

/// How often idle limiter state is dropped
const PRUNE_INTERVAL: Duration = Duration::from_secs(60);

/// Open the Redis and PostgreSQL connections the configuration asks for
pub async fn connect_backends(config: &GatewayConfig) -> Result<SharedBackends> {
    let mut backends = SharedBackends::new();

    if config.needs_redis() {
        let redis = config.redis.as_ref().ok_or_else(|| {
            GatewayError::Config("redis section is required".to_string())
        })?;
        let connection = redis.connect().await?;
        backends = backends.with_redis(connection, &redis.prefix);
    }

    if config.needs_postgres() {
        let postgres = config.postgres.as_ref().ok_or_else(|| {
            GatewayError::Config("postgres section is required".to_string())
        })?;
        backends = backends.with_postgres(postgres.create_pool()?, postgres.migrate);
    }

    Ok(backends)
}

/// Build the resource store selected by `config.store.backend`
pub async fn build_store(
    config: &GatewayConfig,
    backends: &SharedBackends,
) -> Result<Arc<dyn ResourceStore>> {
    match config.store.backend {
        StoreBackend::Memory => {
            info!("Using in-memory resource store");
            Ok(Arc::new(MemoryResourceStore::new()))
        }
        StoreBackend::Postgres => {
            let pool = backends.postgres().ok_or_else(|| {
                GatewayError::Config("postgres store requires a postgres section".to_string())
            })?;
            let store = PostgresResourceStore::new(pool, config.store.timeout());
            if backends.migrate() {
                store.migrate().await?;
            }
            info!("Using PostgreSQL resource store");
            Ok(Arc::new(store))
        }
    }
}

/// Assemble handler state from configuration and open connections
pub async fn build_state(
    config: &GatewayConfig,
    backends: &SharedBackends,
    metrics: MetricsService,
) -> Result<GatewayState> {
    let resolver = TenantResolver::new(&config.tenant)?;
    let global = AdmissionService::from_config(
        AdmissionScope::Global,
        &config.rate_limiting.global,
        backends,
    )
    .await?;
    let resource = AdmissionService::from_config(
        AdmissionScope::Resource,
        &config.rate_limiting.resource,
        backends,
    )
    .await?;
    let cache = CacheGateway::from_config(&config.cache, backends)?;
    let store = build_store(config, backends).await?;

    Ok(GatewayState {
        resolver: Arc::new(resolver),
        global: Arc::new(global),
        resource: Arc::new(resource),
        cache: Arc::new(cache),
        store,
        metrics,
        expose_detail: config.expose_error_detail(),
    })
}

/// Periodically drop idle limiter state
pub fn spawn_pruner(limiters: Vec<Arc<AdmissionService>>, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = interval(period);

        loop {
            ticker.tick().await;
            let mut removed = 0;
            for limiter in &limiters {
                removed += limiter.prune().await;
            }
            debug!(removed, "Limiter prune pass complete");
        }
    });
}

/// Initialize the gateway server
pub async fn init_gateway(config: GatewayConfig) -> Result<()> {
    config.validate()?;

    info!("Starting tenant gateway");

    let metrics = MetricsService::new()?;
    let backends = connect_backends(&config).await?;
    let state = build_state(&config, &backends, metrics).await?;

    spawn_pruner(
        vec![state.global.clone(), state.resource.clone()],
        PRUNE_INTERVAL,
    );

    let app = build_router(state, Duration::from_secs(config.server.timeout_secs));

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(GatewayError::Io)?;

    info!("Gateway listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await
    .map_err(|e| GatewayError::Internal(format!("Server error: {}", e)))?;

    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}
