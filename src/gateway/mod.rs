//! HTTP surface of the gateway
//!
//! Reads run: key validation, tenant resolution, global admission,
//! resource admission, then the read-through cache. Writes run: body
//! validation, tenant resolution, global admission, the store write, then
//! cache invalidation before the response is sent.

pub mod handlers;

use crate::cache::CacheGateway;
use crate::error::GatewayError;
use crate::metrics::{metrics_handler, MetricsService};
use crate::observability::{request_id_middleware, request_span, track_metrics};
use crate::rate_limit::AdmissionService;
use crate::resource::{ResourceStore, MAX_BODY_BYTES};
use crate::tenant::TenantResolver;
use axum::{
    extract::{DefaultBodyLimit, FromRef},
    middleware,
    response::Response,
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

pub use handlers::{create_resource, get_resource, health, not_found, update_resource};

/// Shared state for request handlers
#[derive(Clone)]
pub struct GatewayState {
    pub resolver: Arc<TenantResolver>,
    /// Keyed by client identity
    pub global: Arc<AdmissionService>,
    /// Keyed by tenant and resource
    pub resource: Arc<AdmissionService>,
    pub cache: Arc<CacheGateway>,
    pub store: Arc<dyn ResourceStore>,
    pub metrics: MetricsService,
    /// Render internal error messages in response bodies
    pub expose_detail: bool,
}

impl GatewayState {
    /// Render an error the way this deployment is configured to
    pub fn reject(&self, err: GatewayError) -> Response {
        err.into_response_with_detail(self.expose_detail)
    }
}

impl FromRef<GatewayState> for MetricsService {
    fn from_ref(state: &GatewayState) -> Self {
        state.metrics.clone()
    }
}

/// Build the router with all routes and middleware
pub fn build_router(state: GatewayState, request_timeout: Duration) -> Router {
    Router::new()
        .route("/resource", post(create_resource))
        .route("/resource/:key", get(get_resource).put(update_resource))
        .route("/health", get(health))
        .route("/metrics", get(metrics_handler))
        .route_layer(middleware::from_fn(track_metrics))
        .fallback(not_found)
        // Bodies over MAX_BODY_BYTES are still read so they fail as invalid_payload
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES * 4))
        .layer(TimeoutLayer::new(request_timeout))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(TraceLayer::new_for_http().make_span_with(request_span))
        .with_state(state)
}
