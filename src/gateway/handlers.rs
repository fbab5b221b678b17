use super::GatewayState;
use crate::cache::{CacheKey, CacheSource};
use crate::error::{GatewayError, Result};
use crate::metrics;
use crate::rate_limit::{add_rate_limit_headers, client_identity, AdmissionKey, Decision};
use crate::resource::{NewResource, Resource, ResourceKey, StoreError};
use crate::tenant::{AccessKind, TenantContext};
use axum::{
    body::Body,
    extract::{rejection::BytesRejection, ConnectInfo, Path, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use bytes::Bytes;
use serde_json::json;
use std::net::SocketAddr;
use tracing::{debug, info};

pub const CACHE_STATUS_HEADER: &str = "x-cache";

/// `GET /resource/:key`
pub async fn get_resource(
    State(state): State<GatewayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Path(raw_key): Path<String>,
    headers: HeaderMap,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    match read_resource(&state, peer, &raw_key, &headers).await {
        Ok(response) => response,
        Err(e) => state.reject(e),
    }
}

async fn read_resource(
    state: &GatewayState,
    peer: Option<SocketAddr>,
    raw_key: &str,
    headers: &HeaderMap,
) -> Result<Response> {
    // Nothing downstream runs for a malformed key
    let key = ResourceKey::parse(raw_key)?;
    let tenant = state.resolver.resolve(headers, AccessKind::Read)?;

    let client = client_identity(headers, peer);
    state.global.admit(&AdmissionKey::global(&client), 1).await?;
    let decision = state
        .resource
        .admit(&AdmissionKey::resource(&tenant, &key), 1)
        .await?;

    let cache_key = CacheKey::new(&tenant, &key);
    let store = state.store.clone();
    let (tenant_ref, key_ref) = (&tenant, &key);
    let (body, source) = state
        .cache
        .get(&cache_key, move || async move {
            let resource = store.read(tenant_ref, key_ref).await;
            record_store("read", &resource);
            encode(&resource?)
        })
        .await?;

    debug!(
        tenant = %tenant,
        key = %key,
        cache = source.header_value(),
        "Served resource"
    );

    Ok(resource_response(body, source, &decision))
}

/// `POST /resource`
pub async fn create_resource(
    State(state): State<GatewayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let result = match read_body(body).and_then(|b| NewResource::from_create_body(&b)) {
        Ok(data) => write_resource(&state, peer, &headers, data, WriteKind::Create).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => response,
        Err(e) => state.reject(e),
    }
}

/// `PUT /resource/:key`
pub async fn update_resource(
    State(state): State<GatewayState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    Path(raw_key): Path<String>,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let peer = connect_info.map(|ConnectInfo(addr)| addr);
    let parsed = ResourceKey::parse(&raw_key)
        .and_then(|key| read_body(body).and_then(|b| NewResource::from_update_body(key, &b)));

    let result = match parsed {
        Ok(data) => write_resource(&state, peer, &headers, data, WriteKind::Update).await,
        Err(e) => Err(e),
    };

    match result {
        Ok(response) => response,
        Err(e) => state.reject(e),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteKind {
    Create,
    Update,
}

async fn write_resource(
    state: &GatewayState,
    peer: Option<SocketAddr>,
    headers: &HeaderMap,
    data: NewResource,
    kind: WriteKind,
) -> Result<Response> {
    let tenant = state.resolver.resolve(headers, AccessKind::Write)?;

    let client = client_identity(headers, peer);
    let decision = state.global.admit(&AdmissionKey::global(&client), 1).await?;

    let key = data.key.clone();
    let (operation, status) = match kind {
        WriteKind::Create => ("write", StatusCode::CREATED),
        WriteKind::Update => ("update", StatusCode::OK),
    };

    let stored = match kind {
        WriteKind::Create => state.store.write(&tenant, data).await,
        WriteKind::Update => state.store.update(&tenant, data).await,
    };
    record_store(operation, &stored);
    stored?;

    // Acknowledge only after the stale entry is gone
    state.cache.invalidate(&CacheKey::new(&tenant, &key)).await?;

    info!(tenant = %tenant, key = %key, operation, "Resource stored");

    let response = (status, Json(write_receipt(&tenant, &key))).into_response();
    Ok(add_rate_limit_headers(response, &decision))
}

/// `GET /health`
pub async fn health() -> impl IntoResponse {
    Json(json!({ "status": "ok" }))
}

/// Fallback for unknown routes
pub async fn not_found() -> Response {
    GatewayError::NotFound.into_response()
}

fn read_body(body: std::result::Result<Bytes, BytesRejection>) -> Result<Bytes> {
    body.map_err(|e| GatewayError::InvalidPayload(format!("unreadable body: {}", e)))
}

fn encode(resource: &Resource) -> std::result::Result<Bytes, GatewayError> {
    serde_json::to_vec(resource)
        .map(Bytes::from)
        .map_err(|e| GatewayError::Internal(format!("failed to encode resource: {}", e)))
}

fn write_receipt(tenant: &TenantContext, key: &ResourceKey) -> serde_json::Value {
    json!({ "tenant": tenant.tenant_id(), "key": key.as_str() })
}

fn record_store<T>(operation: &'static str, result: &std::result::Result<T, StoreError>) {
    let outcome = match result {
        Ok(_) => "ok",
        Err(StoreError::NotFound) => "not_found",
        Err(StoreError::Conflict(_)) => "conflict",
        Err(StoreError::Unavailable(_)) => "unavailable",
    };
    metrics::record_store_operation(operation, outcome);
}

fn resource_response(body: Bytes, source: CacheSource, decision: &Decision) -> Response {
    let mut response = Response::new(Body::from(body));
    let headers = response.headers_mut();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/json"),
    );
    headers.insert(
        CACHE_STATUS_HEADER,
        HeaderValue::from_static(source.header_value()),
    );
    add_rate_limit_headers(response, decision)
}
