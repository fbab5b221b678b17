//! Tenant-owned public resources and the store that owns them
//!
//! The gateway treats the [`ResourceStore`] as a black box: it only needs
//! `read`, `write` and `update`, each scoped by tenant. The business schema of
//! a resource is opaque beyond its `key` and `name`; any other fields travel
//! through as attributes.

pub mod memory;
pub mod postgres;

use crate::error::{GatewayError, Result};
use crate::tenant::{is_valid_slug, TenantContext};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use thiserror::Error;

pub use memory::MemoryResourceStore;
pub use postgres::PostgresResourceStore;

/// Maximum accepted request body size in bytes
pub const MAX_BODY_BYTES: usize = 16 * 1024;

/// Maximum length of a resource name
pub const MAX_NAME_LEN: usize = 200;

/// Maximum number of free-form attributes on a resource
pub const MAX_ATTRIBUTES: usize = 32;

/// Validated resource slug, lowercase
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ResourceKey(String);

impl ResourceKey {
    /// Validate and normalize a raw key
    pub fn parse(raw: &str) -> Result<Self> {
        if !is_valid_slug(raw) {
            return Err(GatewayError::InvalidKey(truncate(raw, 80)));
        }
        Ok(Self(raw.to_ascii_lowercase()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

fn truncate(value: &str, max: usize) -> String {
    value.chars().take(max).collect()
}

/// A resource as returned to clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub key: String,
    pub name: String,
    #[serde(flatten)]
    pub attributes: Map<String, Value>,
}

/// A validated create or replace request
#[derive(Debug, Clone, PartialEq)]
pub struct NewResource {
    pub key: ResourceKey,
    pub name: String,
    pub attributes: Map<String, Value>,
}

#[derive(Debug, Deserialize)]
struct ResourceBody {
    #[serde(default)]
    key: Option<String>,
    name: Option<String>,
    #[serde(flatten)]
    attributes: Map<String, Value>,
}

impl NewResource {
    /// Validate a create body; `key` is required.
    pub fn from_create_body(body: &[u8]) -> Result<Self> {
        let parsed = parse_body(body)?;
        let key = parsed
            .key
            .as_deref()
            .ok_or_else(|| GatewayError::InvalidPayload("missing field `key`".to_string()))?;
        let key = ResourceKey::parse(key)?;
        Self::validated(key, parsed)
    }

    /// Validate a replace body for `key`; a `key` in the body must match.
    pub fn from_update_body(key: ResourceKey, body: &[u8]) -> Result<Self> {
        let parsed = parse_body(body)?;
        if let Some(body_key) = parsed.key.as_deref() {
            if ResourceKey::parse(body_key)? != key {
                return Err(GatewayError::InvalidPayload(
                    "body key does not match path key".to_string(),
                ));
            }
        }
        Self::validated(key, parsed)
    }

    fn validated(key: ResourceKey, body: ResourceBody) -> Result<Self> {
        let name = body
            .name
            .as_deref()
            .map(str::trim)
            .ok_or_else(|| GatewayError::InvalidPayload("missing field `name`".to_string()))?;

        if name.is_empty() || name.chars().count() > MAX_NAME_LEN {
            return Err(GatewayError::InvalidPayload(format!(
                "`name` must be 1-{} characters",
                MAX_NAME_LEN
            )));
        }

        if body.attributes.len() > MAX_ATTRIBUTES {
            return Err(GatewayError::InvalidPayload(format!(
                "at most {} attributes are allowed",
                MAX_ATTRIBUTES
            )));
        }

        Ok(Self {
            key,
            name: name.to_string(),
            attributes: body.attributes,
        })
    }

    /// The resource this request stores
    pub fn to_resource(&self) -> Resource {
        Resource {
            key: self.key.as_str().to_string(),
            name: self.name.clone(),
            attributes: self.attributes.clone(),
        }
    }
}

fn parse_body(body: &[u8]) -> Result<ResourceBody> {
    if body.len() > MAX_BODY_BYTES {
        return Err(GatewayError::InvalidPayload(format!(
            "body exceeds {} bytes",
            MAX_BODY_BYTES
        )));
    }

    serde_json::from_slice::<ResourceBody>(body)
        .map_err(|e| GatewayError::InvalidPayload(format!("malformed JSON body: {}", e)))
}

/// Errors reported by a resource store
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("resource not found")]
    NotFound,

    #[error("resource '{0}' already exists")]
    Conflict(String),

    #[error("resource store unavailable: {0}")]
    Unavailable(String),
}

impl From<StoreError> for GatewayError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound => GatewayError::NotFound,
            StoreError::Conflict(key) => GatewayError::Conflict(key),
            StoreError::Unavailable(msg) => GatewayError::Unavailable(msg),
        }
    }
}

/// Durable source of truth for tenant resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Read a resource owned by `tenant`
    async fn read(
        &self,
        tenant: &TenantContext,
        key: &ResourceKey,
    ) -> std::result::Result<Resource, StoreError>;

    /// Create a resource; fails with [`StoreError::Conflict`] if the key is taken
    async fn write(
        &self,
        tenant: &TenantContext,
        data: NewResource,
    ) -> std::result::Result<Resource, StoreError>;

    /// Replace an existing resource; fails with [`StoreError::NotFound`] if absent
    async fn update(
        &self,
        tenant: &TenantContext,
        data: NewResource,
    ) -> std::result::Result<Resource, StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resource_key_normalizes_case() {
        let key = ResourceKey::parse("Cortes-Premium").unwrap();
        assert_eq!(key.as_str(), "cortes-premium");
    }

    #[test]
    fn test_resource_key_rejects_malformed() {
        let err = ResourceKey::parse("AB!").unwrap_err();
        assert_eq!(err.code(), "invalid_key");
        assert!(ResourceKey::parse("").is_err());
        assert!(ResourceKey::parse(&"x".repeat(500)).is_err());
    }

    #[test]
    fn test_create_body_with_attributes() {
        let body = br#"{"key":"new-shop","name":"  New Shop ","city":"Lisbon","seats":4}"#;
        let resource = NewResource::from_create_body(body).unwrap();

        assert_eq!(resource.key.as_str(), "new-shop");
        assert_eq!(resource.name, "New Shop");
        assert_eq!(resource.attributes.len(), 2);
        assert_eq!(resource.attributes["city"], "Lisbon");
    }

    #[test]
    fn test_create_body_requires_key_and_name() {
        let err = NewResource::from_create_body(br#"{"name":"Shop"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_payload");

        let err = NewResource::from_create_body(br#"{"key":"shop-one"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_payload");

        let err = NewResource::from_create_body(br#"{"key":"shop-one","name":"   "}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[test]
    fn test_create_body_malformed_key() {
        let err = NewResource::from_create_body(br#"{"key":"no good","name":"Shop"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_key");
    }

    #[test]
    fn test_create_body_rejects_garbage() {
        assert!(NewResource::from_create_body(b"not json").is_err());
        assert!(NewResource::from_create_body(b"[1,2,3]").is_err());

        let huge = format!(
            r#"{{"key":"shop-one","name":"Shop","blob":"{}"}}"#,
            "a".repeat(MAX_BODY_BYTES)
        );
        assert!(NewResource::from_create_body(huge.as_bytes()).is_err());
    }

    #[test]
    fn test_create_body_attribute_limit() {
        let mut body = Map::new();
        body.insert("key".into(), Value::from("shop-one"));
        body.insert("name".into(), Value::from("Shop"));
        for i in 0..=MAX_ATTRIBUTES {
            body.insert(format!("attr{}", i), Value::from(i));
        }
        let bytes = serde_json::to_vec(&body).unwrap();

        assert!(NewResource::from_create_body(&bytes).is_err());
    }

    #[test]
    fn test_update_body_key_must_match() {
        let key = ResourceKey::parse("shop-one").unwrap();

        assert!(NewResource::from_update_body(key.clone(), br#"{"name":"Renamed"}"#).is_ok());
        assert!(
            NewResource::from_update_body(key.clone(), br#"{"key":"SHOP-ONE","name":"R"}"#)
                .is_ok()
        );

        let err =
            NewResource::from_update_body(key, br#"{"key":"shop-two","name":"R"}"#).unwrap_err();
        assert_eq!(err.code(), "invalid_payload");
    }

    #[test]
    fn test_resource_serializes_flat() {
        let resource = NewResource::from_create_body(br#"{"key":"shop-one","name":"Shop","city":"Porto"}"#)
            .unwrap()
            .to_resource();
        let value = serde_json::to_value(&resource).unwrap();

        assert_eq!(
            value,
            serde_json::json!({"key": "shop-one", "name": "Shop", "city": "Porto"})
        );
    }

    #[test]
    fn test_store_error_mapping() {
        assert!(matches!(
            GatewayError::from(StoreError::NotFound),
            GatewayError::NotFound
        ));
        assert_eq!(
            GatewayError::from(StoreError::Conflict("x".into())).code(),
            "conflict"
        );
        assert_eq!(
            GatewayError::from(StoreError::Unavailable("down".into())).code(),
            "unavailable"
        );
    }
}
