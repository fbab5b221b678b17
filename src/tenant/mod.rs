//! Tenant resolution
//!
//! Every request is bound to a [`TenantContext`] before it reaches the
//! admission controllers, the cache, or the resource store. Resolution is a
//! pure function of the request headers.
//!
//! What happens when the tenant header is missing or malformed is decided by
//! a [`MissingTenantPolicy`], configured separately for reads and writes.

use crate::error::{GatewayError, Result};
use axum::http::HeaderMap;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::debug;

/// Pattern shared by tenant identifiers and resource slugs
static SLUG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^(?i)[a-z0-9-]{3,64}$").expect("slug pattern is valid"));

/// Check whether a value is a well-formed slug (case-insensitive)
pub fn is_valid_slug(value: &str) -> bool {
    SLUG_PATTERN.is_match(value)
}

/// What to do when the tenant header is absent or malformed
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MissingTenantPolicy {
    /// Fall back to the default sentinel tenant
    Default,
    /// Reject the request with a validation error
    Reject,
}

/// Whether the request reads or mutates tenant data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessKind {
    Read,
    Write,
}

/// Resolved tenant for a single request
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TenantContext {
    tenant_id: String,
    is_default: bool,
}

impl TenantContext {
    /// Build a context from a raw identifier, validating and lowercasing it
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if !is_valid_slug(trimmed) {
            return None;
        }

        Some(Self {
            tenant_id: trimmed.to_ascii_lowercase(),
            is_default: false,
        })
    }

    fn sentinel(tenant_id: &str) -> Self {
        Self {
            tenant_id: tenant_id.to_string(),
            is_default: true,
        }
    }

    /// The normalized tenant identifier
    pub fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    /// True when the request was bound to the default sentinel tenant
    pub fn is_default(&self) -> bool {
        self.is_default
    }
}

impl fmt::Display for TenantContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tenant_id)
    }
}

/// Tenant resolution settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TenantConfig {
    /// Header carrying the tenant identifier
    #[serde(default = "default_header")]
    pub header: String,
    /// Sentinel tenant used when the header cannot be used
    #[serde(default = "default_tenant")]
    pub default_tenant: String,
    /// Policy for reads with a missing or malformed header
    #[serde(default = "default_read_policy")]
    pub on_missing_read: MissingTenantPolicy,
    /// Policy for writes with a missing or malformed header
    #[serde(default = "default_write_policy")]
    pub on_missing_write: MissingTenantPolicy,
}

fn default_header() -> String {
    "X-Tenant-Id".to_string()
}

fn default_tenant() -> String {
    "public".to_string()
}

fn default_read_policy() -> MissingTenantPolicy {
    MissingTenantPolicy::Default
}

fn default_write_policy() -> MissingTenantPolicy {
    MissingTenantPolicy::Reject
}

impl Default for TenantConfig {
    fn default() -> Self {
        Self {
            header: default_header(),
            default_tenant: default_tenant(),
            on_missing_read: default_read_policy(),
            on_missing_write: default_write_policy(),
        }
    }
}

/// Resolves the tenant for each request from its headers
#[derive(Debug, Clone)]
pub struct TenantResolver {
    header: String,
    default: TenantContext,
    on_missing_read: MissingTenantPolicy,
    on_missing_write: MissingTenantPolicy,
}

impl TenantResolver {
    /// Create a resolver, validating the configured sentinel
    pub fn new(config: &TenantConfig) -> Result<Self> {
        let default = TenantContext::parse(&config.default_tenant).ok_or_else(|| {
            GatewayError::Config(format!(
                "Default tenant '{}' is not a valid tenant identifier",
                config.default_tenant
            ))
        })?;

        Ok(Self {
            header: config.header.clone(),
            default: TenantContext::sentinel(default.tenant_id()),
            on_missing_read: config.on_missing_read,
            on_missing_write: config.on_missing_write,
        })
    }

    /// Resolve the tenant for a request.
    ///
    /// Only fails when the policy for `access` is [`MissingTenantPolicy::Reject`].
    pub fn resolve(&self, headers: &HeaderMap, access: AccessKind) -> Result<TenantContext> {
        let raw = headers.get(&self.header).and_then(|v| v.to_str().ok());

        if let Some(tenant) = raw.and_then(TenantContext::parse) {
            return Ok(tenant);
        }

        let policy = match access {
            AccessKind::Read => self.on_missing_read,
            AccessKind::Write => self.on_missing_write,
        };

        match policy {
            MissingTenantPolicy::Default => {
                debug!(
                    header = %self.header,
                    present = raw.is_some(),
                    tenant = %self.default,
                    "Tenant header unusable, using default tenant"
                );
                Ok(self.default.clone())
            }
            MissingTenantPolicy::Reject => Err(GatewayError::InvalidPayload(format!(
                "missing or malformed {} header",
                self.header
            ))),
        }
    }

    /// The default sentinel tenant
    pub fn default_tenant(&self) -> &TenantContext {
        &self.default
    }
}
