use crate::resource::ResourceKey;
use crate::tenant::TenantContext;
use std::fmt;

/// Cache key for a tenant-owned resource
///
/// Only constructible from a resolved tenant, so two tenants can never share
/// an entry.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct CacheKey {
    tenant: String,
    key: String,
}

impl CacheKey {
    pub fn new(tenant: &TenantContext, key: &ResourceKey) -> Self {
        Self {
            tenant: tenant.tenant_id().to_string(),
            key: key.as_str().to_string(),
        }
    }

    pub fn tenant(&self) -> &str {
        &self.tenant
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Key used in the backing store
    pub fn to_store_key(&self) -> String {
        format!("cache:{}:{}", self.tenant, self.key)
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.tenant, self.key)
    }
}
