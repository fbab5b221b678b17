use super::{NewResource, Resource, ResourceKey, ResourceStore, StoreError};
use crate::tenant::TenantContext;
use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

/// In-process resource store
///
/// Suitable for tests and single-instance demo deployments. Entries are keyed
/// by `(tenant, key)` so tenants never observe each other's resources.
#[derive(Debug, Default)]
pub struct MemoryResourceStore {
    resources: DashMap<(String, String), Resource>,
}

impl MemoryResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored resources across all tenants
    pub fn len(&self) -> usize {
        self.resources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resources.is_empty()
    }

    fn slot(tenant: &TenantContext, key: &ResourceKey) -> (String, String) {
        (tenant.tenant_id().to_string(), key.as_str().to_string())
    }
}

#[async_trait]
impl ResourceStore for MemoryResourceStore {
    async fn read(
        &self,
        tenant: &TenantContext,
        key: &ResourceKey,
    ) -> Result<Resource, StoreError> {
        self.resources
            .get(&Self::slot(tenant, key))
            .map(|entry| entry.value().clone())
            .ok_or(StoreError::NotFound)
    }

    async fn write(
        &self,
        tenant: &TenantContext,
        data: NewResource,
    ) -> Result<Resource, StoreError> {
        match self.resources.entry(Self::slot(tenant, &data.key)) {
            Entry::Occupied(_) => Err(StoreError::Conflict(data.key.to_string())),
            Entry::Vacant(slot) => {
                let resource = data.to_resource();
                slot.insert(resource.clone());
                debug!(tenant = %tenant, key = %data.key, "Stored resource");
                Ok(resource)
            }
        }
    }

    async fn update(
        &self,
        tenant: &TenantContext,
        data: NewResource,
    ) -> Result<Resource, StoreError> {
        match self.resources.get_mut(&Self::slot(tenant, &data.key)) {
            Some(mut entry) => {
                let resource = data.to_resource();
                *entry = resource.clone();
                Ok(resource)
            }
            None => Err(StoreError::NotFound),
        }
    }
}
