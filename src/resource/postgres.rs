use super::{NewResource, Resource, ResourceKey, ResourceStore, StoreError};
use crate::backends::bounded;
use crate::tenant::TenantContext;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use serde_json::Value;
use std::time::Duration;
use tokio_postgres::Row;
use tracing::{error, info};

const CREATE_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS gateway_resources (
    tenant_id    TEXT        NOT NULL,
    resource_key TEXT        NOT NULL,
    name         TEXT        NOT NULL,
    attributes   JSONB       NOT NULL DEFAULT '{}'::jsonb,
    updated_at   TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (tenant_id, resource_key)
)"#;

const SELECT_RESOURCE: &str = "SELECT resource_key, name, attributes FROM gateway_resources \
     WHERE tenant_id = $1 AND resource_key = $2";

// The primary key makes the insert itself the uniqueness check; no row back
// means the key is already taken for this tenant.
const INSERT_RESOURCE: &str = "INSERT INTO gateway_resources (tenant_id, resource_key, name, attributes) \
     VALUES ($1, $2, $3, $4) \
     ON CONFLICT (tenant_id, resource_key) DO NOTHING \
     RETURNING resource_key, name, attributes";

const UPDATE_RESOURCE: &str = "UPDATE gateway_resources \
     SET name = $3, attributes = $4, updated_at = now() \
     WHERE tenant_id = $1 AND resource_key = $2 \
     RETURNING resource_key, name, attributes";

/// PostgreSQL-backed resource store
pub struct PostgresResourceStore {
    pool: Pool,
    timeout: Duration,
}

impl PostgresResourceStore {
    pub fn new(pool: Pool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Create the resources table if it does not exist
    pub async fn migrate(&self) -> Result<(), StoreError> {
        let client = self.client().await?;
        bounded(self.timeout, "create resources table", client.batch_execute(CREATE_TABLE))
            .await
            .map_err(StoreError::Unavailable)?;
        info!("Ensured gateway_resources table exists");
        Ok(())
    }

    async fn client(&self) -> Result<deadpool_postgres::Object, StoreError> {
        bounded(self.timeout, "acquire connection", self.pool.get())
            .await
            .map_err(|e| {
                error!("Resource store connection failed: {}", e);
                StoreError::Unavailable(e)
            })
    }
}

fn row_to_resource(row: &Row) -> Resource {
    let attributes = match row.get::<_, Value>(2) {
        Value::Object(map) => map,
        _ => Default::default(),
    };

    Resource {
        key: row.get(0),
        name: row.get(1),
        attributes,
    }
}

#[async_trait]
impl ResourceStore for PostgresResourceStore {
    async fn read(
        &self,
        tenant: &TenantContext,
        key: &ResourceKey,
    ) -> Result<Resource, StoreError> {
        let client = self.client().await?;
        let row = bounded(
            self.timeout,
            "read resource",
            client.query_opt(SELECT_RESOURCE, &[&tenant.tenant_id(), &key.as_str()]),
        )
        .await
        .map_err(StoreError::Unavailable)?;

        row.as_ref().map(row_to_resource).ok_or(StoreError::NotFound)
    }

    async fn write(
        &self,
        tenant: &TenantContext,
        data: NewResource,
    ) -> Result<Resource, StoreError> {
        let client = self.client().await?;
        let attributes = Value::Object(data.attributes.clone());
        let row = bounded(
            self.timeout,
            "insert resource",
            client.query_opt(
                INSERT_RESOURCE,
                &[&tenant.tenant_id(), &data.key.as_str(), &data.name, &attributes],
            ),
        )
        .await
        .map_err(StoreError::Unavailable)?;

        row.as_ref()
            .map(row_to_resource)
            .ok_or_else(|| StoreError::Conflict(data.key.to_string()))
    }

    async fn update(
        &self,
        tenant: &TenantContext,
        data: NewResource,
    ) -> Result<Resource, StoreError> {
        let client = self.client().await?;
        let attributes = Value::Object(data.attributes.clone());
        let row = bounded(
            self.timeout,
            "update resource",
            client.query_opt(
                UPDATE_RESOURCE,
                &[&tenant.tenant_id(), &data.key.as_str(), &data.name, &attributes],
            ),
        )
        .await
        .map_err(StoreError::Unavailable)?;

        row.as_ref().map(row_to_resource).ok_or(StoreError::NotFound)
    }
}
