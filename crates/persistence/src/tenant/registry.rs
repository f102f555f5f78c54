//! Tenant registry in the shared schema.

use async_trait::async_trait;
use deadpool_postgres::Pool;
use tracing::{debug, info};

use super::model::{NewTenant, TENANT_COLUMNS, Tenant};
use super::schema_name::SchemaName;
use super::sequence::SequenceAllocator;
use crate::error::{StorageError, StorageResult, TenantError, unique_violation};
use crate::postgres::PostgresBackend;
use crate::postgres::schema::{SCHEMA_NAME_KEY, SUBDOMAIN_KEY, TENANT_CODE_KEY};
use crate::sql::{self, Table};

/// Lookup seam used by request-facing tenant resolution.
#[async_trait]
pub trait TenantDirectory: Send + Sync {
    /// Returns the tenant answering on `subdomain`, active or not.
    async fn find_by_subdomain(&self, subdomain: &str) -> StorageResult<Option<Tenant>>;
}

/// CRUD over the `tenants` table.
///
/// Every query runs against the shared schema with fully qualified names,
/// independent of any connection's search path.
#[derive(Debug, Clone)]
pub struct TenantRegistry {
    backend: PostgresBackend,
    table: String,
    sequences: SequenceAllocator,
}

impl TenantRegistry {
    /// Creates a registry over the backend's shared schema.
    pub fn new(backend: PostgresBackend) -> Self {
        let table = sql::qualified(backend.public_schema(), Table::Tenants);
        let sequences = SequenceAllocator::new(backend.pool().clone(), &table);
        Self {
            backend,
            table,
            sequences,
        }
    }

    /// The backend this registry queries.
    pub fn backend(&self) -> &PostgresBackend {
        &self.backend
    }

    fn pool(&self) -> &Pool {
        self.backend.pool()
    }

    /// The counter allocator for this registry.
    pub fn sequences(&self) -> &SequenceAllocator {
        &self.sequences
    }

    async fn fetch_one(
        &self,
        predicate: &str,
        key: &(dyn tokio_postgres::types::ToSql + Sync),
    ) -> StorageResult<Option<Tenant>> {
        let client = self.pool().get().await?;
        let query = format!(
            "SELECT {} FROM {} WHERE {}",
            TENANT_COLUMNS, self.table, predicate
        );
        client
            .query_opt(query.as_str(), &[key])
            .await?
            .as_ref()
            .map(Tenant::from_row)
            .transpose()
    }

    /// Active tenant by exact subdomain. Inactive tenants are reported as not found.
    pub async fn get_by_subdomain(&self, subdomain: &str) -> StorageResult<Tenant> {
        self.fetch_one("subdomain = $1 AND is_active", &subdomain)
            .await?
            .ok_or_else(|| not_found(subdomain))
    }

    /// Tenant by exact subdomain, including inactive ones.
    pub async fn find_by_subdomain(&self, subdomain: &str) -> StorageResult<Option<Tenant>> {
        self.fetch_one("subdomain = $1", &subdomain).await
    }

    /// Tenant by schema name, including inactive ones.
    pub async fn get_by_schema_name(&self, schema: &SchemaName) -> StorageResult<Tenant> {
        self.fetch_one("schema_name = $1", &schema.as_str())
            .await?
            .ok_or_else(|| not_found(schema.as_str()))
    }

    /// Tenant by tenant code, including inactive ones.
    pub async fn get_by_code(&self, tenant_code: &str) -> StorageResult<Tenant> {
        self.fetch_one("tenant_code = $1", &tenant_code)
            .await?
            .ok_or_else(|| not_found(tenant_code))
    }

    /// Tenant by id, including inactive ones.
    pub async fn get_by_id(&self, id: i64) -> StorageResult<Tenant> {
        self.fetch_one("id = $1", &id)
            .await?
            .ok_or_else(|| not_found(&id.to_string()))
    }

    /// All tenants ordered by id.
    pub async fn list(&self) -> StorageResult<Vec<Tenant>> {
        let client = self.pool().get().await?;
        let query = format!("SELECT {} FROM {} ORDER BY id", TENANT_COLUMNS, self.table);
        client
            .query(query.as_str(), &[])
            .await?
            .iter()
            .map(Tenant::from_row)
            .collect()
    }

    /// Inserts a tenant row on its own connection.
    ///
    /// This registers the row only; use
    /// [`SchemaProvisioner::provision`](super::SchemaProvisioner::provision)
    /// to create the backing schema with it.
    pub async fn create(&self, tenant: &NewTenant) -> StorageResult<Tenant> {
        tenant.validate()?;
        let client = self.pool().get().await?;
        let created = self.insert_tenant(&**client, tenant).await?;
        info!(tenant_code = %created.tenant_code, schema = %created.schema_name, "Registered tenant");
        Ok(created)
    }

    /// Inserts a tenant row through `client`, which may be a transaction.
    ///
    /// Schema-name and subdomain uniqueness are checked up front and enforced
    /// again by the table's unique constraints.
    pub(crate) async fn insert_tenant<C>(&self, client: &C, tenant: &NewTenant) -> StorageResult<Tenant>
    where
        C: tokio_postgres::GenericClient,
    {
        let schema = tenant.schema_name();

        let conflicts = client
            .query(
                format!(
                    "SELECT schema_name = $1 OR tenant_code = $3, subdomain = $2 FROM {} \
                     WHERE schema_name = $1 OR subdomain = $2 OR tenant_code = $3",
                    self.table
                )
                .as_str(),
                &[&schema.as_str(), &tenant.subdomain, &tenant.tenant_code],
            )
            .await?;
        for row in &conflicts {
            if row.try_get::<_, bool>(0)? {
                return Err(duplicate_schema(&schema));
            }
            if row.try_get::<_, bool>(1)? {
                return Err(duplicate_subdomain(&tenant.subdomain));
            }
        }

        let query = format!(
            "INSERT INTO {} (tenant_code, name, schema_name, subdomain, is_active, \
             hospital_name, hospital_code, address, hn_running) \
             VALUES ($1, $2, $3, $4, TRUE, $5, $6, $7, 0) \
             RETURNING {}",
            self.table, TENANT_COLUMNS
        );
        let row = client
            .query_one(
                query.as_str(),
                &[
                    &tenant.tenant_code,
                    &tenant.name,
                    &schema.as_str(),
                    &tenant.subdomain,
                    &tenant.hospital_name,
                    &tenant.hospital_code,
                    &tenant.address,
                ],
            )
            .await
            .map_err(|e| match unique_violation(&e).as_deref() {
                Some(SUBDOMAIN_KEY) => duplicate_subdomain(&tenant.subdomain),
                Some(SCHEMA_NAME_KEY) | Some(TENANT_CODE_KEY) => duplicate_schema(&schema),
                _ => StorageError::from(e),
            })?;

        Tenant::from_row(&row)
    }

    /// Activates or deactivates a tenant.
    pub async fn set_active(&self, id: i64, active: bool) -> StorageResult<Tenant> {
        let client = self.pool().get().await?;
        let query = format!(
            "UPDATE {} SET is_active = $2, updated_at = NOW() WHERE id = $1 RETURNING {}",
            self.table, TENANT_COLUMNS
        );
        let row = client
            .query_opt(query.as_str(), &[&id, &active])
            .await?
            .ok_or_else(|| not_found(&id.to_string()))?;

        let tenant = Tenant::from_row(&row)?;
        info!(tenant_code = %tenant.tenant_code, active, "Updated tenant activation");
        Ok(tenant)
    }

    /// Deletes a tenant row through `client`. Returns false when absent.
    pub(crate) async fn delete_tenant<C>(&self, client: &C, id: i64) -> StorageResult<bool>
    where
        C: tokio_postgres::GenericClient,
    {
        let deleted = client
            .execute(
                format!("DELETE FROM {} WHERE id = $1", self.table).as_str(),
                &[&id],
            )
            .await?;
        Ok(deleted > 0)
    }

    /// Returns true when a tenant row references `schema`.
    pub(crate) async fn owns_schema_with<C>(&self, client: &C, schema: &SchemaName) -> StorageResult<bool>
    where
        C: tokio_postgres::GenericClient,
    {
        let row = client
            .query_one(
                format!("SELECT EXISTS(SELECT 1 FROM {} WHERE schema_name = $1)", self.table)
                    .as_str(),
                &[&schema.as_str()],
            )
            .await?;
        Ok(row.try_get(0)?)
    }

    /// Catalog check for a schema, whether or not a tenant row references it.
    pub async fn schema_exists(&self, schema: &SchemaName) -> StorageResult<bool> {
        self.backend.schema_exists(schema).await
    }

    /// Increments the tenant's HN counter and returns the new value.
    pub async fn increment_counter(&self, tenant_id: i64) -> StorageResult<u64> {
        self.sequences.next_value(tenant_id).await
    }

    /// Mints the next HN for the tenant owning `schema`.
    pub async fn generate_hn(&self, schema: &SchemaName) -> StorageResult<String> {
        let tenant = self.get_by_schema_name(schema).await?;
        let value = self.increment_counter(tenant.id).await?;
        let hn = tenant.hn(value);
        debug!(schema = %schema, hn = %hn, "Generated HN");
        Ok(hn)
    }
}

#[async_trait]
impl TenantDirectory for TenantRegistry {
    async fn find_by_subdomain(&self, subdomain: &str) -> StorageResult<Option<Tenant>> {
        TenantRegistry::find_by_subdomain(self, subdomain).await
    }
}

fn not_found(key: &str) -> StorageError {
    StorageError::Tenant(TenantError::NotFound {
        key: key.to_string(),
    })
}

fn duplicate_schema(schema: &SchemaName) -> StorageError {
    StorageError::Tenant(TenantError::DuplicateSchema {
        schema: schema.to_string(),
    })
}

fn duplicate_subdomain(subdomain: &str) -> StorageError {
    StorageError::Tenant(TenantError::DuplicateSubdomain {
        subdomain: subdomain.to_string(),
    })
}
