//! Tenant provisioning and deprovisioning.
//!
//! A tenant is created as one unit of work: the registry row, its schema,
//! the tenant-local tables and the initial admin either all exist after
//! [`SchemaProvisioner::provision`] returns `Ok`, or none of them do.
//! PostgreSQL DDL is transactional, so the whole sequence runs in a single
//! transaction; a schema created by a failed run is additionally dropped on a
//! separate connection as a best-effort cleanup.
//!
//! Provisioning, cleanup and deprovisioning of one schema name serialize on
//! a transaction-scoped advisory lock. The cleanup re-checks the registry
//! under that lock and leaves the schema alone once a tenant row owns it, so
//! a concurrent run that committed the same schema keeps its data.

use std::sync::Arc;

use tracing::{error, info, warn};

use super::migrations::{TenantMigration, default_migrations};
use super::model::{AdminCredentials, NewTenant, Tenant};
use super::registry::TenantRegistry;
use super::schema_name::SchemaName;
use crate::error::{ProvisionStep, ProvisioningError, StorageError, StorageResult, TenantError};
use crate::postgres::{PostgresBackend, PostgresSessionManager, schema_exists_with};
use crate::sql::{self, Table};

/// What happens to a tenant schema when its tenant is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchemaDisposition {
    /// Drop the schema and everything in it.
    Drop,
    /// Keep the schema and its data; only the registry row goes.
    Preserve,
}

/// Creates and removes tenant schemas.
pub struct SchemaProvisioner {
    registry: TenantRegistry,
    sessions: Option<Arc<PostgresSessionManager>>,
    migrations: Vec<TenantMigration>,
    bcrypt_cost: u32,
}

impl std::fmt::Debug for SchemaProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaProvisioner")
            .field("migrations", &self.migrations.len())
            .field("bcrypt_cost", &self.bcrypt_cost)
            .finish_non_exhaustive()
    }
}

impl SchemaProvisioner {
    /// Creates a provisioner with the default tenant table set.
    pub fn new(registry: TenantRegistry) -> Self {
        Self {
            registry,
            sessions: None,
            migrations: default_migrations(),
            bcrypt_cost: bcrypt::DEFAULT_COST,
        }
    }

    /// Replaces the tenant table set.
    pub fn with_migrations(mut self, migrations: Vec<TenantMigration>) -> Self {
        self.migrations = migrations;
        self
    }

    /// Invalidates cached contexts in `sessions` when a tenant is removed.
    pub fn with_session_manager(
        mut self,
        sessions: Arc<PostgresSessionManager>,
    ) -> Self {
        self.sessions = Some(sessions);
        self
    }

    /// Sets the bcrypt cost used for the admin password.
    pub fn with_bcrypt_cost(mut self, cost: u32) -> Self {
        self.bcrypt_cost = cost;
        self
    }

    /// The registry this provisioner writes to.
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    fn backend(&self) -> &PostgresBackend {
        self.registry.backend()
    }

    /// Provisions a tenant, its schema, its tables and its admin.
    pub async fn provision(
        &self,
        tenant: &NewTenant,
        admin: &AdminCredentials,
    ) -> StorageResult<Tenant> {
        tenant.validate()?;
        admin.validate()?;

        let schema = tenant.schema_name();
        if &schema == self.backend().public_schema() {
            return Err(TenantError::InvalidSchemaName {
                name: schema.into_inner(),
            }
            .into());
        }

        let password_hash = self.hash_password(&schema, &admin.password).await?;

        let mut created_schema = false;
        let outcome = {
            let mut client = self.backend().get_client().await?;
            let tx = client
                .transaction()
                .await
                .map_err(|e| step_failed(&schema, ProvisionStep::Begin, e.into()))?;

            match self
                .provision_in(&tx, tenant, admin, &schema, &password_hash, &mut created_schema)
                .await
            {
                Ok(created) => tx.commit().await.map(|()| created).map_err(|e| {
                    StorageError::Provisioning(ProvisioningError::CommitFailed {
                        schema: schema.to_string(),
                        message: e.to_string(),
                    })
                }),
                Err(e) => {
                    if let Err(rollback_err) = tx.rollback().await {
                        error!(schema = %schema, error = %rollback_err, "Provisioning rollback failed");
                    }
                    Err(e)
                }
            }
        };

        match outcome {
            Ok(created) => {
                info!(
                    tenant_code = %created.tenant_code,
                    schema = %schema,
                    subdomain = %created.subdomain,
                    "Provisioned tenant"
                );
                Ok(created)
            }
            Err(e) => {
                warn!(schema = %schema, error = %e, "Provisioning failed");
                if created_schema {
                    self.drop_orphaned_schema(&schema).await;
                }
                Err(e)
            }
        }
    }

    async fn provision_in(
        &self,
        tx: &deadpool_postgres::Transaction<'_>,
        tenant: &NewTenant,
        admin: &AdminCredentials,
        schema: &SchemaName,
        password_hash: &str,
        created_schema: &mut bool,
    ) -> StorageResult<Tenant> {
        tx.execute(sql::LOCK_SCHEMA_NAME, &[&schema.as_str()])
            .await
            .map_err(|e| step_failed(schema, ProvisionStep::Begin, e.into()))?;

        if schema_exists_with(&**tx, schema)
            .await
            .map_err(|e| step_failed(schema, ProvisionStep::InsertTenant, e))?
        {
            return Err(TenantError::DuplicateSchema {
                schema: schema.to_string(),
            }
            .into());
        }

        let created = self
            .registry
            .insert_tenant(&**tx, tenant)
            .await
            .map_err(|e| step_failed(schema, ProvisionStep::InsertTenant, e))?;

        tx.batch_execute(&sql::create_schema(schema))
            .await
            .map_err(|e| step_failed(schema, ProvisionStep::CreateSchema, e.into()))?;
        *created_schema = true;

        for migration in &self.migrations {
            for statement in migration.statements_for(schema) {
                tx.batch_execute(&statement).await.map_err(|e| {
                    step_failed(schema, ProvisionStep::CreateTables, e.into())
                })?;
            }
        }

        let insert_admin = format!(
            "INSERT INTO {} (username, password_hash, staff_code, phone_number, email, \
             first_name, last_name, is_admin) VALUES ($1, $2, $3, $4, $5, $6, $7, TRUE)",
            sql::qualified(schema, Table::Staffs)
        );
        tx.execute(
            insert_admin.as_str(),
            &[
                &admin.username,
                &password_hash,
                &tenant.admin_staff_code(),
                &admin.phone_number,
                &admin.email,
                &admin.first_name,
                &admin.last_name,
            ],
        )
        .await
        .map_err(|e| step_failed(schema, ProvisionStep::InsertAdmin, e.into()))?;

        Ok(created)
    }

    async fn hash_password(&self, schema: &SchemaName, password: &str) -> StorageResult<String> {
        let password = password.to_string();
        let cost = self.bcrypt_cost;
        let hashed = tokio::task::spawn_blocking(move || bcrypt::hash(password, cost))
            .await
            .map_err(|e| hash_failed(schema, e.to_string()))?;
        hashed.map_err(|e| hash_failed(schema, e.to_string()))
    }

    /// Drops `schema` unless a tenant row owns it. Failures are logged only.
    async fn drop_orphaned_schema(&self, schema: &SchemaName) {
        let result = async {
            let mut client = self.backend().get_client().await?;
            let tx = client.transaction().await?;
            tx.execute(sql::LOCK_SCHEMA_NAME, &[&schema.as_str()]).await?;
            let owned = self.registry.owns_schema_with(&*tx, schema).await?;
            if !owned {
                tx.batch_execute(&sql::drop_schema(schema, true)).await?;
            }
            tx.commit().await?;
            Ok::<_, StorageError>(!owned)
        }
        .await;

        match result {
            Ok(true) => info!(schema = %schema, "Dropped schema of failed provisioning run"),
            Ok(false) => warn!(
                schema = %schema,
                "Schema of failed provisioning run is owned by another tenant; left in place"
            ),
            Err(e) => error!(
                schema = %schema,
                error = %e,
                "Failed to drop schema of failed provisioning run"
            ),
        }
    }

    /// Removes a tenant and drops or keeps its schema.
    ///
    /// The registry row and (for [`SchemaDisposition::Drop`]) the schema are
    /// removed in one transaction. The cached context for the schema, if any,
    /// is invalidated afterwards.
    pub async fn deprovision(
        &self,
        schema: &SchemaName,
        disposition: SchemaDisposition,
    ) -> StorageResult<Tenant> {
        if schema == self.backend().public_schema() {
            return Err(TenantError::InvalidSchemaName {
                name: schema.to_string(),
            }
            .into());
        }

        let tenant = self.registry.get_by_schema_name(schema).await?;

        {
            let mut client = self.backend().get_client().await?;
            let tx = client.transaction().await?;
            tx.execute(sql::LOCK_SCHEMA_NAME, &[&schema.as_str()]).await?;
            self.registry.delete_tenant(&*tx, tenant.id).await?;
            if disposition == SchemaDisposition::Drop {
                tx.batch_execute(&sql::drop_schema(schema, true)).await?;
            }
            tx.commit().await?;
        }

        if let Some(sessions) = &self.sessions {
            sessions.invalidate(schema.as_str());
        }

        info!(
            tenant_code = %tenant.tenant_code,
            schema = %schema,
            ?disposition,
            "Deprovisioned tenant"
        );
        Ok(tenant)
    }

    /// Re-applies the tenant table set to an existing tenant schema.
    pub async fn migrate_tenant_schema(&self, schema: &SchemaName) -> StorageResult<()> {
        if !self.backend().schema_exists(schema).await? {
            return Err(TenantError::NotFound {
                key: schema.to_string(),
            }
            .into());
        }

        let mut client = self.backend().get_client().await?;
        let tx = client.transaction().await?;
        for migration in &self.migrations {
            for statement in migration.statements_for(schema) {
                tx.batch_execute(&statement).await?;
            }
        }
        tx.commit().await?;

        info!(schema = %schema, migrations = self.migrations.len(), "Migrated tenant schema");
        Ok(())
    }

    /// Re-applies the tenant table set to every registered tenant.
    ///
    /// Stops at the first failing tenant. Returns the number migrated.
    pub async fn migrate_all(&self) -> StorageResult<usize> {
        let tenants = self.registry.list().await?;
        for tenant in &tenants {
            self.migrate_tenant_schema(&tenant.schema()?).await?;
        }
        Ok(tenants.len())
    }
}

/// Wraps a storage failure at `step`, keeping tenant and validation errors as they are.
fn step_failed(schema: &SchemaName, step: ProvisionStep, err: StorageError) -> StorageError {
    match err {
        StorageError::Tenant(_) | StorageError::Validation(_) => err,
        other => StorageError::Provisioning(ProvisioningError::Failed {
            schema: schema.to_string(),
            step,
            message: other.to_string(),
        }),
    }
}

fn hash_failed(schema: &SchemaName, message: String) -> StorageError {
    StorageError::Provisioning(ProvisioningError::Failed {
        schema: schema.to_string(),
        step: ProvisionStep::HashPassword,
        message,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{BackendError, ValidationError};
    use crate::postgres::PostgresConfig;

    fn provisioner() -> SchemaProvisioner {
        let backend = PostgresBackend::new(PostgresConfig {
            host: "127.0.0.1".to_string(),
            port: 1,
            connect_timeout_secs: 1,
            ..Default::default()
        })
        .unwrap();
        SchemaProvisioner::new(TenantRegistry::new(backend)).with_bcrypt_cost(4)
    }

    fn new_tenant() -> NewTenant {
        NewTenant {
            tenant_code: "HOSP001".to_string(),
            name: "Bangkok General".to_string(),
            subdomain: "bangkok".to_string(),
            hospital_name: "Bangkok General Hospital".to_string(),
            hospital_code: "HOSP0001".to_string(),
            address: None,
        }
    }

    #[test]
    fn test_step_failed_keeps_tenant_errors() {
        let schema = SchemaName::parse("tenant_a").unwrap();
        let dup = StorageError::Tenant(TenantError::DuplicateSubdomain {
            subdomain: "a".to_string(),
        });
        assert!(matches!(
            step_failed(&schema, ProvisionStep::InsertTenant, dup),
            StorageError::Tenant(TenantError::DuplicateSubdomain { .. })
        ));

        let backend = StorageError::Backend(BackendError::MigrationError {
            message: "boom".to_string(),
        });
        let wrapped = step_failed(&schema, ProvisionStep::CreateTables, backend);
        assert!(matches!(
            wrapped,
            StorageError::Provisioning(ProvisioningError::Failed {
                step: ProvisionStep::CreateTables,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_invalid_tenant_rejected_before_io() {
        // The backend points at a closed port; reaching it would yield a connection error.
        let bad = NewTenant {
            hospital_code: "SHORT".to_string(),
            ..new_tenant()
        };
        let err = provisioner()
            .provision(&bad, &AdminCredentials::new("admin1", "secret1", "a@b.c"))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Validation(ValidationError::InvalidInput { ref field, .. }) if field == "hospital_code"
        ));
    }

    #[tokio::test]
    async fn test_invalid_admin_rejected_before_io() {
        let err = provisioner()
            .provision(&new_tenant(), &AdminCredentials::new("adm", "secret1", "a@b.c"))
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Validation(_)));
    }

    #[tokio::test]
    async fn test_public_schema_cannot_be_deprovisioned() {
        let err = provisioner()
            .deprovision(&SchemaName::public(), SchemaDisposition::Drop)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            StorageError::Tenant(TenantError::InvalidSchemaName { .. })
        ));
    }

    #[tokio::test]
    async fn test_hash_password_produces_bcrypt_hash() {
        let schema = SchemaName::parse("tenant_a").unwrap();
        let hash = provisioner().hash_password(&schema, "secret1").await.unwrap();
        assert!(hash.starts_with("$2"));
        assert!(bcrypt::verify("secret1", &hash).unwrap());
    }
}
