//! Shared-schema table definitions and migrations.

use deadpool_postgres::Client;

use crate::error::{BackendError, StorageError, StorageResult};
use crate::sql::{self, Table};
use crate::tenant::SchemaName;

/// Current shared-schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Serializes concurrent migrators on one database.
const MIGRATION_LOCK_KEY: i64 = 0x4849_535f_5055_42; // "HIS_PUB"

const SCHEMA_VERSION_COLUMNS: &str = "version INTEGER NOT NULL";

const TENANTS_COLUMNS: &str = "\
    id BIGSERIAL PRIMARY KEY,
    tenant_code VARCHAR(32) NOT NULL,
    name VARCHAR(255) NOT NULL,
    schema_name VARCHAR(63) NOT NULL,
    subdomain VARCHAR(63) NOT NULL,
    is_active BOOLEAN NOT NULL DEFAULT TRUE,
    hospital_name VARCHAR(150) NOT NULL,
    hospital_code VARCHAR(8) NOT NULL,
    address TEXT,
    hn_running BIGINT NOT NULL DEFAULT 0,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    CONSTRAINT tenants_tenant_code_key UNIQUE (tenant_code),
    CONSTRAINT tenants_schema_name_key UNIQUE (schema_name),
    CONSTRAINT tenants_subdomain_key UNIQUE (subdomain),
    CONSTRAINT tenants_hospital_code_len CHECK (char_length(hospital_code) = 8),
    CONSTRAINT tenants_hn_running_nonneg CHECK (hn_running >= 0)";

/// Unique constraint on `tenants.tenant_code`.
pub(crate) const TENANT_CODE_KEY: &str = "tenants_tenant_code_key";
/// Unique constraint on `tenants.schema_name`.
pub(crate) const SCHEMA_NAME_KEY: &str = "tenants_schema_name_key";
/// Unique constraint on `tenants.subdomain`.
pub(crate) const SUBDOMAIN_KEY: &str = "tenants_subdomain_key";

/// Creates or upgrades the shared-schema tables.
///
/// Runs in one transaction under an advisory lock, so several processes may
/// call it at startup.
pub async fn initialize_schema(client: &mut Client, public: &SchemaName) -> StorageResult<()> {
    let tx = client
        .transaction()
        .await
        .map_err(|e| migration_error(format!("Failed to begin migration: {}", e)))?;

    tx.execute("SELECT pg_advisory_xact_lock($1)", &[&MIGRATION_LOCK_KEY])
        .await
        .map_err(|e| migration_error(format!("Failed to take migration lock: {}", e)))?;

    let current_version = get_schema_version(&tx, public).await?;

    if current_version == 0 {
        create_schema_v1(&tx, public).await?;
        set_schema_version(&tx, public, 1).await?;
    } else if current_version > SCHEMA_VERSION {
        return Err(migration_error(format!(
            "Database schema version {} is newer than supported version {}",
            current_version, SCHEMA_VERSION
        )));
    }

    tx.commit()
        .await
        .map_err(|e| migration_error(format!("Failed to commit migration: {}", e)))?;

    tracing::info!(version = SCHEMA_VERSION, schema = %public, "Shared schema ready");
    Ok(())
}

async fn get_schema_version(
    tx: &deadpool_postgres::Transaction<'_>,
    public: &SchemaName,
) -> StorageResult<i32> {
    tx.batch_execute(&sql::create_table(
        public,
        Table::SchemaVersion,
        SCHEMA_VERSION_COLUMNS,
    ))
    .await
    .map_err(|e| migration_error(format!("Failed to create schema version table: {}", e)))?;

    let row = tx
        .query_opt(
            &format!(
                "SELECT version FROM {} LIMIT 1",
                sql::qualified(public, Table::SchemaVersion)
            ),
            &[],
        )
        .await
        .map_err(|e| migration_error(format!("Failed to query schema version: {}", e)))?;

    Ok(row.map(|r| r.get::<_, i32>(0)).unwrap_or(0))
}

async fn set_schema_version(
    tx: &deadpool_postgres::Transaction<'_>,
    public: &SchemaName,
    version: i32,
) -> StorageResult<()> {
    let table = sql::qualified(public, Table::SchemaVersion);

    tx.execute(&format!("DELETE FROM {}", table), &[])
        .await
        .map_err(|e| migration_error(format!("Failed to clear schema version: {}", e)))?;

    tx.execute(
        &format!("INSERT INTO {} (version) VALUES ($1)", table),
        &[&version],
    )
    .await
    .map_err(|e| migration_error(format!("Failed to set schema version: {}", e)))?;

    Ok(())
}

/// Version 1: the tenant registry.
async fn create_schema_v1(
    tx: &deadpool_postgres::Transaction<'_>,
    public: &SchemaName,
) -> StorageResult<()> {
    tx.batch_execute(&sql::create_schema(public))
        .await
        .map_err(|e| migration_error(format!("Failed to create shared schema: {}", e)))?;

    tx.batch_execute(&sql::create_table(public, Table::Tenants, TENANTS_COLUMNS))
        .await
        .map_err(|e| migration_error(format!("Failed to create tenants table: {}", e)))?;

    tx.batch_execute(&sql::create_index(public, Table::Tenants, "is_active"))
        .await
        .map_err(|e| migration_error(format!("Failed to create tenants index: {}", e)))?;

    Ok(())
}

fn migration_error(message: String) -> StorageError {
    StorageError::Backend(BackendError::MigrationError { message })
}
