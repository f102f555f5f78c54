//! Tenant-local table definitions.
//!
//! Each tenant schema carries the same table set. The set is expressed as an
//! ordered list of [`TenantMigration`]s whose statements are built through
//! [`crate::sql`] for a given schema. All statements are idempotent so the
//! list can be re-applied to existing tenants.

use crate::sql::{self, Table};
use crate::tenant::SchemaName;

/// One step of the tenant table set.
#[derive(Debug, Clone, Copy)]
pub struct TenantMigration {
    /// Sortable version tag.
    pub version: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Builds the statements for a schema.
    pub statements: fn(&SchemaName) -> Vec<String>,
}

impl TenantMigration {
    /// Statements for `schema`.
    pub fn statements_for(&self, schema: &SchemaName) -> Vec<String> {
        (self.statements)(schema)
    }
}

pub(crate) const STAFFS_COLUMNS: &str = "\
    id SERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    deleted_at TIMESTAMPTZ,
    username VARCHAR(100) UNIQUE NOT NULL,
    password_hash VARCHAR(255) NOT NULL,
    staff_code VARCHAR(50) UNIQUE NOT NULL,
    phone_number VARCHAR(20) UNIQUE,
    email VARCHAR(255) UNIQUE NOT NULL,
    first_name VARCHAR(255) NOT NULL,
    last_name VARCHAR(255) NOT NULL,
    is_admin BOOLEAN NOT NULL DEFAULT FALSE";

pub(crate) const PATIENTS_COLUMNS: &str = "\
    id SERIAL PRIMARY KEY,
    created_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    updated_at TIMESTAMPTZ NOT NULL DEFAULT CURRENT_TIMESTAMP,
    deleted_at TIMESTAMPTZ,
    first_name_th VARCHAR(255) NOT NULL,
    last_name_th VARCHAR(255) NOT NULL,
    middle_name_th VARCHAR(255),
    first_name_en VARCHAR(255) NOT NULL,
    last_name_en VARCHAR(255) NOT NULL,
    middle_name_en VARCHAR(255),
    date_of_birth DATE NOT NULL,
    nick_name_th VARCHAR(50),
    nick_name_en VARCHAR(50),
    patient_hn VARCHAR(50) UNIQUE NOT NULL,
    national_id VARCHAR(20) UNIQUE,
    passport_id VARCHAR(50) UNIQUE,
    phone_number VARCHAR(20) UNIQUE,
    email VARCHAR(255) UNIQUE,
    gender VARCHAR(10) NOT NULL CHECK (gender IN ('M', 'F', 'OTHER')),
    nationality VARCHAR(100) NOT NULL,
    blood_grp VARCHAR(5) NOT NULL CHECK (blood_grp IN ('A', 'B', 'O', 'AB'))";

fn create_staffs(schema: &SchemaName) -> Vec<String> {
    vec![
        sql::create_table(schema, Table::Staffs, STAFFS_COLUMNS),
        sql::create_index(schema, Table::Staffs, "deleted_at"),
    ]
}

fn create_patients(schema: &SchemaName) -> Vec<String> {
    vec![
        sql::create_table(schema, Table::Patients, PATIENTS_COLUMNS),
        sql::create_index(schema, Table::Patients, "deleted_at"),
    ]
}

/// Staff phone numbers are optional; older schemas stored `''` for none.
fn staffs_optional_phone(schema: &SchemaName) -> Vec<String> {
    let staffs = sql::qualified(schema, Table::Staffs);
    vec![
        format!("ALTER TABLE {} ALTER COLUMN phone_number DROP NOT NULL", staffs),
        format!("UPDATE {} SET phone_number = NULL WHERE phone_number = ''", staffs),
    ]
}

/// The standard tenant table set, in application order.
pub fn default_migrations() -> Vec<TenantMigration> {
    vec![
        TenantMigration {
            version: "0001",
            name: "create_staffs",
            statements: create_staffs,
        },
        TenantMigration {
            version: "0002",
            name: "create_patients",
            statements: create_patients,
        },
        TenantMigration {
            version: "0003",
            name: "staffs_optional_phone",
            statements: staffs_optional_phone,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_migrations_are_ordered() {
        let migrations = default_migrations();
        let versions: Vec<_> = migrations.iter().map(|m| m.version).collect();
        let mut sorted = versions.clone();
        sorted.sort();
        assert_eq!(versions, sorted);
    }

    #[test]
    fn test_statements_are_schema_qualified() {
        let schema = SchemaName::parse("tenant_hosp001").unwrap();
        let statements: Vec<String> = default_migrations()
            .iter()
            .flat_map(|m| m.statements_for(&schema))
            .collect();

        assert_eq!(statements.len(), 6);
        assert!(
            statements[0].starts_with("CREATE TABLE IF NOT EXISTS \"tenant_hosp001\".staffs (")
        );
        assert!(
            statements[2].starts_with("CREATE TABLE IF NOT EXISTS \"tenant_hosp001\".patients (")
        );
        assert!(STAFFS_COLUMNS.contains("phone_number VARCHAR(20) UNIQUE,"));
        for stmt in &statements {
            assert!(stmt.contains("\"tenant_hosp001\""), "unqualified: {}", stmt);
        }
    }
}
