//! Identifier SQL builders.
//!
//! This is the only module that interpolates identifiers into SQL text.
//! Every builder takes a [`SchemaName`], so the validator has always run
//! before a statement exists. Values never go through here; they are bound
//! as query parameters.

use crate::tenant::SchemaName;

/// Tables addressed by schema-qualified SQL.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Table {
    /// Tenant registry (shared schema).
    Tenants,
    /// Public schema version bookkeeping.
    SchemaVersion,
    /// Tenant-local staff accounts.
    Staffs,
    /// Tenant-local patient records.
    Patients,
}

impl Table {
    /// The unqualified table name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::Tenants => "tenants",
            Table::SchemaVersion => "his_schema_version",
            Table::Staffs => "staffs",
            Table::Patients => "patients",
        }
    }
}

fn quote(schema: &SchemaName) -> String {
    // Validated names contain no quote characters; quoting only preserves case.
    format!("\"{}\"", schema.as_str())
}

/// `"schema".table`
pub fn qualified(schema: &SchemaName, table: Table) -> String {
    format!("{}.{}", quote(schema), table.as_str())
}

/// `CREATE SCHEMA IF NOT EXISTS "schema"`
pub fn create_schema(schema: &SchemaName) -> String {
    format!("CREATE SCHEMA IF NOT EXISTS {}", quote(schema))
}

/// `DROP SCHEMA IF EXISTS "schema" [CASCADE]`
pub fn drop_schema(schema: &SchemaName, cascade: bool) -> String {
    let cascade = if cascade { " CASCADE" } else { "" };
    format!("DROP SCHEMA IF EXISTS {}{}", quote(schema), cascade)
}

/// Transaction-local search path: `SET LOCAL search_path TO "schema", "public"`.
///
/// When `schema` is the shared schema itself the path has a single entry.
pub fn set_local_search_path(schema: &SchemaName, shared: &SchemaName) -> String {
    if schema == shared {
        format!("SET LOCAL search_path TO {}", quote(shared))
    } else {
        format!(
            "SET LOCAL search_path TO {}, {}",
            quote(schema),
            quote(shared)
        )
    }
}

/// `CREATE TABLE IF NOT EXISTS "schema".table (columns)`.
///
/// `columns` is a compile-time column list; it never carries caller input.
pub fn create_table(schema: &SchemaName, table: Table, columns: &'static str) -> String {
    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        qualified(schema, table),
        columns
    )
}

/// `CREATE INDEX IF NOT EXISTS idx_<table>_<column> ON "schema".table (column)`.
pub fn create_index(schema: &SchemaName, table: Table, column: &'static str) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_{} ON {} ({})",
        table.as_str(),
        column,
        qualified(schema, table),
        column
    )
}

/// Catalog probe for a schema; binds the name as `$1`.
pub const SCHEMA_EXISTS: &str =
    "SELECT EXISTS(SELECT 1 FROM information_schema.schemata WHERE schema_name = $1)";

/// Transaction-scoped advisory lock on a schema name; binds the name as `$1`.
///
/// Every statement that creates or drops a tenant schema runs under this lock.
pub const LOCK_SCHEMA_NAME: &str = "SELECT pg_advisory_xact_lock(hashtext($1)::bigint)";

#[cfg(test)]
mod tests {
    use super::*;

    fn schema(name: &str) -> SchemaName {
        SchemaName::parse(name).unwrap()
    }

    #[test]
    fn test_qualified() {
        assert_eq!(
            qualified(&schema("tenant_hosp001"), Table::Patients),
            "\"tenant_hosp001\".patients"
        );
    }

    #[test]
    fn test_create_and_drop_schema() {
        let s = schema("tenant_hosp001");
        assert_eq!(
            create_schema(&s),
            "CREATE SCHEMA IF NOT EXISTS \"tenant_hosp001\""
        );
        assert_eq!(
            drop_schema(&s, true),
            "DROP SCHEMA IF EXISTS \"tenant_hosp001\" CASCADE"
        );
        assert_eq!(
            drop_schema(&s, false),
            "DROP SCHEMA IF EXISTS \"tenant_hosp001\""
        );
    }

    #[test]
    fn test_set_local_search_path() {
        let public = SchemaName::public();
        assert_eq!(
            set_local_search_path(&schema("tenant_a"), &public),
            "SET LOCAL search_path TO \"tenant_a\", \"public\""
        );
        assert_eq!(
            set_local_search_path(&public, &public),
            "SET LOCAL search_path TO \"public\""
        );
    }

    #[test]
    fn test_create_index() {
        assert_eq!(
            create_index(&schema("tenant_a"), Table::Staffs, "deleted_at"),
            "CREATE INDEX IF NOT EXISTS idx_staffs_deleted_at ON \"tenant_a\".staffs (deleted_at)"
        );
    }
}
