//! PostgreSQL backend.
//!
//! Tenants live in their own schemas of one database. The shared schema
//! holds the tenant registry; tenant schemas hold patients and staff.

mod backend;
pub(crate) mod schema;
mod transaction;

pub use backend::{PostgresBackend, PostgresConfig, PostgresSslMode, SchemaExecutionContext};
pub(crate) use backend::schema_exists_with;
pub use transaction::ScopedTransaction;

/// Session manager over the PostgreSQL backend.
pub type PostgresSessionManager = crate::tenant::TenantSessionManager<PostgresBackend>;
