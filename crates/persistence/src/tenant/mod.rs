//! Schema-per-tenant management.
//!
//! Every tenant owns one PostgreSQL schema in a shared database. The shared
//! (public) schema holds the tenant registry; tenant schemas hold the
//! tenant-local tables.
//!
//! # Core Types
//!
//! - [`SchemaName`] - A validated schema identifier; the only way schema names reach SQL
//! - [`TenantContext`] - The tenant a request resolved to, or the public context
//! - [`TenantRegistry`] - CRUD over the `tenants` table
//! - [`TenantSessionManager`] - Per-schema execution context cache
//! - [`SchemaProvisioner`] - All-or-nothing tenant creation and deprovisioning
//! - [`SequenceAllocator`] - Row-locked per-tenant counters (patient HN)
//!
//! # Examples
//!
//! ```
//! use his_persistence::tenant::{SchemaName, derive_schema_name, is_valid_schema_name};
//!
//! assert!(is_valid_schema_name("tenant_hosp001"));
//! assert!(!is_valid_schema_name("tenant; DROP SCHEMA public"));
//!
//! let schema = derive_schema_name("HOSP-001");
//! assert_eq!(schema.as_str(), "tenant_hosp_001");
//!
//! assert!(SchemaName::parse("Robert'); --").is_err());
//! ```

mod context;
pub mod migrations;
mod model;
mod provisioner;
mod registry;
mod schema_name;
mod sequence;
mod session;

pub use context::{TenantContext, TenantInfo};
pub use migrations::{TenantMigration, default_migrations};
pub use model::{
    ADMIN_PASSWORD_MIN, ADMIN_STAFF_CODE_PREFIX, ADMIN_USERNAME_MIN, AdminCredentials,
    HN_DIGITS, HOSPITAL_CODE_LEN, HOSPITAL_NAME_MAX, NewTenant, RESERVED_SUBDOMAINS,
    TENANT_CODE_MAX, Tenant, format_hn, validate_subdomain, validate_tenant_code,
};
pub use provisioner::{SchemaDisposition, SchemaProvisioner};
pub use registry::{TenantDirectory, TenantRegistry};
pub use schema_name::{
    MAX_SCHEMA_NAME_LEN, PUBLIC_SCHEMA, SchemaName, TENANT_SCHEMA_PREFIX, derive_schema_name,
    is_valid_schema_name, sanitize_schema_name,
};
pub use sequence::SequenceAllocator;
pub use session::{SessionFactory, TenantSessionManager};
