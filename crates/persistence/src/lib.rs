//! HIS Persistence Layer
//!
//! Schema-per-tenant storage for the hospital information system on
//! PostgreSQL. Each hospital (tenant) owns one schema; a shared schema holds
//! the tenant registry.
//!
//! # Architecture
//!
//! - [`tenant`] - Schema names, tenant context, registry, session cache, provisioning, counters
//! - [`postgres`] - Pool and configuration, schema-scoped transactions, shared-schema migrations
//! - [`records`] - Tenant-local patient and staff repositories
//! - [`sql`] - The only place identifiers are interpolated into SQL
//! - [`error`] - Error types for all operations
//!
//! # Isolation
//!
//! Tenant-local statements never mutate connection state. A
//! [`SchemaExecutionContext`](postgres::SchemaExecutionContext) borrows a
//! pooled connection per unit of work, opens a transaction and pins the
//! search path with `SET LOCAL`:
//!
//! ```no_run
//! use std::sync::Arc;
//! use his_persistence::postgres::{PostgresBackend, PostgresConfig, PostgresSessionManager};
//!
//! # async fn example() -> Result<(), his_persistence::StorageError> {
//! let backend = PostgresBackend::new(PostgresConfig::from_env())?;
//! backend.init_schema().await?;
//!
//! let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend)));
//! let ctx = sessions.session_for("tenant_hosp001").await?;
//!
//! let tx = ctx.begin().await?;
//! assert_eq!(tx.search_path().await?, "tenant_hosp001, public");
//! tx.commit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! # Provisioning
//!
//! ```no_run
//! use his_persistence::postgres::{PostgresBackend, PostgresConfig};
//! use his_persistence::tenant::{AdminCredentials, NewTenant, SchemaProvisioner, TenantRegistry};
//!
//! # async fn example() -> Result<(), his_persistence::StorageError> {
//! let backend = PostgresBackend::new(PostgresConfig::from_env())?;
//! let provisioner = SchemaProvisioner::new(TenantRegistry::new(backend));
//!
//! let tenant = provisioner
//!     .provision(
//!         &NewTenant {
//!             tenant_code: "HOSP001".to_string(),
//!             name: "Bangkok General".to_string(),
//!             subdomain: "bangkok".to_string(),
//!             hospital_name: "Bangkok General Hospital".to_string(),
//!             hospital_code: "HOSP0001".to_string(),
//!             address: None,
//!         },
//!         &AdminCredentials::new("admin1", "change-me", "admin@bangkok.example"),
//!     )
//!     .await?;
//! assert_eq!(tenant.schema_name, "tenant_hosp001");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

pub mod error;
pub mod postgres;
pub mod records;
pub mod sql;
pub mod tenant;

pub use error::{StorageError, StorageResult};
pub use tenant::{SchemaName, TenantContext};
