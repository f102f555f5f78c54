//! Error types for the persistence layer.
//!
//! This module defines all error types used throughout the persistence layer,
//! following a hierarchy that separates tenant errors, validation errors,
//! provisioning errors, concurrency errors and backend errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use thiserror::Error;

/// The primary error type for all storage operations.
///
/// This enum encompasses all possible errors that can occur during persistence
/// operations, organized by category.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Tenant resolution and isolation errors
    #[error(transparent)]
    Tenant(#[from] TenantError),

    /// Input validation errors
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Schema provisioning errors
    #[error(transparent)]
    Provisioning(#[from] ProvisioningError),

    /// Row-lock and deadlock errors
    #[error(transparent)]
    Concurrency(#[from] ConcurrencyError),

    /// Tenant-local record errors
    #[error(transparent)]
    Record(#[from] RecordError),

    /// Backend-specific errors
    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Errors related to tenant resolution and isolation.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TenantError {
    /// The identifier is not a safe PostgreSQL schema name.
    #[error("invalid schema name: {name:?}")]
    InvalidSchemaName { name: String },

    /// A tenant (or catalog schema) with this schema name already exists.
    #[error("schema already exists: {schema}")]
    DuplicateSchema { schema: String },

    /// A tenant with this subdomain already exists.
    #[error("subdomain already registered: {subdomain}")]
    DuplicateSubdomain { subdomain: String },

    /// No tenant matches the lookup key.
    #[error("tenant not found: {key}")]
    NotFound { key: String },

    /// The tenant exists but is deactivated.
    #[error("tenant inactive: {key}")]
    Inactive { key: String },

    /// The operation needs a tenant context but the request resolved to the public schema.
    #[error("tenant context required")]
    Required,

    /// The schema claim carried by a credential does not match the resolved tenant.
    #[error("schema mismatch: credential is bound to {claimed}, request resolved to {resolved}")]
    SchemaMismatch { claimed: String, resolved: String },
}

/// Errors raised by boundary validation before any I/O happens.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    /// A field failed validation.
    #[error("invalid {field}: {message}")]
    InvalidInput { field: String, message: String },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::InvalidInput`].
    pub fn invalid(field: impl Into<String>, message: impl Into<String>) -> Self {
        ValidationError::InvalidInput {
            field: field.into(),
            message: message.into(),
        }
    }
}

/// The step of a provisioning run that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisionStep {
    /// Opening the provisioning transaction.
    Begin,
    /// Inserting the tenant row into the public schema.
    InsertTenant,
    /// Creating the tenant schema.
    CreateSchema,
    /// Creating the tenant-local tables.
    CreateTables,
    /// Hashing the admin password.
    HashPassword,
    /// Inserting the admin staff row.
    InsertAdmin,
}

impl std::fmt::Display for ProvisionStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ProvisionStep::Begin => "begin",
            ProvisionStep::InsertTenant => "insert-tenant",
            ProvisionStep::CreateSchema => "create-schema",
            ProvisionStep::CreateTables => "create-tables",
            ProvisionStep::HashPassword => "hash-password",
            ProvisionStep::InsertAdmin => "insert-admin",
        };
        write!(f, "{}", name)
    }
}

/// Errors related to tenant schema provisioning.
#[derive(Error, Debug)]
pub enum ProvisioningError {
    /// A DDL or DML statement failed while provisioning.
    #[error("provisioning failed at {step} for schema {schema}: {message}")]
    Failed {
        schema: String,
        step: ProvisionStep,
        message: String,
    },

    /// Every statement succeeded but the commit did not.
    #[error("provisioning commit failed for schema {schema}: {message}")]
    CommitFailed { schema: String, message: String },
}

/// Errors related to row-level locking.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConcurrencyError {
    /// Waiting for a row lock exceeded the lock or statement timeout.
    #[error("lock timeout: {message}")]
    LockTimeout { message: String },

    /// The database aborted the transaction to break a deadlock.
    #[error("deadlock detected: {message}")]
    Deadlock { message: String },
}

/// Errors related to tenant-local records (patients, staff).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// The record does not exist in the current tenant schema.
    #[error("{kind} not found: {id}")]
    NotFound { kind: &'static str, id: String },

    /// A unique column already holds this value.
    #[error("duplicate {kind}: {message}")]
    Duplicate { kind: &'static str, message: String },
}

/// Errors from the database backend.
#[derive(Error, Debug)]
pub enum BackendError {
    /// A connection could not be established or checked out.
    #[error("connection failed to {backend_name}: {message}")]
    ConnectionFailed {
        backend_name: String,
        message: String,
    },

    /// A tenant execution context could not be bound to its schema.
    #[error("failed to bind session to schema {schema}: {message}")]
    SessionBindFailed { schema: String, message: String },

    /// The connection pool has no free connections.
    #[error("connection pool exhausted for {backend_name}")]
    PoolExhausted { backend_name: String },

    /// A public-schema migration failed.
    #[error("schema migration failed: {message}")]
    MigrationError { message: String },

    /// Internal backend error.
    #[error("internal error in {backend_name}: {message}")]
    Internal {
        backend_name: String,
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

/// Result type alias for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// SQLSTATE for `lock_not_available` (raised when `lock_timeout` expires).
const SQLSTATE_LOCK_NOT_AVAILABLE: &str = "55P03";
/// SQLSTATE for `query_canceled` (raised when `statement_timeout` expires).
const SQLSTATE_QUERY_CANCELED: &str = "57014";
/// SQLSTATE for `deadlock_detected`.
const SQLSTATE_DEADLOCK: &str = "40P01";
/// SQLSTATE for `unique_violation`.
pub(crate) const SQLSTATE_UNIQUE_VIOLATION: &str = "23505";

impl StorageError {
    /// Returns true when the error is a tenant-level "not found".
    pub fn is_tenant_not_found(&self) -> bool {
        matches!(self, StorageError::Tenant(TenantError::NotFound { .. }))
    }

    /// Returns true when retrying the whole operation may succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Concurrency(_))
    }
}

impl From<deadpool_postgres::PoolError> for StorageError {
    fn from(err: deadpool_postgres::PoolError) -> Self {
        match err {
            deadpool_postgres::PoolError::Timeout(_) => {
                StorageError::Backend(BackendError::PoolExhausted {
                    backend_name: "postgres".to_string(),
                })
            }
            other => StorageError::Backend(BackendError::ConnectionFailed {
                backend_name: "postgres".to_string(),
                message: other.to_string(),
            }),
        }
    }
}

impl From<tokio_postgres::Error> for StorageError {
    fn from(err: tokio_postgres::Error) -> Self {
        let code = err.code().map(|c| c.code().to_string());
        match code.as_deref() {
            Some(SQLSTATE_LOCK_NOT_AVAILABLE) | Some(SQLSTATE_QUERY_CANCELED) => {
                StorageError::Concurrency(ConcurrencyError::LockTimeout {
                    message: db_message(&err),
                })
            }
            Some(SQLSTATE_DEADLOCK) => StorageError::Concurrency(ConcurrencyError::Deadlock {
                message: db_message(&err),
            }),
            _ => StorageError::Backend(BackendError::Internal {
                backend_name: "postgres".to_string(),
                message: err.to_string(),
                source: Some(Box::new(err)),
            }),
        }
    }
}

/// Returns the server-side message of a database error, or the driver message.
pub(crate) fn db_message(err: &tokio_postgres::Error) -> String {
    err.as_db_error()
        .map(|db| db.message().to_string())
        .unwrap_or_else(|| err.to_string())
}

/// Returns the violated constraint name when `err` is a unique violation.
pub(crate) fn unique_violation(err: &tokio_postgres::Error) -> Option<String> {
    let db = err.as_db_error()?;
    if db.code().code() != SQLSTATE_UNIQUE_VIOLATION {
        return None;
    }
    Some(db.constraint().unwrap_or_default().to_string())
}

pub(crate) fn internal_error(message: impl Into<String>) -> StorageError {
    StorageError::Backend(BackendError::Internal {
        backend_name: "postgres".to_string(),
        message: message.into(),
        source: None,
    })
}
