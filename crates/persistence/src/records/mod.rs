//! Tenant-local record repositories.
//!
//! Repositories take a [`TenantContext`](crate::tenant::TenantContext) on
//! every call and refuse the public context. Each call borrows a
//! [`ScopedTransaction`] from the tenant's execution context and uses
//! unqualified table names, which resolve against the tenant schema.

mod patient;
mod staff;

pub use patient::{BloodGroup, Gender, NewPatient, Patient, PatientPatch, PatientRepository, PatientUpdate};
pub use staff::{NewStaff, Staff, StaffPatch, StaffRepository, StaffUpdate};

use std::sync::Arc;

use tracing::warn;

use crate::error::{RecordError, StorageError, StorageResult, ValidationError, unique_violation};
use crate::postgres::{PostgresSessionManager, ScopedTransaction};
use crate::tenant::TenantContext;

/// Opens a scoped transaction for the tenant bound to `ctx`.
///
/// A context whose search path cannot be pinned is evicted from `sessions`.
pub(crate) async fn begin_for(
    sessions: &Arc<PostgresSessionManager>,
    ctx: &TenantContext,
) -> StorageResult<ScopedTransaction> {
    let tenant = ctx.require()?;
    sessions
        .with_session(tenant.schema_name.as_str(), |session| async move {
            session.begin().await
        })
        .await
}

/// Commits on success, rolls back on failure.
pub(crate) async fn finish<T>(tx: ScopedTransaction, result: StorageResult<T>) -> StorageResult<T> {
    match result {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            let schema = tx.schema().clone();
            if let Err(rollback_err) = tx.rollback().await {
                warn!(schema = %schema, error = %rollback_err, "Rollback failed");
            }
            Err(e)
        }
    }
}

/// Maps a unique violation to [`RecordError::Duplicate`].
pub(crate) fn record_error(kind: &'static str) -> impl FnOnce(tokio_postgres::Error) -> StorageError {
    move |err| match unique_violation(&err) {
        Some(constraint) => StorageError::Record(RecordError::Duplicate {
            kind,
            message: constraint,
        }),
        None => StorageError::from(err),
    }
}

pub(crate) fn not_found(kind: &'static str, id: impl ToString) -> StorageError {
    StorageError::Record(RecordError::NotFound {
        kind,
        id: id.to_string(),
    })
}

pub(crate) fn trim_opt(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

pub(crate) fn require_text(field: &str, value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::invalid(field, "must not be empty"));
    }
    Ok(())
}

/// Builds `UPDATE <table> SET ...` assigning `columns` from `$1..`; the id is
/// the last parameter. Only live rows are updated.
pub(crate) fn update_statement(
    table: &str,
    columns: &[&'static str],
    returning: &str,
) -> Result<String, ValidationError> {
    let mut assignments = Vec::with_capacity(columns.len() + 1);
    for (i, column) in columns.iter().enumerate() {
        if columns[..i].contains(column) {
            return Err(ValidationError::invalid(*column, "assigned more than once"));
        }
        assignments.push(format!("{} = ${}", column, i + 1));
    }
    assignments.push("updated_at = NOW()".to_string());

    Ok(format!(
        "UPDATE {} SET {} WHERE id = ${} AND deleted_at IS NULL RETURNING {}",
        table,
        assignments.join(", "),
        columns.len() + 1,
        returning
    ))
}
