//! Per-tenant counter allocation.

use deadpool_postgres::Pool;
use tracing::debug;

use crate::error::{StorageResult, TenantError};

/// Hands out gap-free, strictly increasing counter values per tenant.
///
/// Each allocation runs in its own transaction that locks the tenant row
/// with `SELECT ... FOR UPDATE`, so concurrent callers for the same tenant
/// serialize on the row while other tenants proceed in parallel. Lock waits
/// are bounded by the connection's `lock_timeout`; a timeout or deadlock is
/// returned to the caller unretried.
#[derive(Clone)]
pub struct SequenceAllocator {
    pool: Pool,
    select_sql: String,
    update_sql: String,
}

impl std::fmt::Debug for SequenceAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SequenceAllocator").finish_non_exhaustive()
    }
}

impl SequenceAllocator {
    /// `tenants_table` is the schema-qualified tenant table.
    pub(crate) fn new(pool: Pool, tenants_table: &str) -> Self {
        Self {
            pool,
            select_sql: format!(
                "SELECT hn_running FROM {} WHERE id = $1 FOR UPDATE",
                tenants_table
            ),
            update_sql: format!(
                "UPDATE {} SET hn_running = $2, updated_at = NOW() WHERE id = $1",
                tenants_table
            ),
        }
    }

    /// Increments the tenant's counter and returns the new value.
    ///
    /// The first call for a tenant returns 1.
    pub async fn next_value(&self, tenant_id: i64) -> StorageResult<u64> {
        let mut client = self.pool.get().await?;
        let tx = client.transaction().await?;

        let row = tx
            .query_opt(self.select_sql.as_str(), &[&tenant_id])
            .await?
            .ok_or_else(|| TenantError::NotFound {
                key: tenant_id.to_string(),
            })?;

        let current: i64 = row.try_get(0)?;
        let next = current + 1;

        tx.execute(self.update_sql.as_str(), &[&tenant_id, &next])
            .await?;
        tx.commit().await?;

        debug!(tenant_id, value = next, "Allocated sequence value");
        Ok(next as u64)
    }
}
