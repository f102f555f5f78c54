//! Schema-scoped transactions.

use deadpool_postgres::{Client, Object};
use tokio_postgres::Row;
use tokio_postgres::types::ToSql;

use crate::error::{BackendError, StorageError, StorageResult, internal_error};
use crate::tenant::SchemaName;

/// A transaction whose search path is pinned to one schema.
///
/// Created by [`SchemaExecutionContext::begin`](super::SchemaExecutionContext::begin).
/// The search path is set with `SET LOCAL`, so it ends with the transaction.
///
/// Dropping an active transaction detaches its connection from the pool
/// instead of returning it. The server rolls the transaction back when the
/// connection closes, and no half-finished transaction can be handed to
/// another request.
pub struct ScopedTransaction {
    /// Option so we can take it when detaching.
    client: Option<Client>,
    active: bool,
    schema: SchemaName,
}

impl std::fmt::Debug for ScopedTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScopedTransaction")
            .field("active", &self.active)
            .field("schema", &self.schema)
            .finish()
    }
}

impl ScopedTransaction {
    pub(crate) async fn begin(
        client: Client,
        schema: SchemaName,
        search_path_sql: &str,
    ) -> StorageResult<Self> {
        client
            .batch_execute("BEGIN")
            .await
            .map_err(|e| internal_error(format!("Failed to begin transaction: {}", e)))?;

        let mut tx = Self {
            client: Some(client),
            active: true,
            schema,
        };

        let bound = tx.client()?.batch_execute(search_path_sql).await;
        if let Err(e) = bound {
            tx.detach();
            return Err(StorageError::Backend(BackendError::SessionBindFailed {
                schema: tx.schema.to_string(),
                message: e.to_string(),
            }));
        }

        Ok(tx)
    }

    /// The underlying client.
    pub fn client(&self) -> StorageResult<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| internal_error("transaction is no longer active"))
    }

    /// Schema this transaction is scoped to.
    pub fn schema(&self) -> &SchemaName {
        &self.schema
    }

    /// Returns true until commit, rollback or a detach.
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Runs a query and returns all rows.
    pub async fn query(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<Vec<Row>> {
        Ok(self.client()?.query(statement, params).await?)
    }

    /// Runs a query that returns exactly one row.
    pub async fn query_one(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<Row> {
        Ok(self.client()?.query_one(statement, params).await?)
    }

    /// Runs a query that returns at most one row.
    pub async fn query_opt(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<Option<Row>> {
        Ok(self.client()?.query_opt(statement, params).await?)
    }

    /// Executes a statement and returns the number of affected rows.
    pub async fn execute(
        &self,
        statement: &str,
        params: &[&(dyn ToSql + Sync)],
    ) -> StorageResult<u64> {
        Ok(self.client()?.execute(statement, params).await?)
    }

    /// The effective `search_path` inside this transaction.
    pub async fn search_path(&self) -> StorageResult<String> {
        let row = self.query_one("SHOW search_path", &[]).await?;
        Ok(row.try_get(0)?)
    }

    /// Commits the transaction.
    ///
    /// A failed commit detaches the connection.
    pub async fn commit(mut self) -> StorageResult<()> {
        let result = self.client()?.batch_execute("COMMIT").await;
        match result {
            Ok(()) => {
                self.active = false;
                Ok(())
            }
            Err(e) => {
                self.detach();
                Err(e.into())
            }
        }
    }

    /// Rolls the transaction back.
    pub async fn rollback(mut self) -> StorageResult<()> {
        let result = self.client()?.batch_execute("ROLLBACK").await;
        match result {
            Ok(()) => {
                self.active = false;
                Ok(())
            }
            Err(e) => {
                self.detach();
                Err(e.into())
            }
        }
    }

    /// Removes the connection from the pool and closes it.
    fn detach(&mut self) {
        self.active = false;
        if let Some(client) = self.client.take() {
            drop(Object::take(client));
        }
    }
}

impl Drop for ScopedTransaction {
    fn drop(&mut self) {
        if self.active {
            tracing::warn!(
                schema = %self.schema,
                "Scoped transaction dropped without commit or rollback; closing its connection"
            );
            self.detach();
        }
    }
}
