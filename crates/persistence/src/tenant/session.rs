//! Per-schema execution context cache.
//!
//! [`TenantSessionManager`] hands out one execution context per tenant schema
//! and binds each schema at most once, even under concurrent first requests.
//! A failed bind leaves no cache entry, so the next request retries. The
//! same holds when a cached context later fails to pin its schema.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::OnceCell;
use tracing::{debug, warn};

use super::schema_name::{PUBLIC_SCHEMA, SchemaName};
use crate::error::{BackendError, StorageError, StorageResult};

/// Creates execution contexts bound to a schema.
#[async_trait]
pub trait SessionFactory: Send + Sync + 'static {
    /// Context type handed to callers.
    type Session: Send + Sync + 'static;

    /// Context bound to the shared schema only.
    fn base_session(&self) -> Self::Session;

    /// Binds a new context to `schema`.
    ///
    /// Called at most once per schema by [`TenantSessionManager`] while the
    /// resulting context stays cached.
    async fn bind(&self, schema: &SchemaName) -> StorageResult<Self::Session>;
}

type SessionCell<S> = Arc<OnceCell<Arc<S>>>;

/// Thread-safe cache of schema-bound execution contexts.
pub struct TenantSessionManager<F: SessionFactory> {
    factory: Arc<F>,
    base: Arc<F::Session>,
    sessions: RwLock<HashMap<String, SessionCell<F::Session>>>,
}

impl<F: SessionFactory> std::fmt::Debug for TenantSessionManager<F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TenantSessionManager")
            .field("cached", &self.cached_len())
            .finish_non_exhaustive()
    }
}

impl<F: SessionFactory> TenantSessionManager<F> {
    /// Creates a manager; the base context is built immediately.
    pub fn new(factory: Arc<F>) -> Self {
        let base = Arc::new(factory.base_session());
        Self {
            factory,
            base,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    /// The underlying factory.
    pub fn factory(&self) -> &Arc<F> {
        &self.factory
    }

    /// The shared-schema context.
    pub fn base_session(&self) -> Arc<F::Session> {
        Arc::clone(&self.base)
    }

    /// Returns the context for `schema_name`, binding it on first use.
    ///
    /// An empty name or the shared schema name returns the base context.
    /// Any other name is validated before a bind is attempted.
    pub async fn session_for(&self, schema_name: &str) -> StorageResult<Arc<F::Session>> {
        if schema_name.is_empty() || schema_name == PUBLIC_SCHEMA {
            return Ok(self.base_session());
        }

        let schema = SchemaName::parse(schema_name)?;
        let cell = self.cell_for(schema.as_str());

        let result = cell
            .get_or_try_init(|| async {
                debug!(schema = %schema, "Binding execution context");
                self.factory.bind(&schema).await.map(Arc::new)
            })
            .await;

        match result {
            Ok(session) => Ok(Arc::clone(session)),
            Err(e) => {
                warn!(schema = %schema, error = %e, "Failed to bind execution context");
                self.evict_failed(schema.as_str(), &cell);
                Err(e)
            }
        }
    }

    /// Runs `op` on the context for `schema_name`.
    ///
    /// If `op` fails with [`BackendError::SessionBindFailed`], the cached
    /// context is dropped and the next lookup binds anew.
    pub async fn with_session<T, Op, Fut>(&self, schema_name: &str, op: Op) -> StorageResult<T>
    where
        Op: FnOnce(Arc<F::Session>) -> Fut,
        Fut: Future<Output = StorageResult<T>>,
    {
        let session = self.session_for(schema_name).await?;
        let result = op(session).await;
        if let Err(StorageError::Backend(BackendError::SessionBindFailed { message, .. })) = &result {
            if self.invalidate(schema_name) {
                warn!(schema = %schema_name, error = %message, "Evicted execution context");
            }
        }
        result
    }

    /// Drops the cached context for `schema_name`, if any.
    ///
    /// Callers holding the old context keep it; the next lookup binds anew.
    pub fn invalidate(&self, schema_name: &str) -> bool {
        self.sessions.write().remove(schema_name).is_some()
    }

    /// Number of cached tenant contexts.
    pub fn cached_len(&self) -> usize {
        self.sessions.read().len()
    }

    fn cell_for(&self, schema: &str) -> SessionCell<F::Session> {
        if let Some(cell) = self.sessions.read().get(schema) {
            return Arc::clone(cell);
        }

        let mut sessions = self.sessions.write();
        Arc::clone(
            sessions
                .entry(schema.to_string())
                .or_insert_with(|| Arc::new(OnceCell::new())),
        )
    }

    fn evict_failed(&self, schema: &str, cell: &SessionCell<F::Session>) {
        let mut sessions = self.sessions.write();
        let stale = sessions
            .get(schema)
            .is_some_and(|current| Arc::ptr_eq(current, cell) && !current.initialized());
        if stale {
            sessions.remove(schema);
        }
    }
}
