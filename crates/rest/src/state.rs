//! Application state for the HIS REST API.
//!
//! Everything here is built once at startup and shared by reference; the
//! session manager in particular is owned by the state, not by a global.

use std::sync::Arc;

use chrono::Duration;
use his_persistence::postgres::{PostgresBackend, PostgresSessionManager};
use his_persistence::records::{PatientRepository, StaffRepository};
use his_persistence::tenant::{TenantDirectory, TenantRegistry};

use crate::auth::JwtKeys;
use crate::config::ServerConfig;
use crate::tenant::RequestTenantResolver;

/// Shared application state for the REST API.
///
/// # Example
///
/// ```rust,no_run
/// use his_persistence::postgres::{PostgresBackend, PostgresConfig};
/// use his_rest::{AppState, ServerConfig};
///
/// # fn example() -> Result<(), his_persistence::StorageError> {
/// let backend = PostgresBackend::new(PostgresConfig::from_env())?;
/// let state = AppState::new(backend, ServerConfig::default());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct AppState {
    config: Arc<ServerConfig>,
    backend: PostgresBackend,
    registry: TenantRegistry,
    sessions: Arc<PostgresSessionManager>,
    resolver: Arc<RequestTenantResolver>,
    keys: JwtKeys,
    patients: PatientRepository,
    staff: StaffRepository,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish_non_exhaustive()
    }
}

impl AppState {
    /// Builds the state over `backend`. Tenants are resolved through the registry.
    pub fn new(backend: PostgresBackend, config: ServerConfig) -> Self {
        let registry = TenantRegistry::new(backend.clone());
        let sessions = Arc::new(PostgresSessionManager::new(Arc::new(backend.clone())));
        let resolver = RequestTenantResolver::new(
            Arc::new(registry.clone()),
            config.reserved_subdomain_list(),
        );
        let keys = JwtKeys::new(
            &config.jwt_secret,
            Duration::hours(config.jwt_expires_in_hours),
        );

        Self {
            patients: PatientRepository::new(sessions.clone(), registry.clone()),
            staff: StaffRepository::new(sessions.clone()),
            config: Arc::new(config),
            backend,
            registry,
            sessions,
            resolver: Arc::new(resolver),
            keys,
        }
    }

    /// Resolves tenants through `directory` instead of the registry.
    pub fn with_directory(mut self, directory: Arc<dyn TenantDirectory>) -> Self {
        self.resolver = Arc::new(RequestTenantResolver::new(
            directory,
            self.config.reserved_subdomain_list(),
        ));
        self
    }

    /// Returns a reference to the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// The database backend.
    pub fn backend(&self) -> &PostgresBackend {
        &self.backend
    }

    /// The tenant registry.
    pub fn registry(&self) -> &TenantRegistry {
        &self.registry
    }

    /// The per-schema execution context cache.
    pub fn sessions(&self) -> &Arc<PostgresSessionManager> {
        &self.sessions
    }

    /// The host resolver.
    pub fn resolver(&self) -> &RequestTenantResolver {
        &self.resolver
    }

    /// Token keys.
    pub fn keys(&self) -> &JwtKeys {
        &self.keys
    }

    /// Patient records.
    pub fn patients(&self) -> &PatientRepository {
        &self.patients
    }

    /// Staff accounts.
    pub fn staff(&self) -> &StaffRepository {
        &self.staff
    }
}
