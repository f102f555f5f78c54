//! # his-rest - subdomain-routed HTTP adapter
//!
//! The request-facing side of the hospital information system. Each request
//! names its tenant through the `Host` header; the tenant middleware resolves
//! it against the registry and binds a request-scoped
//! [`TenantContext`](his_persistence::TenantContext). Record handlers then run
//! against that tenant's schema only.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use his_persistence::postgres::{PostgresBackend, PostgresConfig};
//! use his_rest::{create_app, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let backend = PostgresBackend::new(PostgresConfig::from_env())?;
//!     backend.init_schema().await?;
//!
//!     let config = ServerConfig::from_env();
//!     let app = create_app(backend, config.clone());
//!
//!     let listener = tokio::net::TcpListener::bind(config.socket_addr()).await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```
//!
//! ## Tenant Resolution
//!
//! | Host | Context |
//! |------|---------|
//! | `localhost:8080`, `127.0.0.1` | shared |
//! | `www.his.example.com`, `api.localhost` | shared (reserved) |
//! | `bangkok.his.example.com`, `bangkok.localhost` | tenant `bangkok` or an error |
//!
//! ## Error Handling
//!
//! Errors are returned as `{"error": {"code", "message"}}`; see [`error`].
//!
//! ## Architecture
//!
//! - [`config`] - Server configuration
//! - [`error`] - Error types and status mapping
//! - [`state`] - Application state (repositories, resolver, keys)
//! - [`tenant`] - Host to tenant resolution
//! - [`auth`] - Bearer tokens and the schema claim check
//! - [`middleware`] - Tenant middleware
//! - [`extractors`] - Tenant and caller extractors
//! - [`handlers`] - HTTP request handlers
//! - [`routing`] - Route configuration

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod auth;
pub mod config;
pub mod error;
pub mod extractors;
pub mod handlers;
pub mod middleware;
pub mod routing;
pub mod state;
pub mod tenant;

pub use config::ServerConfig;
pub use error::{RestError, RestResult};
pub use state::AppState;

use axum::Router;
use his_persistence::postgres::PostgresBackend;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;

/// Creates the Axum application over `backend`.
pub fn create_app(backend: PostgresBackend, config: ServerConfig) -> Router {
    info!(
        public_schema = %backend.public_schema(),
        reserved = %config.reserved_subdomains,
        "Creating HIS REST API"
    );
    create_app_with_state(AppState::new(backend, config))
}

/// Creates the Axum application from prepared state.
pub fn create_app_with_state(state: AppState) -> Router {
    let config = state.config().clone();
    let router = routing::create_routes(state);

    let service_builder = ServiceBuilder::new()
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TimeoutLayer::with_status_code(
            axum::http::StatusCode::REQUEST_TIMEOUT,
            std::time::Duration::from_secs(config.request_timeout),
        ));

    let router = if config.enable_cors {
        router.layer(build_cors_layer(&config))
    } else {
        router
    };

    router.layer(service_builder)
}

/// Builds the CORS layer based on configuration.
fn build_cors_layer(config: &ServerConfig) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);

    if config.cors_origins == "*" {
        cors.allow_origin(Any)
    } else {
        let origins: Vec<_> = config
            .cors_origins
            .split(',')
            .filter_map(|s| s.trim().parse().ok())
            .collect();
        cors.allow_origin(origins)
    }
}

/// Initializes the tracing subscriber for logging.
///
/// `RUST_LOG` wins when set; otherwise `level` applies to the HIS crates.
pub fn init_logging(level: &str) {
    use tracing_subscriber::{EnvFilter, fmt, prelude::*};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!(
            "his_rest={level},his_persistence={level},his={level},his_tenant={level},tower_http=debug"
        ))
    });

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}
