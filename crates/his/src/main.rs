//! HIS server
//!
//! Serves the subdomain-routed hospital API over one shared PostgreSQL
//! database with a schema per hospital.

use clap::Parser;
use his_persistence::postgres::PostgresBackend;
use his_rest::{ServerConfig, create_app, init_logging};
use tracing::info;

/// Builds the lazy pool from `--database-url` or the `HIS_PG_*` variables.
fn create_backend(config: &ServerConfig) -> anyhow::Result<PostgresBackend> {
    let backend = match config.database_url.as_deref() {
        Some(url) => {
            info!("Initializing PostgreSQL backend from connection string");
            PostgresBackend::from_connection_string(url)?
        }
        None => {
            info!("Initializing PostgreSQL backend from environment variables");
            PostgresBackend::from_env()?
        }
    };
    Ok(backend)
}

/// Starts the Axum HTTP server.
async fn serve(app: axum::Router, config: &ServerConfig) -> anyhow::Result<()> {
    let addr = config.socket_addr();
    info!(address = %addr, "Server listening");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown signal received");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ServerConfig::parse();
    init_logging(&config.log_level);

    if let Err(errors) = config.validate() {
        for error in &errors {
            eprintln!("Configuration error: {}", error);
        }
        std::process::exit(1);
    }

    info!(
        port = config.port,
        host = %config.host,
        reserved = %config.reserved_subdomains,
        "Starting HIS server"
    );

    let backend = create_backend(&config)?;
    backend.init_schema().await?;

    let app = create_app(backend, config.clone());
    serve(app, &config).await
}
