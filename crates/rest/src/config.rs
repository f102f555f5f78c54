//! Server configuration for the HIS REST API.
//!
//! # Environment Variables
//!
//! | Variable | Default | Description |
//! |----------|---------|-------------|
//! | `HIS_SERVER_PORT` | 8080 | Server port |
//! | `HIS_SERVER_HOST` | 127.0.0.1 | Host to bind |
//! | `HIS_LOG_LEVEL` | info | Log level |
//! | `HIS_REQUEST_TIMEOUT` | 30 | Request timeout (seconds) |
//! | `HIS_ENABLE_CORS` | true | Enable CORS |
//! | `HIS_CORS_ORIGINS` | * | Allowed origins |
//! | `HIS_DATABASE_URL` | | PostgreSQL connection string |
//! | `HIS_JWT_SECRET` | | HS256 signing secret |
//! | `HIS_JWT_EXPIRES_IN_HOURS` | 24 | Token lifetime |
//! | `HIS_RESERVED_SUBDOMAINS` | www,api | Subdomains served from the shared schema |
//!
//! # Example
//!
//! ```rust
//! use his_rest::ServerConfig;
//!
//! let config = ServerConfig {
//!     port: 3000,
//!     host: "0.0.0.0".to_string(),
//!     ..Default::default()
//! };
//! assert_eq!(config.socket_addr(), "0.0.0.0:3000");
//! ```

use clap::Parser;

/// Secret used when none is configured. [`ServerConfig::validate`] rejects it.
pub const INSECURE_DEFAULT_SECRET: &str = "change-me-in-production";

/// Server configuration for the HIS REST API.
#[derive(Debug, Clone, Parser)]
#[command(name = "his")]
#[command(about = "Multi-tenant hospital information server")]
pub struct ServerConfig {
    /// Port to listen on.
    #[arg(short, long, env = "HIS_SERVER_PORT", default_value = "8080")]
    pub port: u16,

    /// Host address to bind to.
    #[arg(long, env = "HIS_SERVER_HOST", default_value = "127.0.0.1")]
    pub host: String,

    /// Log level (error, warn, info, debug, trace).
    #[arg(long, env = "HIS_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// Request timeout in seconds.
    #[arg(long, env = "HIS_REQUEST_TIMEOUT", default_value = "30")]
    pub request_timeout: u64,

    /// Enable CORS.
    #[arg(long, env = "HIS_ENABLE_CORS", default_value = "true")]
    pub enable_cors: bool,

    /// Allowed CORS origins (comma-separated, or * for all).
    #[arg(long, env = "HIS_CORS_ORIGINS", default_value = "*")]
    pub cors_origins: String,

    /// PostgreSQL connection string. Falls back to `HIS_PG_*` variables when unset.
    #[arg(long, env = "HIS_DATABASE_URL")]
    pub database_url: Option<String>,

    /// HS256 secret for bearer tokens.
    #[arg(long, env = "HIS_JWT_SECRET", default_value = INSECURE_DEFAULT_SECRET)]
    pub jwt_secret: String,

    /// Bearer token lifetime in hours.
    #[arg(long, env = "HIS_JWT_EXPIRES_IN_HOURS", default_value = "24")]
    pub jwt_expires_in_hours: i64,

    /// Subdomains that resolve to the shared schema (comma-separated).
    #[arg(long, env = "HIS_RESERVED_SUBDOMAINS", default_value = "www,api")]
    pub reserved_subdomains: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 8080,
            host: "127.0.0.1".to_string(),
            log_level: "info".to_string(),
            request_timeout: 30,
            enable_cors: true,
            cors_origins: "*".to_string(),
            database_url: None,
            jwt_secret: INSECURE_DEFAULT_SECRET.to_string(),
            jwt_expires_in_hours: 24,
            reserved_subdomains: "www,api".to_string(),
        }
    }
}

impl ServerConfig {
    /// Creates a new ServerConfig from environment variables.
    pub fn from_env() -> Self {
        Self::try_parse().unwrap_or_default()
    }

    /// Returns the socket address to bind to.
    pub fn socket_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// The reserved subdomain set, lowercased and without blanks.
    pub fn reserved_subdomain_list(&self) -> Vec<String> {
        self.reserved_subdomains
            .split(',')
            .map(|s| s.trim().to_ascii_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }

    /// Validates the configuration and returns errors if any.
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.port == 0 {
            errors.push("Port cannot be 0".to_string());
        }

        if self.request_timeout == 0 {
            errors.push("Request timeout cannot be 0".to_string());
        }

        if self.jwt_secret.is_empty() || self.jwt_secret == INSECURE_DEFAULT_SECRET {
            errors.push("JWT secret must be set (HIS_JWT_SECRET)".to_string());
        }

        if self.jwt_expires_in_hours <= 0 {
            errors.push("JWT lifetime must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Creates a configuration suitable for testing.
    pub fn for_testing() -> Self {
        Self {
            port: 0,
            log_level: "debug".to_string(),
            request_timeout: 5,
            enable_cors: false,
            jwt_secret: "test-secret".to_string(),
            jwt_expires_in_hours: 1,
            ..Default::default()
        }
    }
}
