//! Route configuration for the HIS REST API.

pub mod routes;

pub use routes::create_routes;
