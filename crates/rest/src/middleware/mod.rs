//! HTTP middleware for the HIS REST API.
//!
//! - [`tenant`] - Host header to tenant context resolution

pub mod tenant;

pub use tenant::tenant_middleware;
