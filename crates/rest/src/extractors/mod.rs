//! Axum extractors for tenant and caller identity.
//!
//! - [`CurrentTenant`] - The resolved context, shared or tenant
//! - [`RequiredTenant`] - The resolved tenant; the shared context is rejected
//! - [`Authenticated`] - A required tenant plus a matching bearer token
//! - [`AdminOnly`] - An authenticated caller with the admin flag

mod auth;
mod tenant;

pub use auth::{AdminOnly, Authenticated};
pub(crate) use auth::require_admin;
pub use tenant::{CurrentTenant, RequiredTenant};
