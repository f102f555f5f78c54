//! Tenant context extractors.
//!
//! These read the [`TenantContext`] stored by
//! [`tenant_middleware`](crate::middleware::tenant_middleware).

use axum::{extract::FromRequestParts, http::request::Parts};
use his_persistence::tenant::{TenantContext, TenantInfo};

use crate::error::RestError;

/// The resolved context of the request, possibly the shared one.
///
/// # Example
///
/// ```rust,ignore
/// use his_rest::extractors::CurrentTenant;
///
/// async fn handler(CurrentTenant(ctx): CurrentTenant) {
///     println!("public: {}", ctx.is_public());
/// }
/// ```
#[derive(Debug, Clone)]
pub struct CurrentTenant(pub TenantContext);

impl CurrentTenant {
    /// Consumes the extractor and returns the tenant context.
    pub fn into_context(self) -> TenantContext {
        self.0
    }
}

impl<S> FromRequestParts<S> for CurrentTenant
where
    S: Send + Sync,
{
    type Rejection = RestError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<TenantContext>()
            .cloned()
            .map(CurrentTenant)
            .ok_or_else(|| RestError::internal("tenant middleware is not installed"))
    }
}

/// The resolved tenant; rejects the shared context with 400 `tenant_required`.
#[derive(Debug, Clone)]
pub struct RequiredTenant(pub TenantInfo);

impl RequiredTenant {
    /// A context bound to this tenant, for repository calls.
    pub fn context(&self) -> TenantContext {
        TenantContext::for_tenant(self.0.clone())
    }
}

impl<S> FromRequestParts<S> for RequiredTenant
where
    S: Send + Sync,
{
    type Rejection = RestError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let CurrentTenant(ctx) = CurrentTenant::from_request_parts(parts, state).await?;
        let tenant = ctx.require()?;
        Ok(RequiredTenant(tenant.clone()))
    }
}
