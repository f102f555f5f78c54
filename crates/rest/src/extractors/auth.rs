//! Authenticated-caller extractor.

use axum::{extract::FromRequestParts, http::request::Parts};
use his_persistence::tenant::{TenantContext, TenantInfo};
use tracing::warn;

use super::tenant::RequiredTenant;
use crate::auth::{Claims, bearer_token, ensure_schema_matches};
use crate::error::RestError;
use crate::state::AppState;

/// A caller with a valid bearer token issued for the resolved tenant.
///
/// Rejects, in order: the shared context (400), a missing or invalid token
/// (401), and a token bound to another schema (403).
#[derive(Debug, Clone)]
pub struct Authenticated {
    /// Verified token claims.
    pub claims: Claims,
    /// The tenant the request resolved to.
    pub tenant: TenantInfo,
}

impl Authenticated {
    /// A context bound to the tenant, for repository calls.
    pub fn context(&self) -> TenantContext {
        TenantContext::for_tenant(self.tenant.clone())
    }
}

impl FromRequestParts<AppState> for Authenticated {
    type Rejection = RestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let RequiredTenant(tenant) = RequiredTenant::from_request_parts(parts, state).await?;
        let token = bearer_token(&parts.headers)?;
        let claims = state.keys().decode(token)?;

        let ctx = TenantContext::for_tenant(tenant.clone());
        if let Err(e) = ensure_schema_matches(&claims, &ctx) {
            warn!(
                claimed = %claims.schema_name,
                resolved = %tenant.schema_name,
                username = %claims.username,
                "Token presented to a foreign tenant"
            );
            return Err(e.into());
        }

        Ok(Authenticated { claims, tenant })
    }
}

/// An [`Authenticated`] caller whose token carries the admin flag; others get 403.
#[derive(Debug, Clone)]
pub struct AdminOnly(pub Authenticated);

impl AdminOnly {
    /// A context bound to the tenant, for repository calls.
    pub fn context(&self) -> TenantContext {
        self.0.context()
    }
}

impl FromRequestParts<AppState> for AdminOnly {
    type Rejection = RestError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let caller = Authenticated::from_request_parts(parts, state).await?;
        require_admin(&caller.claims)?;
        Ok(AdminOnly(caller))
    }
}

/// Rejects claims without the admin flag.
pub(crate) fn require_admin(claims: &Claims) -> Result<(), RestError> {
    if claims.is_admin {
        return Ok(());
    }
    warn!(
        username = %claims.username,
        schema = %claims.schema_name,
        "Admin action refused"
    );
    Err(RestError::Forbidden {
        code: "admin_required",
        message: "this action requires an administrator".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::response::IntoResponse;

    fn claims(is_admin: bool) -> Claims {
        Claims {
            sub: "nurse01".to_string(),
            user_id: 2,
            username: "nurse01".to_string(),
            is_admin,
            tenant_id: 1,
            schema_name: "tenant_hosp001".to_string(),
            exp: 0,
            iat: 0,
        }
    }

    #[test]
    fn test_require_admin_accepts_admin() {
        assert!(require_admin(&claims(true)).is_ok());
    }

    #[test]
    fn test_require_admin_rejects_staff() {
        let err = require_admin(&claims(false)).unwrap_err();
        assert!(matches!(err, RestError::Forbidden { code: "admin_required", .. }));
        assert_eq!(err.into_response().status(), StatusCode::FORBIDDEN);
    }
}
