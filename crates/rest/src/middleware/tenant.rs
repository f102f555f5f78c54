//! Tenant resolution middleware.
//!
//! Resolves the `Host` header once per request and stores the resulting
//! [`TenantContext`] in the request extensions. Resolution failures end the
//! request here; nothing downstream runs without a context.

use axum::{
    extract::{Request, State},
    http::header::HOST,
    middleware::Next,
    response::{IntoResponse, Response},
};
use his_persistence::tenant::TenantContext;
use tracing::debug;

use crate::error::RestError;
use crate::state::AppState;

/// The `Host` header of a request, if it is valid UTF-8.
pub fn request_host(request: &Request) -> Option<&str> {
    request
        .headers()
        .get(HOST)
        .and_then(|v| v.to_str().ok())
        .or_else(|| request.uri().host())
}

/// Middleware function for tenant resolution.
///
/// Use with `axum::middleware::from_fn_with_state`.
pub async fn tenant_middleware(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    let resolved = state.resolver().resolve(request_host(&request)).await;

    match resolved {
        Ok(ctx) => {
            debug!(schema = ?ctx.schema_name().map(|s| s.as_str()), "Tenant context bound");
            request.extensions_mut().insert::<TenantContext>(ctx);
            next.run(request).await
        }
        Err(e) => RestError::from(e).into_response(),
    }
}
