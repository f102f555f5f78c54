//! Resolved tenant endpoint.

use axum::Json;

use crate::extractors::CurrentTenant;

/// Returns the context the request resolved to.
///
/// `GET [base]/tenant`
///
/// The shared context answers `{"public": true, "tenant": null}`.
pub async fn current_tenant_handler(CurrentTenant(ctx): CurrentTenant) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "public": ctx.is_public(),
        "tenant": ctx.tenant(),
    }))
}
