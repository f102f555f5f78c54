//! Staff login.

use axum::{Json, extract::State};
use serde::Deserialize;
use tracing::info;

use crate::error::{RestError, RestResult};
use crate::extractors::RequiredTenant;
use crate::state::AppState;

/// Login request body.
#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    /// Staff username.
    pub username: String,
    /// Plain-text password.
    pub password: String,
}

/// Issues a bearer token bound to the resolved tenant.
///
/// `POST [base]/auth/login`
///
/// Unknown usernames and wrong passwords both answer 401 with the same message.
pub async fn login_handler(
    State(state): State<AppState>,
    tenant: RequiredTenant,
    Json(request): Json<LoginRequest>,
) -> RestResult<Json<serde_json::Value>> {
    let ctx = tenant.context();
    let staff = state
        .staff()
        .find_by_username(&ctx, request.username.trim())
        .await?
        .ok_or_else(|| RestError::unauthorized("invalid username or password"))?;

    let candidate = staff.clone();
    let verified = tokio::task::spawn_blocking(move || candidate.verify_password(&request.password))
        .await
        .map_err(|e| RestError::internal(format!("password check panicked: {}", e)))?;
    if !verified {
        return Err(RestError::unauthorized("invalid username or password"));
    }

    let token = state.keys().issue(&staff, &tenant.0)?;
    info!(schema = %tenant.0.schema_name, username = %staff.username, "Staff logged in");

    Ok(Json(serde_json::json!({
        "token": token,
        "token_type": "Bearer",
        "expires_in": state.config().jwt_expires_in_hours * 3600,
        "staff": staff,
    })))
}
