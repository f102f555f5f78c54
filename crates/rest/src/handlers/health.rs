//! Health check endpoint handlers.

use axum::{
    Json,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::{debug, warn};

use crate::state::AppState;

/// Handler for the health check endpoint.
///
/// # HTTP Request
///
/// `GET [base]/health`
///
/// # Response
///
/// - `200 OK` - The database answers
/// - `503 Service Unavailable` - It does not
pub async fn health_handler(State(state): State<AppState>) -> Response {
    debug!("Processing health check request");

    let (status, label) = match state.backend().health_check().await {
        Ok(()) => (StatusCode::OK, "healthy"),
        Err(e) => {
            warn!(error = %e, "Health check failed");
            (StatusCode::SERVICE_UNAVAILABLE, "unhealthy")
        }
    };

    let body = serde_json::json!({
        "status": label,
        "cached_sessions": state.sessions().cached_len(),
        "timestamp": chrono::Utc::now().to_rfc3339()
    });

    (status, Json(body)).into_response()
}

/// Liveness probe; never touches the database.
///
/// `GET [base]/_liveness`
pub async fn liveness_handler() -> impl IntoResponse {
    StatusCode::OK
}
