//! HIS route configuration.

use axum::{
    Router,
    middleware,
    routing::{get, post},
};

use crate::handlers;
use crate::middleware::tenant_middleware;
use crate::state::AppState;

/// Creates all REST API routes.
///
/// # Routes
///
/// ## Shared or tenant
/// - `GET /health` - Database health
/// - `GET /_liveness` - Liveness probe
/// - `GET /tenant` - The resolved context
///
/// ## Tenant required
/// - `POST /auth/login` - Issue a bearer token
/// - `GET /patients` - Search (`?q=`)
/// - `POST /patients` - Register
/// - `GET /patients/{id}` - Read
/// - `PATCH /patients/{id}` - Partial update
/// - `DELETE /patients/{id}` - Soft delete
/// - `GET /staff` - List staff
/// - `POST /staff` - Create staff (admin)
/// - `GET /staff/{id}` - Read
/// - `PATCH /staff/{id}` - Partial update; changing `is_admin` needs admin
/// - `DELETE /staff/{id}` - Soft delete (admin)
///
/// Every route except the probes runs behind the tenant middleware.
pub fn create_routes(state: AppState) -> Router {
    let tenant_scoped = Router::new()
        .route("/tenant", get(handlers::current_tenant_handler))
        .route("/auth/login", post(handlers::login_handler))
        .route(
            "/patients",
            get(handlers::search_patients_handler).post(handlers::create_patient_handler),
        )
        .route(
            "/patients/{id}",
            get(handlers::get_patient_handler)
                .patch(handlers::update_patient_handler)
                .delete(handlers::delete_patient_handler),
        )
        .route(
            "/staff",
            get(handlers::list_staff_handler).post(handlers::create_staff_handler),
        )
        .route(
            "/staff/{id}",
            get(handlers::get_staff_handler)
                .patch(handlers::update_staff_handler)
                .delete(handlers::delete_staff_handler),
        )
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            tenant_middleware,
        ));

    Router::new()
        .route("/health", get(handlers::health_handler))
        .route("/_liveness", get(handlers::liveness_handler))
        .merge(tenant_scoped)
        .with_state(state)
}
