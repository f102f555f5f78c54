//! Staff account endpoints.
//!
//! Reading and editing need a matching bearer token; creating, deleting and
//! changing the admin flag also need the token's admin flag.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use his_persistence::records::{NewStaff, Staff, StaffPatch};

use crate::error::RestResult;
use crate::extractors::{AdminOnly, Authenticated, require_admin};
use crate::state::AppState;

/// `GET [base]/staff`
pub async fn list_staff_handler(
    State(state): State<AppState>,
    caller: Authenticated,
) -> RestResult<Json<Vec<Staff>>> {
    Ok(Json(state.staff().list(&caller.context()).await?))
}

/// `POST [base]/staff`
pub async fn create_staff_handler(
    State(state): State<AppState>,
    admin: AdminOnly,
    Json(staff): Json<NewStaff>,
) -> RestResult<(StatusCode, Json<Staff>)> {
    let created = state.staff().create(&admin.context(), staff).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET [base]/staff/{id}`
pub async fn get_staff_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<i32>,
) -> RestResult<Json<Staff>> {
    Ok(Json(state.staff().get(&caller.context(), id).await?))
}

/// `PATCH [base]/staff/{id}`
pub async fn update_staff_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<i32>,
    Json(patch): Json<StaffPatch>,
) -> RestResult<Json<Staff>> {
    if patch.touches_admin_flag() {
        require_admin(&caller.claims)?;
    }
    let updated = state
        .staff()
        .update(&caller.context(), id, patch.into_updates())
        .await?;
    Ok(Json(updated))
}

/// `DELETE [base]/staff/{id}`
pub async fn delete_staff_handler(
    State(state): State<AppState>,
    admin: AdminOnly,
    Path(id): Path<i32>,
) -> RestResult<StatusCode> {
    state.staff().delete(&admin.context(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
