//! Patient endpoints. All of them need a tenant and a matching bearer token.

use axum::{
    Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use his_persistence::records::{NewPatient, Patient, PatientPatch};
use serde::Deserialize;

use crate::error::RestResult;
use crate::extractors::Authenticated;
use crate::state::AppState;

/// Query string of the search endpoint.
#[derive(Debug, Default, Deserialize)]
pub struct SearchQuery {
    /// Case-insensitive substring over names, HN and identifiers.
    #[serde(default)]
    pub q: Option<String>,
}

/// `POST [base]/patients`
pub async fn create_patient_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Json(patient): Json<NewPatient>,
) -> RestResult<(StatusCode, Json<Patient>)> {
    let created = state.patients().create(&caller.context(), patient).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// `GET [base]/patients?q=...`
pub async fn search_patients_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Query(query): Query<SearchQuery>,
) -> RestResult<Json<Vec<Patient>>> {
    let q = query.q.unwrap_or_default();
    let patients = state.patients().search(&caller.context(), &q).await?;
    Ok(Json(patients))
}

/// `GET [base]/patients/{id}`
pub async fn get_patient_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<i32>,
) -> RestResult<Json<Patient>> {
    Ok(Json(state.patients().get(&caller.context(), id).await?))
}

/// `PATCH [base]/patients/{id}`
pub async fn update_patient_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<i32>,
    Json(patch): Json<PatientPatch>,
) -> RestResult<Json<Patient>> {
    let updated = state
        .patients()
        .update(&caller.context(), id, patch.into_updates())
        .await?;
    Ok(Json(updated))
}

/// `DELETE [base]/patients/{id}`
pub async fn delete_patient_handler(
    State(state): State<AppState>,
    caller: Authenticated,
    Path(id): Path<i32>,
) -> RestResult<StatusCode> {
    state.patients().delete(&caller.context(), id).await?;
    Ok(StatusCode::NO_CONTENT)
}
