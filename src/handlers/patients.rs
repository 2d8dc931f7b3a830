use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use super::{AppState, Page};
use crate::error::ApiError;
use crate::models::{Patient, PatientCreate, PatientUpdate};

pub async fn create_patient(
    State(state): State<AppState>,
    Json(payload): Json<PatientCreate>,
) -> Result<(StatusCode, Json<Patient>), ApiError> {
    let patient = state.db.create_patient(payload).await?;
    Ok((StatusCode::CREATED, Json(patient)))
}

pub async fn list_patients(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<Patient>>, ApiError> {
    let patients = state.db.list_patients(page.skip(), page.limit()).await?;
    Ok(Json(patients))
}

pub async fn get_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Patient>, ApiError> {
    let patient = state
        .db
        .get_patient(id)
        .await?
        .ok_or_else(|| ApiError::not_found("patient", id))?;
    Ok(Json(patient))
}

pub async fn update_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<PatientUpdate>,
) -> Result<Json<Patient>, ApiError> {
    let patient = state
        .db
        .update_patient(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("patient", id))?;
    Ok(Json(patient))
}

pub async fn delete_patient(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_patient(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("patient", id))
    }
}
