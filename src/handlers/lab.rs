use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};

use super::{AppState, Page};
use crate::error::ApiError;
use crate::models::{
    LabResult, LabResultCreate, LabResultUpdate, LabTestDefinition, LabTestDefinitionCreate,
    LabTestDefinitionUpdate,
};

// --- Lab test definitions (the reference-range matrix) ---

pub async fn create_lab_definition(
    State(state): State<AppState>,
    Json(payload): Json<LabTestDefinitionCreate>,
) -> Result<(StatusCode, Json<LabTestDefinition>), ApiError> {
    let definition = state.db.create_lab_definition(payload).await?;
    Ok((StatusCode::CREATED, Json(definition)))
}

pub async fn list_lab_definitions(
    State(state): State<AppState>,
    Query(page): Query<Page>,
) -> Result<Json<Vec<LabTestDefinition>>, ApiError> {
    let definitions = state
        .db
        .list_lab_definitions(page.skip(), page.limit())
        .await?;
    Ok(Json(definitions))
}

pub async fn get_lab_definition(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<LabTestDefinition>, ApiError> {
    let definition = state
        .db
        .get_lab_definition(id)
        .await?
        .ok_or_else(|| ApiError::not_found("lab test definition", id))?;
    Ok(Json(definition))
}

pub async fn update_lab_definition(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<LabTestDefinitionUpdate>,
) -> Result<Json<LabTestDefinition>, ApiError> {
    let definition = state
        .db
        .update_lab_definition(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("lab test definition", id))?;
    Ok(Json(definition))
}

pub async fn delete_lab_definition(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_lab_definition(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("lab test definition", id))
    }
}

// --- Lab results ---

pub async fn create_lab_result(
    State(state): State<AppState>,
    Json(payload): Json<LabResultCreate>,
) -> Result<(StatusCode, Json<LabResult>), ApiError> {
    let result = state.db.create_lab_result(payload).await?;
    Ok((StatusCode::CREATED, Json(result)))
}

pub async fn list_patient_lab_results(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<Vec<LabResult>>, ApiError> {
    let results = state.db.list_lab_results_for_patient(patient_id).await?;
    Ok(Json(results))
}

pub async fn get_lab_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<LabResult>, ApiError> {
    let result = state
        .db
        .get_lab_result(id)
        .await?
        .ok_or_else(|| ApiError::not_found("lab result", id))?;
    Ok(Json(result))
}

pub async fn update_lab_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<LabResultUpdate>,
) -> Result<Json<LabResult>, ApiError> {
    let result = state
        .db
        .update_lab_result(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("lab result", id))?;
    Ok(Json(result))
}

pub async fn delete_lab_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_lab_result(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("lab result", id))
    }
}
