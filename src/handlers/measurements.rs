use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};

use super::AppState;
use crate::error::ApiError;
use crate::models::{
    AnthropometryEntry, AnthropometryEntryCreate, AnthropometryEntryUpdate, BioimpedanceEntry,
    BioimpedanceEntryCreate, BioimpedanceEntryUpdate, SubjectiveEntry, SubjectiveEntryCreate,
    SubjectiveEntryUpdate,
};

// --- Bioimpedance ---

pub async fn create_bioimpedance(
    State(state): State<AppState>,
    Json(payload): Json<BioimpedanceEntryCreate>,
) -> Result<(StatusCode, Json<BioimpedanceEntry>), ApiError> {
    let entry = state.db.create_bioimpedance(payload).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_patient_bioimpedance(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<Vec<BioimpedanceEntry>>, ApiError> {
    let entries = state.db.list_bioimpedance_for_patient(patient_id).await?;
    Ok(Json(entries))
}

pub async fn get_bioimpedance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<BioimpedanceEntry>, ApiError> {
    let entry = state
        .db
        .get_bioimpedance(id)
        .await?
        .ok_or_else(|| ApiError::not_found("bioimpedance entry", id))?;
    Ok(Json(entry))
}

pub async fn update_bioimpedance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<BioimpedanceEntryUpdate>,
) -> Result<Json<BioimpedanceEntry>, ApiError> {
    let entry = state
        .db
        .update_bioimpedance(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("bioimpedance entry", id))?;
    Ok(Json(entry))
}

pub async fn delete_bioimpedance(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_bioimpedance(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("bioimpedance entry", id))
    }
}

// --- Anthropometry ---

pub async fn create_anthropometry(
    State(state): State<AppState>,
    Json(payload): Json<AnthropometryEntryCreate>,
) -> Result<(StatusCode, Json<AnthropometryEntry>), ApiError> {
    let entry = state.db.create_anthropometry(payload).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_patient_anthropometry(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<Vec<AnthropometryEntry>>, ApiError> {
    let entries = state.db.list_anthropometry_for_patient(patient_id).await?;
    Ok(Json(entries))
}

pub async fn get_anthropometry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<AnthropometryEntry>, ApiError> {
    let entry = state
        .db
        .get_anthropometry(id)
        .await?
        .ok_or_else(|| ApiError::not_found("anthropometry entry", id))?;
    Ok(Json(entry))
}

pub async fn update_anthropometry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<AnthropometryEntryUpdate>,
) -> Result<Json<AnthropometryEntry>, ApiError> {
    let entry = state
        .db
        .update_anthropometry(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("anthropometry entry", id))?;
    Ok(Json(entry))
}

pub async fn delete_anthropometry(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_anthropometry(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("anthropometry entry", id))
    }
}

// --- Subjective logs ---

pub async fn create_subjective(
    State(state): State<AppState>,
    Json(payload): Json<SubjectiveEntryCreate>,
) -> Result<(StatusCode, Json<SubjectiveEntry>), ApiError> {
    let entry = state.db.create_subjective(payload).await?;
    Ok((StatusCode::CREATED, Json(entry)))
}

pub async fn list_patient_subjective(
    State(state): State<AppState>,
    Path(patient_id): Path<i64>,
) -> Result<Json<Vec<SubjectiveEntry>>, ApiError> {
    let entries = state.db.list_subjective_for_patient(patient_id).await?;
    Ok(Json(entries))
}

pub async fn get_subjective(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<SubjectiveEntry>, ApiError> {
    let entry = state
        .db
        .get_subjective(id)
        .await?
        .ok_or_else(|| ApiError::not_found("subjective entry", id))?;
    Ok(Json(entry))
}

pub async fn update_subjective(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<SubjectiveEntryUpdate>,
) -> Result<Json<SubjectiveEntry>, ApiError> {
    let entry = state
        .db
        .update_subjective(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("subjective entry", id))?;
    Ok(Json(entry))
}

pub async fn delete_subjective(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<StatusCode, ApiError> {
    if state.db.delete_subjective(id).await? {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(ApiError::not_found("subjective entry", id))
    }
}
