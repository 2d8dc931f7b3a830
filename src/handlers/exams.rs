use axum::{
    extract::{Path, State},
    http::StatusCode,
    Json,
};
use chrono::Utc;

use super::AppState;
use crate::error::ApiError;
use crate::models::{
    ApprovalOutcome, ExamUpload, ExamUploadUpdate, ExtractedLabResult, ExtractedLabResultCreate,
    ExtractedLabResultUpdate, StagedResult, UploadUrlRequest, UploadUrlResponse,
};
use crate::storage;

/// Start an upload: record the ExamUpload row and hand back a short-lived
/// write-only URL for the object store.
pub async fn request_upload_url(
    State(state): State<AppState>,
    Json(payload): Json<UploadUrlRequest>,
) -> Result<(StatusCode, Json<UploadUrlResponse>), ApiError> {
    if payload.filename.trim().is_empty() {
        return Err(ApiError::Validation("filename must not be empty".into()));
    }
    state
        .db
        .get_patient(payload.patient_id)
        .await?
        .ok_or_else(|| ApiError::not_found("patient", payload.patient_id))?;

    let key = storage::object_key(payload.patient_id, &payload.filename, Utc::now());
    let presigned = state.signer.presign_put(&key, &payload.content_type)?;
    let upload = state
        .db
        .create_exam_upload(payload.patient_id, &payload.filename, &key)
        .await?;

    tracing::info!(
        upload_id = upload.id,
        patient_id = upload.patient_id,
        storage_key = %key,
        "issued upload credential"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadUrlResponse {
            upload_id: upload.id,
            storage_key: key,
            upload_url: presigned.url,
            expires_at: presigned.expires_at,
        }),
    ))
}

/// Polling endpoint: reviewers watch this until the worker reports `ready`
/// or `failed`.
pub async fn get_upload_status(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ExamUpload>, ApiError> {
    let upload = state
        .db
        .get_exam_upload(id)
        .await?
        .ok_or_else(|| ApiError::not_found("exam upload", id))?;
    Ok(Json(upload))
}

/// Worker write surface: status plus page/token usage counters.
pub async fn update_upload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ExamUploadUpdate>,
) -> Result<Json<ExamUpload>, ApiError> {
    let upload = state
        .db
        .update_exam_upload(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("exam upload", id))?;
    Ok(Json(upload))
}

/// Worker write surface: insert candidate values extracted from a document.
pub async fn stage_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<Vec<ExtractedLabResultCreate>>,
) -> Result<(StatusCode, Json<Vec<ExtractedLabResult>>), ApiError> {
    state
        .db
        .get_exam_upload(id)
        .await?
        .ok_or_else(|| ApiError::not_found("exam upload", id))?;

    let staged = state.db.stage_extracted_results(id, payload).await?;
    Ok((StatusCode::CREATED, Json(staged)))
}

pub async fn list_upload_results(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<Vec<StagedResult>>, ApiError> {
    state
        .db
        .get_exam_upload(id)
        .await?
        .ok_or_else(|| ApiError::not_found("exam upload", id))?;

    let staged = state.db.list_extracted_results(id).await?;
    Ok(Json(staged))
}

/// Reviewer correction of one staged row. Deliberately unconstrained by the
/// upload's state.
pub async fn update_extracted_result(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Json(payload): Json<ExtractedLabResultUpdate>,
) -> Result<Json<ExtractedLabResult>, ApiError> {
    let result = state
        .db
        .update_extracted_result(id, payload)
        .await?
        .ok_or_else(|| ApiError::not_found("extracted result", id))?;
    Ok(Json(result))
}

/// Commit: staged rows with a resolved match become permanent lab results.
pub async fn approve_upload(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApprovalOutcome>, ApiError> {
    let outcome = state.db.approve_exam_upload(id).await?;
    Ok(Json(outcome))
}
