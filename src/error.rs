use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

use crate::db::ApproveError;
use crate::storage::SignError;

/// Error surface of the request layer. Every variant maps to one
/// distinguishable failure response.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    PreconditionFailed(String),
    #[error("{0}")]
    ServiceUnavailable(String),
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl ApiError {
    pub fn not_found(entity: &str, id: i64) -> Self {
        Self::NotFound(format!("{} {} not found", entity, id))
    }

    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::PreconditionFailed(_) => StatusCode::CONFLICT,
            Self::ServiceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PreconditionFailed(_) => "precondition_failed",
            Self::ServiceUnavailable(_) => "service_unavailable",
            Self::Validation(_) => "validation",
            Self::Database(_) | Self::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "request failed");
        }
        let body = json!({
            "code": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}

impl From<ApproveError> for ApiError {
    fn from(err: ApproveError) -> Self {
        match err {
            ApproveError::NotFound(id) => Self::not_found("exam upload", id),
            ApproveError::NotReady { .. } => Self::PreconditionFailed(err.to_string()),
            ApproveError::Database(e) => Self::Database(e),
        }
    }
}

impl From<SignError> for ApiError {
    fn from(err: SignError) -> Self {
        Self::ServiceUnavailable(format!("could not issue upload credential: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_codes_are_distinguishable() {
        assert_eq!(
            ApiError::not_found("patient", 7).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::PreconditionFailed("not ready".into()).status(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            ApiError::ServiceUnavailable("signer down".into()).status(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ApiError::Validation("bad payload".into()).status(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn approve_errors_map_to_api_errors() {
        use crate::models::UploadStatus;

        let err: ApiError = ApproveError::NotFound(42).into();
        assert!(matches!(err, ApiError::NotFound(_)));

        let err: ApiError = ApproveError::NotReady {
            id: 42,
            status: UploadStatus::Processing,
        }
        .into();
        assert!(matches!(err, ApiError::PreconditionFailed(_)));
    }

    #[test]
    fn not_found_message_names_the_entity() {
        let err = ApiError::not_found("lab result", 3);
        assert_eq!(err.to_string(), "lab result 3 not found");
    }
}
