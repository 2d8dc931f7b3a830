pub mod exams;
pub mod lab;
pub mod measurements;
pub mod patients;

use axum::{
    routing::{get, post, put},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::db::Database;
use crate::storage::SignedUrlIssuer;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Database>,
    pub signer: Arc<SignedUrlIssuer>,
}

/// Pagination query parameters shared by the list endpoints.
#[derive(Debug, Deserialize)]
pub struct Page {
    pub skip: Option<i64>,
    pub limit: Option<i64>,
}

impl Page {
    pub fn skip(&self) -> i64 {
        self.skip.unwrap_or(0).max(0)
    }

    pub fn limit(&self) -> i64 {
        self.limit.unwrap_or(100).clamp(1, 500)
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route(
            "/patients",
            post(patients::create_patient).get(patients::list_patients),
        )
        .route(
            "/patients/:id",
            get(patients::get_patient)
                .put(patients::update_patient)
                .delete(patients::delete_patient),
        )
        .route(
            "/patients/:id/lab-results",
            get(lab::list_patient_lab_results),
        )
        .route(
            "/patients/:id/bioimpedance",
            get(measurements::list_patient_bioimpedance),
        )
        .route(
            "/patients/:id/anthropometry",
            get(measurements::list_patient_anthropometry),
        )
        .route(
            "/patients/:id/subjective",
            get(measurements::list_patient_subjective),
        )
        .route(
            "/lab-definitions",
            post(lab::create_lab_definition).get(lab::list_lab_definitions),
        )
        .route(
            "/lab-definitions/:id",
            get(lab::get_lab_definition)
                .put(lab::update_lab_definition)
                .delete(lab::delete_lab_definition),
        )
        .route("/lab-results", post(lab::create_lab_result))
        .route(
            "/lab-results/:id",
            get(lab::get_lab_result)
                .put(lab::update_lab_result)
                .delete(lab::delete_lab_result),
        )
        .route("/bioimpedance", post(measurements::create_bioimpedance))
        .route(
            "/bioimpedance/:id",
            get(measurements::get_bioimpedance)
                .put(measurements::update_bioimpedance)
                .delete(measurements::delete_bioimpedance),
        )
        .route("/anthropometry", post(measurements::create_anthropometry))
        .route(
            "/anthropometry/:id",
            get(measurements::get_anthropometry)
                .put(measurements::update_anthropometry)
                .delete(measurements::delete_anthropometry),
        )
        .route("/subjective", post(measurements::create_subjective))
        .route(
            "/subjective/:id",
            get(measurements::get_subjective)
                .put(measurements::update_subjective)
                .delete(measurements::delete_subjective),
        )
        .route("/exams/upload-url", post(exams::request_upload_url))
        .route(
            "/exams/:id",
            get(exams::get_upload_status).put(exams::update_upload),
        )
        .route(
            "/exams/:id/results",
            get(exams::list_upload_results).post(exams::stage_results),
        )
        .route("/exams/results/:id", put(exams::update_extracted_result))
        .route("/exams/:id/approve", post(exams::approve_upload))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn page_defaults_and_bounds() {
        let page = Page {
            skip: None,
            limit: None,
        };
        assert_eq!(page.skip(), 0);
        assert_eq!(page.limit(), 100);

        let page = Page {
            skip: Some(-5),
            limit: Some(100_000),
        };
        assert_eq!(page.skip(), 0);
        assert_eq!(page.limit(), 500);
    }
}
