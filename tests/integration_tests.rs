//! End-to-end tests against a running server (`cargo run`) backed by a real
//! Postgres database, in the manner of `curl`-level smoke tests. They are
//! ignored by default since they need live infrastructure:
//!
//!     cargo test -- --ignored

use reqwest::Client;
use serde_json::{json, Value};

const BASE_URL: &str = "http://localhost:3000";

async fn create_patient(client: &Client, name: &str, gender: &str) -> i64 {
    let response = client
        .post(format!("{}/patients", BASE_URL))
        .json(&json!({
            "full_name": name,
            "date_of_birth": "1990-01-01",
            "gender": gender,
            "height_cm": 180.0
        }))
        .send()
        .await
        .expect("failed to create patient");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

async fn create_definition(client: &Client, name: &str) -> i64 {
    let response = client
        .post(format!("{}/lab-definitions", BASE_URL))
        .json(&json!({
            "name": name,
            "category": "Teste",
            "unit": "mg/dL",
            "ref_min_male": 10.0,
            "ref_max_male": 100.0,
            "ref_min_female": 10.0,
            "ref_max_female": 90.0
        }))
        .send()
        .await
        .expect("failed to create definition");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    body["id"].as_i64().unwrap()
}

/// Drive an upload to `ready` with staged rows, simulating the worker.
async fn staged_upload(client: &Client, patient_id: i64, rows: Value) -> i64 {
    let response = client
        .post(format!("{}/exams/upload-url", BASE_URL))
        .json(&json!({ "patient_id": patient_id, "filename": "exame.pdf" }))
        .send()
        .await
        .expect("failed to request upload url");
    assert_eq!(response.status(), 201);
    let body: Value = response.json().await.unwrap();
    let upload_id = body["upload_id"].as_i64().unwrap();
    assert!(body["upload_url"].as_str().unwrap().contains("signature="));

    let response = client
        .post(format!("{}/exams/{}/results", BASE_URL, upload_id))
        .json(&rows)
        .send()
        .await
        .expect("failed to stage results");
    assert_eq!(response.status(), 201);

    let response = client
        .put(format!("{}/exams/{}", BASE_URL, upload_id))
        .json(&json!({ "status": "ready", "pages_processed": 3, "tokens_used": 1500 }))
        .send()
        .await
        .expect("failed to mark ready");
    assert_eq!(response.status(), 200);

    upload_id
}

#[tokio::test]
#[ignore = "requires a running server and database"]
async fn patient_crud_round_trip() {
    let client = Client::new();
    let id = create_patient(&client, "Carlos Tatsch", "Masculino").await;

    let body: Value = client
        .get(format!("{}/patients/{}", BASE_URL, id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["full_name"], "Carlos Tatsch");
    assert_eq!(body["gender"], "Masculino");
    assert_eq!(body["height_cm"], 180.0);

    // Partial update leaves unspecified fields unchanged
    let body: Value = client
        .put(format!("{}/patients/{}", BASE_URL, id))
        .json(&json!({ "height_cm": 181.5 }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["height_cm"], 181.5);
    assert_eq!(body["full_name"], "Carlos Tatsch");

    let response = client
        .delete(format!("{}/patients/{}", BASE_URL, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client
        .get(format!("{}/patients/{}", BASE_URL, id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "not_found");
}

#[tokio::test]
#[ignore = "requires a running server and database"]
async fn bioimpedance_round_trips_all_numeric_fields() {
    let client = Client::new();
    let patient_id = create_patient(&client, "Bio Paciente", "Masculino").await;

    let payload = json!({
        "patient_id": patient_id,
        "date": "2024-03-01",
        "weight_kg": 80.0,
        "bmi": 24.7,
        "body_fat_percent": 15.0,
        "fat_mass_kg": 12.0,
        "muscle_mass_kg": 60.0,
        "visceral_fat_level": 5.0,
        "basal_metabolic_rate_kcal": 1800,
        "hydration_percent": 60.0
    });

    let response = client
        .post(format!("{}/bioimpedance", BASE_URL))
        .json(&payload)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 201);
    let created: Value = response.json().await.unwrap();

    let fetched: Value = client
        .get(format!("{}/bioimpedance/{}", BASE_URL, created["id"]))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();

    for field in [
        "weight_kg",
        "bmi",
        "body_fat_percent",
        "fat_mass_kg",
        "muscle_mass_kg",
        "visceral_fat_level",
        "basal_metabolic_rate_kcal",
        "hydration_percent",
    ] {
        assert_eq!(fetched[field], payload[field], "field {} changed", field);
    }
}

#[tokio::test]
#[ignore = "requires a running server and database"]
async fn approval_promotes_only_matched_rows() {
    let client = Client::new();
    let patient_id = create_patient(&client, "Exame Paciente", "Masculino").await;
    let def_id = create_definition(&client, &format!("Exame Teste {}", patient_id)).await;

    // Three staged rows, two matched: approval must create exactly two
    // results, skipping the unmatched row regardless of its confidence.
    let upload_id = staged_upload(
        &client,
        patient_id,
        json!([
            {
                "raw_test_name": "GLICOSE",
                "matched_test_definition_id": def_id,
                "value": 50.0,
                "unit": "mg/dL",
                "confidence_score": 0.95
            },
            {
                "raw_test_name": "HEMOGLOBINA GLICADA",
                "matched_test_definition_id": def_id,
                "value": 120.0,
                "unit": "mg/dL",
                "confidence_score": 0.88
            },
            {
                "raw_test_name": "EXAME DESCONHECIDO",
                "matched_test_definition_id": null,
                "value": 1.0,
                "unit": "?",
                "confidence_score": 0.99
            }
        ]),
    )
    .await;

    let response = client
        .post(format!("{}/exams/{}/approve", BASE_URL, upload_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 200);
    let outcome: Value = response.json().await.unwrap();
    assert_eq!(outcome["results_created"], 2);
    assert_eq!(outcome["status"], "approved");

    let results: Value = client
        .get(format!("{}/patients/{}/lab-results", BASE_URL, patient_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let results = results.as_array().unwrap();
    assert_eq!(results.len(), 2);
    // Flags were classified against the male range (10-100)
    assert_eq!(results[0]["flag"], "Normal");
    assert_eq!(results[1]["flag"], "Alto");

    // Re-approval is rejected now that the upload is approved
    let response = client
        .post(format!("{}/exams/{}/approve", BASE_URL, upload_id))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 409);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["code"], "precondition_failed");
}

#[tokio::test]
#[ignore = "requires a running server and database"]
async fn approval_requires_ready_status() {
    let client = Client::new();
    let patient_id = create_patient(&client, "Pendente Paciente", "Feminino").await;

    let response = client
        .post(format!("{}/exams/upload-url", BASE_URL))
        .json(&json!({ "patient_id": patient_id, "filename": "exame.pdf" }))
        .send()
        .await
        .unwrap();
    let upload_id = response.json::<Value>().await.unwrap()["upload_id"]
        .as_i64()
        .unwrap();

    for status in ["pending_upload", "processing", "failed"] {
        client
            .put(format!("{}/exams/{}", BASE_URL, upload_id))
            .json(&json!({ "status": status }))
            .send()
            .await
            .unwrap();
        let response = client
            .post(format!("{}/exams/{}/approve", BASE_URL, upload_id))
            .send()
            .await
            .unwrap();
        assert_eq!(response.status(), 409, "status {} must reject", status);
    }
}

#[tokio::test]
#[ignore = "requires a running server and database"]
async fn reviewer_can_correct_staged_rows() {
    let client = Client::new();
    let patient_id = create_patient(&client, "Revisor Paciente", "Masculino").await;
    let def_id = create_definition(&client, &format!("Revisao Teste {}", patient_id)).await;

    let upload_id = staged_upload(
        &client,
        patient_id,
        json!([{
            "raw_test_name": "GLICOSE",
            "matched_test_definition_id": null,
            "value": 48.0,
            "unit": "mg/dl",
            "confidence_score": 0.4
        }]),
    )
    .await;

    let staged: Value = client
        .get(format!("{}/exams/{}/results", BASE_URL, upload_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    let row_id = staged[0]["id"].as_i64().unwrap();
    assert!(staged[0]["matched_definition"].is_null());

    // Attach the right definition and fix the unit
    let corrected: Value = client
        .put(format!("{}/exams/results/{}", BASE_URL, row_id))
        .json(&json!({ "matched_test_definition_id": def_id, "unit": "mg/dL" }))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(corrected["matched_test_definition_id"], def_id);
    assert_eq!(corrected["unit"], "mg/dL");

    let staged: Value = client
        .get(format!("{}/exams/{}/results", BASE_URL, upload_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(staged[0]["matched_definition"]["id"], def_id);

    let outcome: Value = client
        .post(format!("{}/exams/{}/approve", BASE_URL, upload_id))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["results_created"], 1);
}

#[tokio::test]
#[ignore = "requires a running server and database"]
async fn upload_url_rejects_unknown_patient() {
    let client = Client::new();
    let response = client
        .post(format!("{}/exams/upload-url", BASE_URL))
        .json(&json!({ "patient_id": 999_999_999, "filename": "exame.pdf" }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);
}
