use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

// --- Patients ---

/// Core patient demographic data.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Patient {
    pub id: i64,
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    /// "Masculino" or "Feminino"; selects the sex-specific reference range.
    pub gender: String,
    pub height_cm: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PatientCreate {
    pub full_name: String,
    pub date_of_birth: NaiveDate,
    pub gender: String,
    pub height_cm: f64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PatientUpdate {
    pub full_name: Option<String>,
    pub date_of_birth: Option<NaiveDate>,
    pub gender: Option<String>,
    pub height_cm: Option<f64>,
}

// --- Lab test definitions ---

/// One row of the reference-range matrix. Unique by name; seeded out-of-band.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LabTestDefinition {
    pub id: i64,
    pub name: String,
    pub category: String,
    pub unit: String,
    pub ref_min_male: Option<f64>,
    pub ref_max_male: Option<f64>,
    pub ref_min_female: Option<f64>,
    pub ref_max_female: Option<f64>,
}

impl LabTestDefinition {
    /// Reference bounds applicable to the given patient gender. Unknown
    /// genders get no bounds, so classification yields no flag.
    pub fn range_for(&self, gender: &str) -> (Option<f64>, Option<f64>) {
        match gender {
            "Masculino" => (self.ref_min_male, self.ref_max_male),
            "Feminino" => (self.ref_min_female, self.ref_max_female),
            _ => (None, None),
        }
    }

    pub fn classify(&self, gender: &str, value: f64) -> Option<Flag> {
        let (min, max) = self.range_for(gender);
        classify_flag(value, min, max)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabTestDefinitionCreate {
    pub name: String,
    pub category: String,
    pub unit: String,
    pub ref_min_male: Option<f64>,
    pub ref_max_male: Option<f64>,
    pub ref_min_female: Option<f64>,
    pub ref_max_female: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabTestDefinitionUpdate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub unit: Option<String>,
    pub ref_min_male: Option<f64>,
    pub ref_max_male: Option<f64>,
    pub ref_min_female: Option<f64>,
    pub ref_max_female: Option<f64>,
}

// --- Lab results ---

/// Vertical blood-work storage: one row per (patient, test, date).
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct LabResult {
    pub id: i64,
    pub patient_id: i64,
    pub test_definition_id: i64,
    pub collection_date: NaiveDate,
    pub value: f64,
    /// Cached classification set at write time, not recomputed on read.
    pub flag: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LabResultCreate {
    pub patient_id: i64,
    pub test_definition_id: i64,
    pub collection_date: NaiveDate,
    pub value: f64,
    pub flag: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LabResultUpdate {
    pub patient_id: Option<i64>,
    pub test_definition_id: Option<i64>,
    pub collection_date: Option<NaiveDate>,
    pub value: Option<f64>,
    pub flag: Option<String>,
}

/// Normal/Alto/Baixo classification against a reference range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Flag {
    Normal,
    Alto,
    Baixo,
}

impl Flag {
    pub fn as_str(&self) -> &'static str {
        match self {
            Flag::Normal => "Normal",
            Flag::Alto => "Alto",
            Flag::Baixo => "Baixo",
        }
    }
}

/// Classify a value against optional bounds. No bounds at all means the
/// matrix has nothing to say, so no flag is produced.
pub fn classify_flag(value: f64, min: Option<f64>, max: Option<f64>) -> Option<Flag> {
    if min.is_none() && max.is_none() {
        return None;
    }
    if let Some(min) = min {
        if value < min {
            return Some(Flag::Baixo);
        }
    }
    if let Some(max) = max {
        if value > max {
            return Some(Flag::Alto);
        }
    }
    Some(Flag::Normal)
}

// --- Per-visit measurement entries ---

/// Body composition scan, wide since a scan captures everything at once.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct BioimpedanceEntry {
    pub id: i64,
    pub patient_id: i64,
    pub date: NaiveDate,
    pub weight_kg: f64,
    pub bmi: f64,
    pub body_fat_percent: f64,
    pub fat_mass_kg: f64,
    pub muscle_mass_kg: f64,
    pub visceral_fat_level: Option<f64>,
    pub basal_metabolic_rate_kcal: Option<i32>,
    pub hydration_percent: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BioimpedanceEntryCreate {
    pub patient_id: i64,
    pub date: NaiveDate,
    pub weight_kg: f64,
    pub bmi: f64,
    pub body_fat_percent: f64,
    pub fat_mass_kg: f64,
    pub muscle_mass_kg: f64,
    pub visceral_fat_level: Option<f64>,
    pub basal_metabolic_rate_kcal: Option<i32>,
    pub hydration_percent: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BioimpedanceEntryUpdate {
    pub patient_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub weight_kg: Option<f64>,
    pub bmi: Option<f64>,
    pub body_fat_percent: Option<f64>,
    pub fat_mass_kg: Option<f64>,
    pub muscle_mass_kg: Option<f64>,
    pub visceral_fat_level: Option<f64>,
    pub basal_metabolic_rate_kcal: Option<i32>,
    pub hydration_percent: Option<f64>,
}

/// Tape measurements.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct AnthropometryEntry {
    pub id: i64,
    pub patient_id: i64,
    pub date: NaiveDate,
    pub waist_cm: Option<f64>,
    pub abdomen_cm: Option<f64>,
    pub hips_cm: Option<f64>,
    pub right_arm_cm: Option<f64>,
    pub left_arm_cm: Option<f64>,
    pub right_thigh_cm: Option<f64>,
    pub left_thigh_cm: Option<f64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnthropometryEntryCreate {
    pub patient_id: i64,
    pub date: NaiveDate,
    pub waist_cm: Option<f64>,
    pub abdomen_cm: Option<f64>,
    pub hips_cm: Option<f64>,
    pub right_arm_cm: Option<f64>,
    pub left_arm_cm: Option<f64>,
    pub right_thigh_cm: Option<f64>,
    pub left_thigh_cm: Option<f64>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AnthropometryEntryUpdate {
    pub patient_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub waist_cm: Option<f64>,
    pub abdomen_cm: Option<f64>,
    pub hips_cm: Option<f64>,
    pub right_arm_cm: Option<f64>,
    pub left_arm_cm: Option<f64>,
    pub right_thigh_cm: Option<f64>,
    pub left_thigh_cm: Option<f64>,
}

/// Sleep/libido/energy style logs on a 1-10 scale.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct SubjectiveEntry {
    pub id: i64,
    pub patient_id: i64,
    pub date: NaiveDate,
    pub metric_name: String,
    pub score: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubjectiveEntryCreate {
    pub patient_id: i64,
    pub date: NaiveDate,
    pub metric_name: String,
    pub score: i32,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubjectiveEntryUpdate {
    pub patient_id: Option<i64>,
    pub date: Option<NaiveDate>,
    pub metric_name: Option<String>,
    pub score: Option<i32>,
    pub notes: Option<String>,
}

// --- Exam uploads ---

/// Lifecycle of one uploaded exam document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UploadStatus {
    PendingUpload,
    Processing,
    Ready,
    Approved,
    Failed,
}

impl UploadStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            UploadStatus::PendingUpload => "pending_upload",
            UploadStatus::Processing => "processing",
            UploadStatus::Ready => "ready",
            UploadStatus::Approved => "approved",
            UploadStatus::Failed => "failed",
        }
    }

    /// Approval is only permitted from `ready`.
    pub fn can_approve(&self) -> bool {
        matches!(self, UploadStatus::Ready)
    }
}

impl fmt::Display for UploadStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
#[error("unknown upload status '{0}'")]
pub struct ParseUploadStatusError(String);

impl FromStr for UploadStatus {
    type Err = ParseUploadStatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending_upload" => Ok(UploadStatus::PendingUpload),
            "processing" => Ok(UploadStatus::Processing),
            "ready" => Ok(UploadStatus::Ready),
            "approved" => Ok(UploadStatus::Approved),
            "failed" => Ok(UploadStatus::Failed),
            other => Err(ParseUploadStatusError(other.to_string())),
        }
    }
}

/// Tracks one file-upload lifecycle, including worker usage counters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExamUpload {
    pub id: i64,
    pub patient_id: i64,
    pub filename: String,
    pub storage_key: String,
    pub status: UploadStatus,
    pub pages_processed: i32,
    pub tokens_used: i32,
    pub created_at: DateTime<Utc>,
}

/// Partial update applied by the external worker (status contract).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExamUploadUpdate {
    pub status: Option<UploadStatus>,
    pub pages_processed: Option<i32>,
    pub tokens_used: Option<i32>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct UploadUrlRequest {
    pub patient_id: i64,
    pub filename: String,
    /// Content type the credential is scoped to.
    #[serde(default = "default_content_type")]
    pub content_type: String,
}

fn default_content_type() -> String {
    "application/pdf".to_string()
}

#[derive(Debug, Clone, Serialize)]
pub struct UploadUrlResponse {
    pub upload_id: i64,
    pub storage_key: String,
    pub upload_url: String,
    pub expires_at: DateTime<Utc>,
}

// --- Extracted (staged) lab results ---

/// Staging row: one candidate value the worker found in a document. Waits
/// here until a reviewer approves the upload.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct ExtractedLabResult {
    pub id: i64,
    pub exam_upload_id: i64,
    pub raw_test_name: String,
    pub matched_test_definition_id: Option<i64>,
    pub value: f64,
    pub unit: String,
    pub confidence_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtractedLabResultCreate {
    pub raw_test_name: String,
    pub matched_test_definition_id: Option<i64>,
    pub value: f64,
    pub unit: String,
    pub confidence_score: f64,
}

/// Reviewer correction of a staged row. `matched_test_definition_id` is
/// double-optional so an explicit null clears a wrong match, while an
/// absent field leaves it unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExtractedLabResultUpdate {
    pub raw_test_name: Option<String>,
    #[serde(default, deserialize_with = "double_option")]
    pub matched_test_definition_id: Option<Option<i64>>,
    pub value: Option<f64>,
    pub unit: Option<String>,
    pub confidence_score: Option<f64>,
}

fn double_option<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    Deserialize::deserialize(deserializer).map(Some)
}

/// Staged row eagerly resolved with its matched definition, if any.
#[derive(Debug, Clone, Serialize)]
pub struct StagedResult {
    #[serde(flatten)]
    pub result: ExtractedLabResult,
    pub matched_definition: Option<LabTestDefinition>,
}

/// Outcome of approving an upload.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub upload_id: i64,
    pub results_created: u64,
    pub status: UploadStatus,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn hemoglobin() -> LabTestDefinition {
        LabTestDefinition {
            id: 1,
            name: "Hemoglobina".to_string(),
            category: "Hemograma".to_string(),
            unit: "g/dL".to_string(),
            ref_min_male: Some(12.5),
            ref_max_male: Some(17.0),
            ref_min_female: Some(11.5),
            ref_max_female: Some(15.0),
        }
    }

    #[test]
    fn classify_uses_sex_specific_range() {
        let def = hemoglobin();
        // 15.5 is normal for men but high for women
        assert_eq!(def.classify("Masculino", 15.5), Some(Flag::Normal));
        assert_eq!(def.classify("Feminino", 15.5), Some(Flag::Alto));
        assert_eq!(def.classify("Masculino", 11.0), Some(Flag::Baixo));
    }

    #[test]
    fn classify_without_range_yields_no_flag() {
        let mut def = hemoglobin();
        def.ref_min_male = None;
        def.ref_max_male = None;
        assert_eq!(def.classify("Masculino", 15.5), None);
        // Unknown gender string never classifies
        assert_eq!(hemoglobin().classify("unknown", 15.5), None);
    }

    #[test]
    fn classify_with_partial_bounds() {
        // Max-only range, e.g. total cholesterol
        assert_eq!(classify_flag(180.0, None, Some(199.0)), Some(Flag::Normal));
        assert_eq!(classify_flag(220.0, None, Some(199.0)), Some(Flag::Alto));
        // Boundary values are in range
        assert_eq!(
            classify_flag(199.0, Some(0.0), Some(199.0)),
            Some(Flag::Normal)
        );
    }

    #[test]
    fn upload_status_round_trips_as_str() {
        for status in [
            UploadStatus::PendingUpload,
            UploadStatus::Processing,
            UploadStatus::Ready,
            UploadStatus::Approved,
            UploadStatus::Failed,
        ] {
            assert_eq!(status.as_str().parse::<UploadStatus>().unwrap(), status);
        }
        assert!("uploading".parse::<UploadStatus>().is_err());
    }

    #[test]
    fn only_ready_can_be_approved() {
        assert!(UploadStatus::Ready.can_approve());
        assert!(!UploadStatus::PendingUpload.can_approve());
        assert!(!UploadStatus::Processing.can_approve());
        assert!(!UploadStatus::Approved.can_approve());
        assert!(!UploadStatus::Failed.can_approve());
    }

    #[test]
    fn upload_status_serializes_snake_case() {
        assert_eq!(
            serde_json::to_value(UploadStatus::PendingUpload).unwrap(),
            json!("pending_upload")
        );
        let status: UploadStatus = serde_json::from_value(json!("ready")).unwrap();
        assert_eq!(status, UploadStatus::Ready);
    }

    #[test]
    fn bioimpedance_payload_round_trips_all_numeric_fields() {
        let body = json!({
            "patient_id": 1,
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
        let entry: BioimpedanceEntryCreate = serde_json::from_value(body.clone()).unwrap();
        assert_eq!(entry.weight_kg, 80.0);
        assert_eq!(entry.bmi, 24.7);
        assert_eq!(entry.body_fat_percent, 15.0);
        assert_eq!(entry.fat_mass_kg, 12.0);
        assert_eq!(entry.muscle_mass_kg, 60.0);
        assert_eq!(entry.visceral_fat_level, Some(5.0));
        assert_eq!(entry.basal_metabolic_rate_kcal, Some(1800));
        assert_eq!(entry.hydration_percent, Some(60.0));
        assert_eq!(serde_json::to_value(&entry).unwrap(), body);
    }

    #[test]
    fn partial_update_payload_leaves_absent_fields_none() {
        let update: PatientUpdate =
            serde_json::from_value(json!({ "height_cm": 176.0 })).unwrap();
        assert_eq!(update.height_cm, Some(176.0));
        assert!(update.full_name.is_none());
        assert!(update.date_of_birth.is_none());
        assert!(update.gender.is_none());
    }

    #[test]
    fn extracted_update_distinguishes_null_from_absent() {
        let absent: ExtractedLabResultUpdate = serde_json::from_value(json!({
            "value": 5.0
        }))
        .unwrap();
        assert_eq!(absent.matched_test_definition_id, None);

        let cleared: ExtractedLabResultUpdate = serde_json::from_value(json!({
            "matched_test_definition_id": null
        }))
        .unwrap();
        assert_eq!(cleared.matched_test_definition_id, Some(None));

        let set: ExtractedLabResultUpdate = serde_json::from_value(json!({
            "matched_test_definition_id": 9
        }))
        .unwrap();
        assert_eq!(set.matched_test_definition_id, Some(Some(9)));
    }

    #[test]
    fn staged_result_flattens_row_fields() {
        let staged = StagedResult {
            result: ExtractedLabResult {
                id: 3,
                exam_upload_id: 1,
                raw_test_name: "HEMOGLOBINA".to_string(),
                matched_test_definition_id: Some(1),
                value: 14.2,
                unit: "g/dL".to_string(),
                confidence_score: 0.92,
            },
            matched_definition: Some(hemoglobin()),
        };
        let value = serde_json::to_value(&staged).unwrap();
        assert_eq!(value["raw_test_name"], "HEMOGLOBINA");
        assert_eq!(value["matched_definition"]["name"], "Hemoglobina");
    }

    #[test]
    fn upload_url_request_defaults_content_type() {
        let req: UploadUrlRequest = serde_json::from_value(json!({
            "patient_id": 1,
            "filename": "exame.pdf"
        }))
        .unwrap();
        assert_eq!(req.content_type, "application/pdf");
    }
}
