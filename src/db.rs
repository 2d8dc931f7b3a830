use sqlx::postgres::{PgPool, PgRow};
use sqlx::Row;
use thiserror::Error;

use crate::models::{
    classify_flag, AnthropometryEntry, AnthropometryEntryCreate, AnthropometryEntryUpdate,
    ApprovalOutcome, BioimpedanceEntry, BioimpedanceEntryCreate, BioimpedanceEntryUpdate,
    ExamUpload, ExamUploadUpdate, ExtractedLabResult, ExtractedLabResultCreate,
    ExtractedLabResultUpdate, LabResult, LabResultCreate, LabResultUpdate, LabTestDefinition,
    LabTestDefinitionCreate, LabTestDefinitionUpdate, Patient, PatientCreate, PatientUpdate,
    StagedResult, SubjectiveEntry, SubjectiveEntryCreate, SubjectiveEntryUpdate, UploadStatus,
};

const SCHEMA: &str = include_str!("schema.sql");
const SEED_MATRIX: &str = include_str!("seed.sql");

/// Failure modes of the approval commit, distinct from plain query errors so
/// the request layer can surface them as different responses.
#[derive(Debug, Error)]
pub enum ApproveError {
    #[error("exam upload {0} not found")]
    NotFound(i64),
    #[error("exam upload {id} is '{status}', approval requires 'ready'")]
    NotReady { id: i64, status: UploadStatus },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Storage handle passed explicitly into each request-handling unit.
pub struct Database {
    pool: PgPool,
}

impl Database {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Create all tables if missing and seed the reference-range matrix.
    pub async fn run_migrations(&self) -> Result<(), sqlx::Error> {
        for statement in SCHEMA.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement).execute(&self.pool).await?;
        }
        sqlx::query(SEED_MATRIX).execute(&self.pool).await?;
        tracing::info!("schema migrations applied");
        Ok(())
    }

    // --- Patients ---

    pub async fn create_patient(&self, create: PatientCreate) -> Result<Patient, sqlx::Error> {
        sqlx::query_as::<_, Patient>(
            "INSERT INTO patients (full_name, date_of_birth, gender, height_cm)
             VALUES ($1, $2, $3, $4)
             RETURNING *",
        )
        .bind(create.full_name)
        .bind(create.date_of_birth)
        .bind(create.gender)
        .bind(create.height_cm)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_patients(&self, skip: i64, limit: i64) -> Result<Vec<Patient>, sqlx::Error> {
        sqlx::query_as::<_, Patient>("SELECT * FROM patients ORDER BY id OFFSET $1 LIMIT $2")
            .bind(skip)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
    }

    pub async fn get_patient(&self, id: i64) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as::<_, Patient>("SELECT * FROM patients WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_patient(
        &self,
        id: i64,
        update: PatientUpdate,
    ) -> Result<Option<Patient>, sqlx::Error> {
        sqlx::query_as::<_, Patient>(
            "UPDATE patients
             SET full_name = COALESCE($2, full_name),
                 date_of_birth = COALESCE($3, date_of_birth),
                 gender = COALESCE($4, gender),
                 height_cm = COALESCE($5, height_cm)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.full_name)
        .bind(update.date_of_birth)
        .bind(update.gender)
        .bind(update.height_cm)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_patient(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM patients WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Lab test definitions ---

    pub async fn create_lab_definition(
        &self,
        create: LabTestDefinitionCreate,
    ) -> Result<LabTestDefinition, sqlx::Error> {
        sqlx::query_as::<_, LabTestDefinition>(
            "INSERT INTO lab_test_definitions
                 (name, category, unit, ref_min_male, ref_max_male, ref_min_female, ref_max_female)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             RETURNING *",
        )
        .bind(create.name)
        .bind(create.category)
        .bind(create.unit)
        .bind(create.ref_min_male)
        .bind(create.ref_max_male)
        .bind(create.ref_min_female)
        .bind(create.ref_max_female)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_lab_definitions(
        &self,
        skip: i64,
        limit: i64,
    ) -> Result<Vec<LabTestDefinition>, sqlx::Error> {
        sqlx::query_as::<_, LabTestDefinition>(
            "SELECT * FROM lab_test_definitions ORDER BY id OFFSET $1 LIMIT $2",
        )
        .bind(skip)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_lab_definition(
        &self,
        id: i64,
    ) -> Result<Option<LabTestDefinition>, sqlx::Error> {
        sqlx::query_as::<_, LabTestDefinition>("SELECT * FROM lab_test_definitions WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_lab_definition(
        &self,
        id: i64,
        update: LabTestDefinitionUpdate,
    ) -> Result<Option<LabTestDefinition>, sqlx::Error> {
        sqlx::query_as::<_, LabTestDefinition>(
            "UPDATE lab_test_definitions
             SET name = COALESCE($2, name),
                 category = COALESCE($3, category),
                 unit = COALESCE($4, unit),
                 ref_min_male = COALESCE($5, ref_min_male),
                 ref_max_male = COALESCE($6, ref_max_male),
                 ref_min_female = COALESCE($7, ref_min_female),
                 ref_max_female = COALESCE($8, ref_max_female)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.name)
        .bind(update.category)
        .bind(update.unit)
        .bind(update.ref_min_male)
        .bind(update.ref_max_male)
        .bind(update.ref_min_female)
        .bind(update.ref_max_female)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_lab_definition(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM lab_test_definitions WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Lab results ---

    pub async fn create_lab_result(
        &self,
        create: LabResultCreate,
    ) -> Result<LabResult, sqlx::Error> {
        sqlx::query_as::<_, LabResult>(
            "INSERT INTO lab_results (patient_id, test_definition_id, collection_date, value, flag)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(create.patient_id)
        .bind(create.test_definition_id)
        .bind(create.collection_date)
        .bind(create.value)
        .bind(create.flag)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_lab_results_for_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<LabResult>, sqlx::Error> {
        sqlx::query_as::<_, LabResult>(
            "SELECT * FROM lab_results WHERE patient_id = $1 ORDER BY collection_date, id",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_lab_result(&self, id: i64) -> Result<Option<LabResult>, sqlx::Error> {
        sqlx::query_as::<_, LabResult>("SELECT * FROM lab_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_lab_result(
        &self,
        id: i64,
        update: LabResultUpdate,
    ) -> Result<Option<LabResult>, sqlx::Error> {
        sqlx::query_as::<_, LabResult>(
            "UPDATE lab_results
             SET patient_id = COALESCE($2, patient_id),
                 test_definition_id = COALESCE($3, test_definition_id),
                 collection_date = COALESCE($4, collection_date),
                 value = COALESCE($5, value),
                 flag = COALESCE($6, flag)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.patient_id)
        .bind(update.test_definition_id)
        .bind(update.collection_date)
        .bind(update.value)
        .bind(update.flag)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_lab_result(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM lab_results WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Bioimpedance entries ---

    pub async fn create_bioimpedance(
        &self,
        create: BioimpedanceEntryCreate,
    ) -> Result<BioimpedanceEntry, sqlx::Error> {
        sqlx::query_as::<_, BioimpedanceEntry>(
            "INSERT INTO bioimpedance_entries
                 (patient_id, date, weight_kg, bmi, body_fat_percent, fat_mass_kg,
                  muscle_mass_kg, visceral_fat_level, basal_metabolic_rate_kcal, hydration_percent)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
             RETURNING *",
        )
        .bind(create.patient_id)
        .bind(create.date)
        .bind(create.weight_kg)
        .bind(create.bmi)
        .bind(create.body_fat_percent)
        .bind(create.fat_mass_kg)
        .bind(create.muscle_mass_kg)
        .bind(create.visceral_fat_level)
        .bind(create.basal_metabolic_rate_kcal)
        .bind(create.hydration_percent)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_bioimpedance_for_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<BioimpedanceEntry>, sqlx::Error> {
        sqlx::query_as::<_, BioimpedanceEntry>(
            "SELECT * FROM bioimpedance_entries WHERE patient_id = $1 ORDER BY date, id",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_bioimpedance(&self, id: i64) -> Result<Option<BioimpedanceEntry>, sqlx::Error> {
        sqlx::query_as::<_, BioimpedanceEntry>("SELECT * FROM bioimpedance_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_bioimpedance(
        &self,
        id: i64,
        update: BioimpedanceEntryUpdate,
    ) -> Result<Option<BioimpedanceEntry>, sqlx::Error> {
        sqlx::query_as::<_, BioimpedanceEntry>(
            "UPDATE bioimpedance_entries
             SET patient_id = COALESCE($2, patient_id),
                 date = COALESCE($3, date),
                 weight_kg = COALESCE($4, weight_kg),
                 bmi = COALESCE($5, bmi),
                 body_fat_percent = COALESCE($6, body_fat_percent),
                 fat_mass_kg = COALESCE($7, fat_mass_kg),
                 muscle_mass_kg = COALESCE($8, muscle_mass_kg),
                 visceral_fat_level = COALESCE($9, visceral_fat_level),
                 basal_metabolic_rate_kcal = COALESCE($10, basal_metabolic_rate_kcal),
                 hydration_percent = COALESCE($11, hydration_percent)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.patient_id)
        .bind(update.date)
        .bind(update.weight_kg)
        .bind(update.bmi)
        .bind(update.body_fat_percent)
        .bind(update.fat_mass_kg)
        .bind(update.muscle_mass_kg)
        .bind(update.visceral_fat_level)
        .bind(update.basal_metabolic_rate_kcal)
        .bind(update.hydration_percent)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_bioimpedance(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM bioimpedance_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Anthropometry entries ---

    pub async fn create_anthropometry(
        &self,
        create: AnthropometryEntryCreate,
    ) -> Result<AnthropometryEntry, sqlx::Error> {
        sqlx::query_as::<_, AnthropometryEntry>(
            "INSERT INTO anthropometry_entries
                 (patient_id, date, waist_cm, abdomen_cm, hips_cm, right_arm_cm,
                  left_arm_cm, right_thigh_cm, left_thigh_cm)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
             RETURNING *",
        )
        .bind(create.patient_id)
        .bind(create.date)
        .bind(create.waist_cm)
        .bind(create.abdomen_cm)
        .bind(create.hips_cm)
        .bind(create.right_arm_cm)
        .bind(create.left_arm_cm)
        .bind(create.right_thigh_cm)
        .bind(create.left_thigh_cm)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_anthropometry_for_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<AnthropometryEntry>, sqlx::Error> {
        sqlx::query_as::<_, AnthropometryEntry>(
            "SELECT * FROM anthropometry_entries WHERE patient_id = $1 ORDER BY date, id",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_anthropometry(
        &self,
        id: i64,
    ) -> Result<Option<AnthropometryEntry>, sqlx::Error> {
        sqlx::query_as::<_, AnthropometryEntry>("SELECT * FROM anthropometry_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_anthropometry(
        &self,
        id: i64,
        update: AnthropometryEntryUpdate,
    ) -> Result<Option<AnthropometryEntry>, sqlx::Error> {
        sqlx::query_as::<_, AnthropometryEntry>(
            "UPDATE anthropometry_entries
             SET patient_id = COALESCE($2, patient_id),
                 date = COALESCE($3, date),
                 waist_cm = COALESCE($4, waist_cm),
                 abdomen_cm = COALESCE($5, abdomen_cm),
                 hips_cm = COALESCE($6, hips_cm),
                 right_arm_cm = COALESCE($7, right_arm_cm),
                 left_arm_cm = COALESCE($8, left_arm_cm),
                 right_thigh_cm = COALESCE($9, right_thigh_cm),
                 left_thigh_cm = COALESCE($10, left_thigh_cm)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.patient_id)
        .bind(update.date)
        .bind(update.waist_cm)
        .bind(update.abdomen_cm)
        .bind(update.hips_cm)
        .bind(update.right_arm_cm)
        .bind(update.left_arm_cm)
        .bind(update.right_thigh_cm)
        .bind(update.left_thigh_cm)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_anthropometry(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM anthropometry_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Subjective entries ---

    pub async fn create_subjective(
        &self,
        create: SubjectiveEntryCreate,
    ) -> Result<SubjectiveEntry, sqlx::Error> {
        sqlx::query_as::<_, SubjectiveEntry>(
            "INSERT INTO subjective_entries (patient_id, date, metric_name, score, notes)
             VALUES ($1, $2, $3, $4, $5)
             RETURNING *",
        )
        .bind(create.patient_id)
        .bind(create.date)
        .bind(create.metric_name)
        .bind(create.score)
        .bind(create.notes)
        .fetch_one(&self.pool)
        .await
    }

    pub async fn list_subjective_for_patient(
        &self,
        patient_id: i64,
    ) -> Result<Vec<SubjectiveEntry>, sqlx::Error> {
        sqlx::query_as::<_, SubjectiveEntry>(
            "SELECT * FROM subjective_entries WHERE patient_id = $1 ORDER BY date, id",
        )
        .bind(patient_id)
        .fetch_all(&self.pool)
        .await
    }

    pub async fn get_subjective(&self, id: i64) -> Result<Option<SubjectiveEntry>, sqlx::Error> {
        sqlx::query_as::<_, SubjectiveEntry>("SELECT * FROM subjective_entries WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    pub async fn update_subjective(
        &self,
        id: i64,
        update: SubjectiveEntryUpdate,
    ) -> Result<Option<SubjectiveEntry>, sqlx::Error> {
        sqlx::query_as::<_, SubjectiveEntry>(
            "UPDATE subjective_entries
             SET patient_id = COALESCE($2, patient_id),
                 date = COALESCE($3, date),
                 metric_name = COALESCE($4, metric_name),
                 score = COALESCE($5, score),
                 notes = COALESCE($6, notes)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.patient_id)
        .bind(update.date)
        .bind(update.metric_name)
        .bind(update.score)
        .bind(update.notes)
        .fetch_optional(&self.pool)
        .await
    }

    pub async fn delete_subjective(&self, id: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM subjective_entries WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // --- Exam uploads ---

    pub async fn create_exam_upload(
        &self,
        patient_id: i64,
        filename: &str,
        storage_key: &str,
    ) -> Result<ExamUpload, sqlx::Error> {
        let row = sqlx::query(
            "INSERT INTO exam_uploads (patient_id, filename, storage_key, status)
             VALUES ($1, $2, $3, 'pending_upload')
             RETURNING *",
        )
        .bind(patient_id)
        .bind(filename)
        .bind(storage_key)
        .fetch_one(&self.pool)
        .await?;
        upload_from_row(&row)
    }

    pub async fn get_exam_upload(&self, id: i64) -> Result<Option<ExamUpload>, sqlx::Error> {
        let row = sqlx::query("SELECT * FROM exam_uploads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(upload_from_row).transpose()
    }

    /// Partial update used by the external worker to report progress. Only
    /// status and the usage counters are writable through this path.
    pub async fn update_exam_upload(
        &self,
        id: i64,
        update: ExamUploadUpdate,
    ) -> Result<Option<ExamUpload>, sqlx::Error> {
        let row = sqlx::query(
            "UPDATE exam_uploads
             SET status = COALESCE($2, status),
                 pages_processed = COALESCE($3, pages_processed),
                 tokens_used = COALESCE($4, tokens_used)
             WHERE id = $1
             RETURNING *",
        )
        .bind(id)
        .bind(update.status.map(|s| s.as_str()))
        .bind(update.pages_processed)
        .bind(update.tokens_used)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(upload_from_row).transpose()
    }

    // --- Extracted (staged) lab results ---

    pub async fn stage_extracted_results(
        &self,
        exam_upload_id: i64,
        rows: Vec<ExtractedLabResultCreate>,
    ) -> Result<Vec<ExtractedLabResult>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        let mut staged = Vec::with_capacity(rows.len());
        for row in rows {
            let inserted = sqlx::query_as::<_, ExtractedLabResult>(
                "INSERT INTO extracted_lab_results
                     (exam_upload_id, raw_test_name, matched_test_definition_id,
                      value, unit, confidence_score)
                 VALUES ($1, $2, $3, $4, $5, $6)
                 RETURNING *",
            )
            .bind(exam_upload_id)
            .bind(row.raw_test_name)
            .bind(row.matched_test_definition_id)
            .bind(row.value)
            .bind(row.unit)
            .bind(row.confidence_score)
            .fetch_one(&mut *tx)
            .await?;
            staged.push(inserted);
        }
        tx.commit().await?;
        Ok(staged)
    }

    /// Staged rows for an upload, each eagerly joined with its matched
    /// definition when one is set.
    pub async fn list_extracted_results(
        &self,
        exam_upload_id: i64,
    ) -> Result<Vec<StagedResult>, sqlx::Error> {
        let rows = sqlx::query(
            "SELECT e.id, e.exam_upload_id, e.raw_test_name, e.matched_test_definition_id,
                    e.value, e.unit, e.confidence_score,
                    d.id AS def_id, d.name AS def_name, d.category AS def_category,
                    d.unit AS def_unit, d.ref_min_male, d.ref_max_male,
                    d.ref_min_female, d.ref_max_female
             FROM extracted_lab_results e
             LEFT JOIN lab_test_definitions d ON d.id = e.matched_test_definition_id
             WHERE e.exam_upload_id = $1
             ORDER BY e.id",
        )
        .bind(exam_upload_id)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(staged_from_row).collect()
    }

    pub async fn get_extracted_result(
        &self,
        id: i64,
    ) -> Result<Option<ExtractedLabResult>, sqlx::Error> {
        sqlx::query_as::<_, ExtractedLabResult>("SELECT * FROM extracted_lab_results WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
    }

    /// Reviewer correction. Unlike the other partial updates, an explicit
    /// null for the matched definition clears the match.
    pub async fn update_extracted_result(
        &self,
        id: i64,
        update: ExtractedLabResultUpdate,
    ) -> Result<Option<ExtractedLabResult>, sqlx::Error> {
        let query = match update.matched_test_definition_id {
            Some(matched) => sqlx::query_as::<_, ExtractedLabResult>(
                "UPDATE extracted_lab_results
                 SET raw_test_name = COALESCE($2, raw_test_name),
                     value = COALESCE($3, value),
                     unit = COALESCE($4, unit),
                     confidence_score = COALESCE($5, confidence_score),
                     matched_test_definition_id = $6
                 WHERE id = $1
                 RETURNING *",
            )
            .bind(id)
            .bind(update.raw_test_name)
            .bind(update.value)
            .bind(update.unit)
            .bind(update.confidence_score)
            .bind(matched),
            None => sqlx::query_as::<_, ExtractedLabResult>(
                "UPDATE extracted_lab_results
                 SET raw_test_name = COALESCE($2, raw_test_name),
                     value = COALESCE($3, value),
                     unit = COALESCE($4, unit),
                     confidence_score = COALESCE($5, confidence_score)
                 WHERE id = $1
                 RETURNING *",
            )
            .bind(id)
            .bind(update.raw_test_name)
            .bind(update.value)
            .bind(update.unit)
            .bind(update.confidence_score),
        };
        query.fetch_optional(&self.pool).await
    }

    // --- Approval ---

    /// Commit an upload: copy every staged row with a resolved match into
    /// permanent lab results and flip the upload to `approved`, atomically.
    /// Rows with no matched definition are skipped. The upload row is locked
    /// so two concurrent approvals serialize on the status check.
    pub async fn approve_exam_upload(&self, id: i64) -> Result<ApprovalOutcome, ApproveError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query("SELECT * FROM exam_uploads WHERE id = $1 FOR UPDATE")
            .bind(id)
            .fetch_optional(&mut *tx)
            .await?;
        let upload = match row.as_ref().map(upload_from_row).transpose()? {
            Some(upload) => upload,
            None => return Err(ApproveError::NotFound(id)),
        };
        if !upload.status.can_approve() {
            return Err(ApproveError::NotReady {
                id,
                status: upload.status,
            });
        }

        let gender: String = sqlx::query_scalar("SELECT gender FROM patients WHERE id = $1")
            .bind(upload.patient_id)
            .fetch_one(&mut *tx)
            .await?;

        // The inner join drops rows with no matched definition.
        let matched = sqlx::query(
            "SELECT e.value, e.matched_test_definition_id,
                    d.ref_min_male, d.ref_max_male, d.ref_min_female, d.ref_max_female
             FROM extracted_lab_results e
             JOIN lab_test_definitions d ON d.id = e.matched_test_definition_id
             WHERE e.exam_upload_id = $1
             ORDER BY e.id",
        )
        .bind(id)
        .fetch_all(&mut *tx)
        .await?;

        let collection_date = upload.created_at.date_naive();
        let mut created = 0u64;
        for row in &matched {
            let value: f64 = row.try_get("value")?;
            let definition_id: i64 = row.try_get("matched_test_definition_id")?;
            let (min, max): (Option<f64>, Option<f64>) = match gender.as_str() {
                "Masculino" => (row.try_get("ref_min_male")?, row.try_get("ref_max_male")?),
                "Feminino" => (
                    row.try_get("ref_min_female")?,
                    row.try_get("ref_max_female")?,
                ),
                _ => (None, None),
            };
            let flag = classify_flag(value, min, max);

            sqlx::query(
                "INSERT INTO lab_results
                     (patient_id, test_definition_id, collection_date, value, flag)
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(upload.patient_id)
            .bind(definition_id)
            .bind(collection_date)
            .bind(value)
            .bind(flag.map(|f| f.as_str()))
            .execute(&mut *tx)
            .await?;
            created += 1;
        }

        sqlx::query("UPDATE exam_uploads SET status = 'approved' WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;

        tracing::info!(upload_id = id, results_created = created, "exam upload approved");

        Ok(ApprovalOutcome {
            upload_id: id,
            results_created: created,
            status: UploadStatus::Approved,
        })
    }
}

fn upload_from_row(row: &PgRow) -> Result<ExamUpload, sqlx::Error> {
    let status: String = row.try_get("status")?;
    let status = status
        .parse::<UploadStatus>()
        .map_err(|e| sqlx::Error::ColumnDecode {
            index: "status".to_string(),
            source: Box::new(e),
        })?;
    Ok(ExamUpload {
        id: row.try_get("id")?,
        patient_id: row.try_get("patient_id")?,
        filename: row.try_get("filename")?,
        storage_key: row.try_get("storage_key")?,
        status,
        pages_processed: row.try_get("pages_processed")?,
        tokens_used: row.try_get("tokens_used")?,
        created_at: row.try_get("created_at")?,
    })
}

fn staged_from_row(row: &PgRow) -> Result<StagedResult, sqlx::Error> {
    let result = ExtractedLabResult {
        id: row.try_get("id")?,
        exam_upload_id: row.try_get("exam_upload_id")?,
        raw_test_name: row.try_get("raw_test_name")?,
        matched_test_definition_id: row.try_get("matched_test_definition_id")?,
        value: row.try_get("value")?,
        unit: row.try_get("unit")?,
        confidence_score: row.try_get("confidence_score")?,
    };
    let matched_definition = match row.try_get::<Option<i64>, _>("def_id")? {
        Some(def_id) => Some(LabTestDefinition {
            id: def_id,
            name: row.try_get("def_name")?,
            category: row.try_get("def_category")?,
            unit: row.try_get("def_unit")?,
            ref_min_male: row.try_get("ref_min_male")?,
            ref_max_male: row.try_get("ref_max_male")?,
            ref_min_female: row.try_get("ref_min_female")?,
            ref_max_female: row.try_get("ref_max_female")?,
        }),
        None => None,
    };
    Ok(StagedResult {
        result,
        matched_definition,
    })
}
