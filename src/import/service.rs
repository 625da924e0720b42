use chrono::{DateTime, Utc};
use csv::StringRecord;
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use std::path::PathBuf;

use super::columns::{self, CUSTOM_FIELD_PREFIX, CsvRow};
use super::validation::{self, RowStatus};
use crate::jobs::{
    JobError, JobKind, JobQueue, JobResult, JobStatus, progress_percentage, remove_file_if_present,
};
use crate::models::Page;

const DEFAULT_THRESHOLD: i32 = 50;
const DEFAULT_BATCH_SIZE: usize = 100;
const MAX_BATCH_SIZE: usize = 1000;

fn default_threshold() -> i32 {
    DEFAULT_THRESHOLD
}

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

/// What to do with rows whose email already exists.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum DuplicateHandling {
    /// Leave the existing subscriber untouched.
    #[default]
    Skip,
    /// Fill in non-empty values and merge group/segment membership.
    Update,
    /// Overwrite the subscriber's profile with the row's values.
    Replace,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportOptions {
    /// CSV column name -> subscriber field (`email`, `firstName`, ..., `custom.<key>`).
    pub column_mapping: BTreeMap<String, String>,
    #[serde(default)]
    pub duplicate_handling: DuplicateHandling,
    /// Rows scoring below this (0-100) are recorded as invalid.
    #[serde(default = "default_threshold")]
    pub validation_threshold: i32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default)]
    pub group_ids: Vec<i32>,
    #[serde(default)]
    pub segment_ids: Vec<i32>,
    /// Also create subscribers for rows scored as risky.
    #[serde(default)]
    pub import_risky: bool,
}

impl ImportOptions {
    pub fn validate(&self) -> Result<(), String> {
        columns::validate_column_mapping(&self.column_mapping, None)?;
        if !(0..=100).contains(&self.validation_threshold) {
            return Err("validationThreshold must be between 0 and 100".to_string());
        }
        if self.batch_size == 0 || self.batch_size > MAX_BATCH_SIZE {
            return Err(format!("batchSize must be between 1 and {}", MAX_BATCH_SIZE));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportJob {
    pub id: i32,
    pub file_name: String,
    pub original_file_name: String,
    #[serde(skip)]
    pub file_path: String,
    pub status: JobStatus,
    pub total_records: i32,
    pub processed_records: i32,
    pub valid_records: i32,
    pub invalid_records: i32,
    pub risky_records: i32,
    pub duplicate_records: i32,
    pub imported_records: i32,
    pub progress_percentage: i32,
    pub options: Value,
    pub column_mapping: Value,
    pub error: Option<String>,
    pub user_id: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

const IMPORT_JOB_COLUMNS: &str = "id, file_name, original_file_name, file_path, status, total_records, \
     processed_records, valid_records, invalid_records, risky_records, duplicate_records, \
     imported_records, progress_percentage, options, column_mapping, error, user_id, created_at, \
     started_at, completed_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResult {
    pub id: i32,
    pub import_job_id: i32,
    pub row_number: i32,
    pub email: Option<String>,
    pub status: String,
    pub confidence_score: i32,
    pub issues: Vec<String>,
    pub suggestion: Option<String>,
    pub imported: bool,
    pub original_data: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStatistics {
    pub total_jobs: i64,
    pub completed_jobs: i64,
    pub failed_jobs: i64,
    pub total_records_processed: i64,
    pub total_valid_records: i64,
    pub total_imported_records: i64,
    pub average_success_rate: f64,
}

/// Upload metadata needed to register a new import job.
pub struct NewImport {
    pub file_name: String,
    pub original_file_name: String,
    pub file_path: PathBuf,
    pub total_records: i32,
    pub options: ImportOptions,
    pub user_id: Option<i32>,
}

/// Subscriber attributes extracted from one CSV row.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MappedRow {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub custom_fields: Map<String, Value>,
}

pub fn map_row(
    headers: &[String],
    record: &StringRecord,
    mapping: &BTreeMap<String, String>,
) -> MappedRow {
    let mut row = MappedRow::default();

    for (index, header) in headers.iter().enumerate() {
        let Some(field) = mapping.get(header) else {
            continue;
        };
        let value = record.get(index).map(str::trim).unwrap_or("");
        if value.is_empty() {
            continue;
        }
        let value = value.to_string();
        match field.as_str() {
            "email" => row.email = validation::normalize_email(&value),
            "firstName" => row.first_name = Some(value),
            "lastName" => row.last_name = Some(value),
            "company" => row.company = Some(value),
            "phone" => row.phone = Some(value),
            "location" => row.location = Some(value),
            other => {
                if let Some(key) = other.strip_prefix(CUSTOM_FIELD_PREFIX) {
                    row.custom_fields.insert(key.to_string(), Value::String(value));
                }
            }
        }
    }

    row
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
struct ImportCounters {
    processed: i32,
    valid: i32,
    invalid: i32,
    risky: i32,
    duplicate: i32,
    imported: i32,
}

impl ImportCounters {
    fn record(&mut self, status: RowStatus, imported: bool) {
        self.processed += 1;
        match status {
            RowStatus::Valid => self.valid += 1,
            RowStatus::Invalid => self.invalid += 1,
            RowStatus::Risky => self.risky += 1,
            RowStatus::Duplicate => self.duplicate += 1,
        }
        if imported {
            self.imported += 1;
        }
    }
}

struct RowOutcome {
    row_number: i32,
    mapped: MappedRow,
    status: RowStatus,
    score: i32,
    issues: Vec<String>,
    suggestion: Option<String>,
    original: Value,
}

#[derive(Clone)]
pub struct ImportService {
    pool: PgPool,
    queue: JobQueue,
}

impl ImportService {
    pub fn new(pool: PgPool) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self { pool, queue }
    }

    pub async fn create_job(&self, new_job: NewImport) -> JobResult<ImportJob> {
        new_job.options.validate().map_err(JobError::Invalid)?;

        let options = serde_json::to_value(&new_job.options)
            .map_err(|e| JobError::Invalid(e.to_string()))?;
        let column_mapping = serde_json::to_value(&new_job.options.column_mapping)
            .map_err(|e| JobError::Invalid(e.to_string()))?;

        let sql = format!(
            "INSERT INTO import_jobs (file_name, original_file_name, file_path, total_records, options, column_mapping, user_id) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING {}",
            IMPORT_JOB_COLUMNS
        );
        let job: ImportJob = sqlx::query_as(&sql)
            .bind(&new_job.file_name)
            .bind(&new_job.original_file_name)
            .bind(new_job.file_path.to_string_lossy().to_string())
            .bind(new_job.total_records)
            .bind(options)
            .bind(column_mapping)
            .bind(new_job.user_id)
            .fetch_one(&self.pool)
            .await?;

        log::info!(
            "import job {}: created for '{}' ({} rows)",
            job.id,
            job.original_file_name,
            job.total_records
        );
        Ok(job)
    }

    pub async fn get_job(&self, job_id: i32) -> JobResult<ImportJob> {
        let sql = format!("SELECT {} FROM import_jobs WHERE id = $1", IMPORT_JOB_COLUMNS);
        sqlx::query_as(&sql)
            .bind(job_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    pub async fn list_jobs(
        &self,
        status: Option<JobStatus>,
        page: i64,
        size: i64,
    ) -> JobResult<Page<ImportJob>> {
        let offset = (page - 1) * size;
        let sql = format!(
            "SELECT {} FROM import_jobs WHERE ($1::job_status IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            IMPORT_JOB_COLUMNS
        );
        let jobs_query = sqlx::query_as::<_, ImportJob>(&sql)
            .bind(status)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool);
        let count_query = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM import_jobs WHERE ($1::job_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool);

        let (jobs, total) = tokio::try_join!(jobs_query, count_query)?;
        Ok(Page::new(jobs, page, size, total))
    }

    pub async fn list_results(
        &self,
        job_id: i32,
        status: Option<RowStatus>,
        page: i64,
        size: i64,
    ) -> JobResult<Page<ImportResult>> {
        // Surface a 404 for unknown jobs rather than an empty page.
        self.get_job(job_id).await?;

        let status = status.map(RowStatus::as_str);
        let offset = (page - 1) * size;
        let results_query = sqlx::query_as::<_, ImportResult>(
            r#"SELECT id, import_job_id, row_number, email, status, confidence_score, issues,
                      suggestion, imported, original_data
               FROM import_results
               WHERE import_job_id = $1 AND ($2::text IS NULL OR status = $2)
               ORDER BY row_number ASC
               LIMIT $3 OFFSET $4"#,
        )
        .bind(job_id)
        .bind(status)
        .bind(size)
        .bind(offset)
        .fetch_all(&self.pool);
        let count_query = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM import_results WHERE import_job_id = $1 AND ($2::text IS NULL OR status = $2)",
        )
        .bind(job_id)
        .bind(status)
        .fetch_one(&self.pool);

        let (results, total) = tokio::try_join!(results_query, count_query)?;
        Ok(Page::new(results, page, size, total))
    }

    pub async fn cancel_job(&self, job_id: i32) -> JobResult<ImportJob> {
        self.queue.cancel_job(JobKind::Import, job_id).await?;
        self.get_job(job_id).await
    }

    pub async fn statistics(&self, user_id: Option<i32>) -> JobResult<ImportStatistics> {
        let (total_jobs, completed_jobs, failed_jobs, processed, valid, imported): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COUNT(*) FILTER (WHERE status = 'completed'),
                      COUNT(*) FILTER (WHERE status = 'failed'),
                      COALESCE(SUM(processed_records), 0)::BIGINT,
                      COALESCE(SUM(valid_records), 0)::BIGINT,
                      COALESCE(SUM(imported_records), 0)::BIGINT
               FROM import_jobs
               WHERE ($1::int4 IS NULL OR user_id = $1)"#,
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await?;

        let average_success_rate = if processed > 0 {
            ((valid as f64 / processed as f64) * 10000.0).round() / 100.0
        } else {
            0.0
        };

        Ok(ImportStatistics {
            total_jobs,
            completed_jobs,
            failed_jobs,
            total_records_processed: processed,
            total_valid_records: valid,
            total_imported_records: imported,
            average_success_rate,
        })
    }

    /// Delete finished jobs older than `older_than_days` along with their files.
    pub async fn cleanup_old_jobs(&self, older_than_days: i32) -> JobResult<u64> {
        let paths: Vec<(String,)> = sqlx::query_as(
            r#"DELETE FROM import_jobs
               WHERE created_at < NOW() - make_interval(days => $1)
                 AND status IN ('completed', 'failed', 'cancelled')
               RETURNING file_path"#,
        )
        .bind(older_than_days)
        .fetch_all(&self.pool)
        .await?;

        for (path,) in &paths {
            remove_file_if_present(path).await;
        }

        log::info!("import cleanup: removed {} jobs", paths.len());
        Ok(paths.len() as u64)
    }

    /// Claim a pending job and run it to completion.
    pub async fn process_job(&self, job_id: i32) -> JobResult<JobStatus> {
        if !self.queue.start_job(JobKind::Import, job_id).await? {
            return match self.queue.status(JobKind::Import, job_id).await? {
                None => Err(JobError::NotFound(job_id)),
                Some(status) => Err(JobError::Invalid(format!(
                    "Import job {} is {}, not pending",
                    job_id,
                    status.as_str()
                ))),
            };
        }
        self.run_claimed(job_id).await
    }

    /// Run a job that is already in `processing`, recording its final status.
    pub async fn run_claimed(&self, job_id: i32) -> JobResult<JobStatus> {
        log::info!("import job {}: processing", job_id);

        match self.execute(job_id).await {
            Ok(counters) => {
                if self.queue.complete_job(JobKind::Import, job_id).await? {
                    log::info!(
                        "import job {}: completed ({} processed, {} valid, {} invalid, {} risky, {} duplicate, {} imported)",
                        job_id,
                        counters.processed,
                        counters.valid,
                        counters.invalid,
                        counters.risky,
                        counters.duplicate,
                        counters.imported
                    );
                    Ok(JobStatus::Completed)
                } else {
                    self.final_status(job_id).await
                }
            }
            Err(JobError::Cancelled) => {
                log::warn!("import job {}: cancelled by user, stopping", job_id);
                Ok(JobStatus::Cancelled)
            }
            Err(err) => {
                log::error!("import job {}: failed: {}", job_id, err);
                self.queue
                    .fail_job(JobKind::Import, job_id, &err.to_string())
                    .await?;
                self.final_status(job_id).await
            }
        }
    }

    async fn final_status(&self, job_id: i32) -> JobResult<JobStatus> {
        self.queue
            .status(JobKind::Import, job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    async fn execute(&self, job_id: i32) -> JobResult<ImportCounters> {
        let job = self.get_job(job_id).await?;
        let options: ImportOptions = serde_json::from_value(job.options.clone())
            .map_err(|e| JobError::Invalid(format!("Invalid import options: {}", e)))?;

        let path = PathBuf::from(&job.file_path);
        let content = tokio::task::spawn_blocking(move || columns::read_csv(&path)).await??;

        columns::validate_column_mapping(&options.column_mapping, Some(&content.headers))
            .map_err(JobError::Invalid)?;
        if !content.errors.is_empty() {
            log::warn!(
                "import job {}: {} unreadable rows recorded as invalid",
                job_id,
                content.rows.iter().filter(|row| row.error.is_some()).count()
            );
        }

        let total = content.rows.len() as i32;
        sqlx::query("UPDATE import_jobs SET total_records = $2 WHERE id = $1")
            .bind(job_id)
            .bind(total)
            .execute(&self.pool)
            .await?;

        let mut counters = ImportCounters::default();
        let mut seen: HashSet<String> = HashSet::new();
        let batch_size = options.batch_size.clamp(1, MAX_BATCH_SIZE);

        for batch in content.rows.chunks(batch_size) {
            if self.queue.is_job_cancelled(JobKind::Import, job_id).await? {
                return Err(JobError::Cancelled);
            }

            let outcomes = self
                .assess_batch(&content.headers, batch, &options, &mut seen)
                .await?;
            counters = self
                .write_batch(job_id, total, &options, outcomes, counters)
                .await?;

            log::debug!(
                "import job {}: {}/{} rows processed",
                job_id,
                counters.processed,
                total
            );
        }

        Ok(counters)
    }

    async fn assess_batch(
        &self,
        headers: &[String],
        batch: &[CsvRow],
        options: &ImportOptions,
        seen: &mut HashSet<String>,
    ) -> JobResult<Vec<RowOutcome>> {
        let mapped: Vec<MappedRow> = batch
            .iter()
            .map(|row| map_row(headers, &row.record, &options.column_mapping))
            .collect();

        let candidates: Vec<String> = batch
            .iter()
            .zip(&mapped)
            .filter(|(row, _)| row.error.is_none())
            .filter_map(|(_, mapped)| mapped.email.clone())
            .collect();
        let existing: HashSet<String> = if candidates.is_empty() {
            HashSet::new()
        } else {
            sqlx::query_scalar::<_, String>("SELECT email FROM subscribers WHERE email = ANY($1)")
                .bind(&candidates)
                .fetch_all(&self.pool)
                .await?
                .into_iter()
                .collect()
        };

        let mut outcomes = Vec::with_capacity(batch.len());
        for (row, mapped) in batch.iter().zip(mapped) {
            let original = Value::Object(
                columns::row_to_map(headers, &row.record)
                    .into_iter()
                    .map(|(k, v)| (k, Value::String(v)))
                    .collect(),
            );
            let row_number = row.row_number;

            if let Some(error) = &row.error {
                outcomes.push(RowOutcome {
                    row_number,
                    mapped,
                    status: RowStatus::Invalid,
                    score: 0,
                    issues: vec![error.clone()],
                    suggestion: None,
                    original,
                });
                continue;
            }

            let Some(email) = mapped.email.clone() else {
                outcomes.push(RowOutcome {
                    row_number,
                    mapped,
                    status: RowStatus::Invalid,
                    score: 0,
                    issues: vec!["Email field is required".to_string()],
                    suggestion: None,
                    original,
                });
                continue;
            };

            let assessment = validation::assess_email(&email);
            let mut status = validation::classify(assessment.score, options.validation_threshold);
            if status != RowStatus::Invalid {
                let repeated = !seen.insert(email.clone());
                if repeated || existing.contains(&email) {
                    status = RowStatus::Duplicate;
                }
            }

            outcomes.push(RowOutcome {
                row_number,
                mapped,
                status,
                score: assessment.score,
                issues: assessment.issues,
                suggestion: assessment.suggestion,
                original,
            });
        }

        Ok(outcomes)
    }

    /// Persist a batch and its counters in one transaction. The counter update
    /// only applies while the job is still `processing`; otherwise the batch is
    /// rolled back and the job treated as cancelled.
    async fn write_batch(
        &self,
        job_id: i32,
        total: i32,
        options: &ImportOptions,
        outcomes: Vec<RowOutcome>,
        mut counters: ImportCounters,
    ) -> JobResult<ImportCounters> {
        let mut tx = self.pool.begin().await?;

        for outcome in outcomes {
            let imported = match outcome.status {
                RowStatus::Valid => insert_subscriber(&mut tx, &outcome.mapped, options).await?,
                RowStatus::Risky if options.import_risky => {
                    insert_subscriber(&mut tx, &outcome.mapped, options).await?
                }
                RowStatus::Duplicate if options.duplicate_handling != DuplicateHandling::Skip => {
                    update_subscriber(&mut tx, &outcome.mapped, options).await?
                }
                _ => false,
            };

            sqlx::query(
                r#"INSERT INTO import_results
                   (import_job_id, row_number, email, status, confidence_score, issues, suggestion, imported, original_data)
                   VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)"#,
            )
            .bind(job_id)
            .bind(outcome.row_number)
            .bind(&outcome.mapped.email)
            .bind(outcome.status.as_str())
            .bind(outcome.score)
            .bind(&outcome.issues)
            .bind(&outcome.suggestion)
            .bind(imported)
            .bind(&outcome.original)
            .execute(&mut *tx)
            .await?;

            counters.record(outcome.status, imported);
        }

        let progress = progress_percentage(counters.processed as i64, total as i64);
        let updated = sqlx::query(
            r#"UPDATE import_jobs
               SET processed_records = $2, valid_records = $3, invalid_records = $4,
                   risky_records = $5, duplicate_records = $6, imported_records = $7,
                   progress_percentage = $8
               WHERE id = $1 AND status = 'processing'"#,
        )
        .bind(job_id)
        .bind(counters.processed)
        .bind(counters.valid)
        .bind(counters.invalid)
        .bind(counters.risky)
        .bind(counters.duplicate)
        .bind(counters.imported)
        .bind(progress)
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            tx.rollback().await?;
            return Err(JobError::Cancelled);
        }

        tx.commit().await?;
        Ok(counters)
    }
}

async fn insert_subscriber(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    row: &MappedRow,
    options: &ImportOptions,
) -> Result<bool, sqlx::Error> {
    let result = sqlx::query(
        r#"INSERT INTO subscribers
           (email, first_name, last_name, company, phone, location, status, group_ids, segment_ids, custom_fields)
           VALUES ($1, $2, $3, $4, $5, $6, 'active', $7, $8, $9)
           ON CONFLICT (email) DO NOTHING"#,
    )
    .bind(&row.email)
    .bind(&row.first_name)
    .bind(&row.last_name)
    .bind(&row.company)
    .bind(&row.phone)
    .bind(&row.location)
    .bind(&options.group_ids)
    .bind(&options.segment_ids)
    .bind(Value::Object(row.custom_fields.clone()))
    .execute(&mut **tx)
    .await?;
    Ok(result.rows_affected() == 1)
}

async fn update_subscriber(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    row: &MappedRow,
    options: &ImportOptions,
) -> Result<bool, sqlx::Error> {
    let sql = match options.duplicate_handling {
        DuplicateHandling::Replace => {
            r#"UPDATE subscribers
               SET first_name = $2, last_name = $3, company = $4, phone = $5, location = $6,
                   group_ids = $7, segment_ids = $8, custom_fields = $9, updated_at = NOW()
               WHERE email = $1"#
        }
        _ => {
            r#"UPDATE subscribers
               SET first_name = COALESCE($2, first_name),
                   last_name = COALESCE($3, last_name),
                   company = COALESCE($4, company),
                   phone = COALESCE($5, phone),
                   location = COALESCE($6, location),
                   group_ids = ARRAY(SELECT DISTINCT g FROM unnest(group_ids || $7::int4[]) AS g),
                   segment_ids = ARRAY(SELECT DISTINCT s FROM unnest(segment_ids || $8::int4[]) AS s),
                   custom_fields = custom_fields || $9,
                   updated_at = NOW()
               WHERE email = $1"#
        }
    };

    let result = sqlx::query(sql)
        .bind(&row.email)
        .bind(&row.first_name)
        .bind(&row.last_name)
        .bind(&row.company)
        .bind(&row.phone)
        .bind(&row.location)
        .bind(&options.group_ids)
        .bind(&options.segment_ids)
        .bind(Value::Object(row.custom_fields.clone()))
        .execute(&mut **tx)
        .await?;
    Ok(result.rows_affected() == 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn options(pairs: &[(&str, &str)]) -> ImportOptions {
        ImportOptions {
            column_mapping: pairs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            duplicate_handling: DuplicateHandling::Skip,
            validation_threshold: DEFAULT_THRESHOLD,
            batch_size: DEFAULT_BATCH_SIZE,
            group_ids: vec![],
            segment_ids: vec![],
            import_risky: false,
        }
    }

    #[test]
    fn maps_row_values_through_column_mapping() {
        let headers = vec![
            "E-mail".to_string(),
            "Given".to_string(),
            "Plan".to_string(),
            "Ignored".to_string(),
        ];
        let record = StringRecord::from(vec![" Jane@Example.com ", "Jane", "pro", "x"]);
        let opts = options(&[("E-mail", "email"), ("Given", "firstName"), ("Plan", "custom.plan")]);

        let row = map_row(&headers, &record, &opts.column_mapping);
        assert_eq!(row.email.as_deref(), Some("jane@example.com"));
        assert_eq!(row.first_name.as_deref(), Some("Jane"));
        assert_eq!(row.custom_fields.get("plan"), Some(&Value::String("pro".into())));
        assert!(row.last_name.is_none());
    }

    #[test]
    fn empty_cells_stay_unset() {
        let headers = vec!["Email".to_string(), "First".to_string()];
        let record = StringRecord::from(vec!["", "  "]);
        let opts = options(&[("Email", "email"), ("First", "firstName")]);
        assert_eq!(map_row(&headers, &record, &opts.column_mapping), MappedRow::default());
    }

    #[test]
    fn options_validation_bounds() {
        let mut opts = options(&[("Email", "email")]);
        assert!(opts.validate().is_ok());

        opts.validation_threshold = 101;
        assert!(opts.validate().is_err());

        opts.validation_threshold = 50;
        opts.batch_size = 0;
        assert!(opts.validate().is_err());

        assert!(options(&[("Name", "firstName")]).validate().is_err());
    }

    #[test]
    fn options_defaults_from_json() {
        let opts: ImportOptions =
            serde_json::from_str(r#"{"columnMapping": {"Email": "email"}}"#).unwrap();
        assert_eq!(opts.duplicate_handling, DuplicateHandling::Skip);
        assert_eq!(opts.validation_threshold, 50);
        assert_eq!(opts.batch_size, 100);
        assert!(!opts.import_risky);
    }

    #[test]
    fn counters_track_each_status() {
        let mut counters = ImportCounters::default();
        counters.record(RowStatus::Valid, true);
        counters.record(RowStatus::Invalid, false);
        counters.record(RowStatus::Duplicate, false);
        counters.record(RowStatus::Risky, false);
        assert_eq!(counters.processed, 4);
        assert_eq!(counters.valid, 1);
        assert_eq!(counters.invalid, 1);
        assert_eq!(counters.duplicate, 1);
        assert_eq!(counters.risky, 1);
        assert_eq!(counters.imported, 1);
    }
}
