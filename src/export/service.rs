use chrono::{DateTime, Duration, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool, Postgres, QueryBuilder};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};

use super::fields::{ExportField, MembershipNames};
use super::filters::{ExportFilters, ExportOptions};
use super::writer::ExportSink;
use crate::config::AppConfig;
use crate::jobs::{
    JobError, JobKind, JobQueue, JobResult, JobStatus, progress_percentage, remove_file_if_present,
};
use crate::models::{Page, SUBSCRIBER_COLUMNS, Subscriber};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportRequest {
    #[serde(default)]
    pub filters: ExportFilters,
    pub options: ExportOptions,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportJob {
    pub id: i32,
    pub file_name: String,
    #[serde(skip)]
    pub file_path: String,
    pub status: JobStatus,
    pub total_records: i32,
    pub processed_records: i32,
    pub progress_percentage: i32,
    pub filters: Value,
    pub options: Value,
    pub file_size_bytes: Option<i64>,
    pub error: Option<String>,
    pub user_id: Option<i32>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

const EXPORT_JOB_COLUMNS: &str = "id, file_name, file_path, status, total_records, processed_records, \
     progress_percentage, filters, options, file_size_bytes, error, user_id, expires_at, created_at, \
     started_at, completed_at";

/// Size and duration estimate for an export that has not been queued.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportPreview {
    pub total_subscribers: i64,
    pub estimated_file_size_bytes: i64,
    pub estimated_processing_time_seconds: i64,
}

const ESTIMATED_BYTES_PER_FIELD: i64 = 20;
const ESTIMATED_ROWS_PER_SECOND: i64 = 1_000;

impl ExportPreview {
    pub fn estimate(total_subscribers: i64, field_count: usize) -> Self {
        Self {
            total_subscribers,
            estimated_file_size_bytes: total_subscribers * field_count as i64 * ESTIMATED_BYTES_PER_FIELD,
            estimated_processing_time_seconds: (total_subscribers + ESTIMATED_ROWS_PER_SECOND - 1)
                / ESTIMATED_ROWS_PER_SECOND,
        }
    }
}

/// Location of a finished export on disk.
#[derive(Debug, Clone)]
pub struct ExportDownload {
    pub path: PathBuf,
    pub file_name: String,
    pub content_type: &'static str,
}

/// `subscribers-export-<timestamp>-<id>.<ext>`
pub fn export_file_name(created_at: DateTime<Utc>, job_id: i32, extension: &str) -> String {
    format!(
        "subscribers-export-{}-{}.{}",
        created_at.format("%Y%m%dT%H%M%SZ"),
        job_id,
        extension
    )
}

#[derive(Clone)]
pub struct ExportService {
    pool: PgPool,
    queue: JobQueue,
    config: AppConfig,
}

impl ExportService {
    pub fn new(pool: PgPool, config: AppConfig) -> Self {
        let queue = JobQueue::new(pool.clone());
        Self {
            pool,
            queue,
            config,
        }
    }

    pub async fn create_job(
        &self,
        request: ExportRequest,
        user_id: Option<i32>,
    ) -> JobResult<ExportJob> {
        request.filters.validate().map_err(JobError::Invalid)?;
        request.options.validate().map_err(JobError::Invalid)?;
        self.check_membership_ids(&request.filters).await?;

        let filters =
            serde_json::to_value(&request.filters).map_err(|e| JobError::Invalid(e.to_string()))?;
        let options =
            serde_json::to_value(&request.options).map_err(|e| JobError::Invalid(e.to_string()))?;
        let expires_at = Utc::now() + Duration::days(self.config.export_ttl_days);

        let mut tx = self.pool.begin().await?;
        let (job_id, created_at): (i32, DateTime<Utc>) = sqlx::query_as(
            r#"INSERT INTO export_jobs (file_name, file_path, filters, options, user_id, expires_at)
               VALUES ('', '', $1, $2, $3, $4)
               RETURNING id, created_at"#,
        )
        .bind(filters)
        .bind(options)
        .bind(user_id)
        .bind(expires_at)
        .fetch_one(&mut *tx)
        .await?;

        let file_name =
            export_file_name(created_at, job_id, request.options.format.extension());
        let file_path = self.config.export_dir().join(&file_name);

        let sql = format!(
            "UPDATE export_jobs SET file_name = $2, file_path = $3 WHERE id = $1 RETURNING {}",
            EXPORT_JOB_COLUMNS
        );
        let job: ExportJob = sqlx::query_as(&sql)
            .bind(job_id)
            .bind(&file_name)
            .bind(file_path.to_string_lossy().to_string())
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        log::info!("export job {}: created ({})", job.id, job.file_name);
        Ok(job)
    }

    /// Count what an export would contain without queueing it.
    pub async fn preview(&self, request: &ExportRequest) -> JobResult<ExportPreview> {
        request.filters.validate().map_err(JobError::Invalid)?;
        request.options.validate().map_err(JobError::Invalid)?;
        self.check_membership_ids(&request.filters).await?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM subscribers");
        request.filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;

        Ok(ExportPreview::estimate(total, request.options.fields.len()))
    }

    async fn check_membership_ids(&self, filters: &ExportFilters) -> JobResult<()> {
        for (table, ids, label) in [
            ("subscriber_groups", &filters.group_ids, "group"),
            ("segments", &filters.segment_ids, "segment"),
        ] {
            if ids.is_empty() {
                continue;
            }
            let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", table);
            let found: Vec<i32> = sqlx::query_scalar(&sql)
                .bind(ids)
                .fetch_all(&self.pool)
                .await?;
            if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
                return Err(JobError::Invalid(format!(
                    "Unknown {} id {}",
                    label, missing
                )));
            }
        }
        Ok(())
    }

    pub async fn get_job(&self, job_id: i32) -> JobResult<ExportJob> {
        let sql = format!("SELECT {} FROM export_jobs WHERE id = $1", EXPORT_JOB_COLUMNS);
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
    ) -> JobResult<Page<ExportJob>> {
        let offset = (page - 1) * size;
        let sql = format!(
            "SELECT {} FROM export_jobs WHERE ($1::job_status IS NULL OR status = $1) \
             ORDER BY created_at DESC, id DESC LIMIT $2 OFFSET $3",
            EXPORT_JOB_COLUMNS
        );
        let jobs_query = sqlx::query_as::<_, ExportJob>(&sql)
            .bind(status)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool);
        let count_query = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM export_jobs WHERE ($1::job_status IS NULL OR status = $1)",
        )
        .bind(status)
        .fetch_one(&self.pool);

        let (jobs, total) = tokio::try_join!(jobs_query, count_query)?;
        Ok(Page::new(jobs, page, size, total))
    }

    pub async fn cancel_job(&self, job_id: i32) -> JobResult<ExportJob> {
        self.queue.cancel_job(JobKind::Export, job_id).await?;
        let job = self.get_job(job_id).await?;
        remove_file_if_present(Path::new(&job.file_path)).await;
        Ok(job)
    }

    /// Resolve the file of a completed, unexpired export.
    pub async fn download(&self, job_id: i32) -> JobResult<ExportDownload> {
        let job = self.get_job(job_id).await?;
        if job.status != JobStatus::Completed {
            return Err(JobError::Invalid(format!(
                "Export job {} is {}, not completed",
                job_id,
                job.status.as_str()
            )));
        }
        if job.expires_at < Utc::now() {
            return Err(JobError::FileMissing("Export file expired".to_string()));
        }

        let path = PathBuf::from(&job.file_path);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            return Err(JobError::FileMissing("Export file not found".to_string()));
        }

        let options: ExportOptions = serde_json::from_value(job.options)
            .map_err(|e| JobError::Invalid(format!("Invalid export options: {}", e)))?;

        Ok(ExportDownload {
            path,
            file_name: job.file_name,
            content_type: options.format.content_type(),
        })
    }

    /// Delete expired export files and their job rows.
    pub async fn cleanup_expired(&self) -> JobResult<u64> {
        let paths: Vec<(String,)> = sqlx::query_as(
            r#"DELETE FROM export_jobs
               WHERE expires_at < NOW() AND status IN ('completed', 'failed', 'cancelled')
               RETURNING file_path"#,
        )
        .fetch_all(&self.pool)
        .await?;

        for (path,) in &paths {
            remove_file_if_present(Path::new(path)).await;
        }

        log::info!("export cleanup: removed {} expired jobs", paths.len());
        Ok(paths.len() as u64)
    }

    /// Claim a pending job and run it to completion.
    pub async fn process_job(&self, job_id: i32) -> JobResult<JobStatus> {
        if !self.queue.start_job(JobKind::Export, job_id).await? {
            return match self.queue.status(JobKind::Export, job_id).await? {
                None => Err(JobError::NotFound(job_id)),
                Some(status) => Err(JobError::Invalid(format!(
                    "Export job {} is {}, not pending",
                    job_id,
                    status.as_str()
                ))),
            };
        }
        self.run_claimed(job_id).await
    }

    /// Run a job already in `processing`; partial files are removed unless it completes.
    pub async fn run_claimed(&self, job_id: i32) -> JobResult<JobStatus> {
        log::info!("export job {}: processing", job_id);
        let job = self.get_job(job_id).await?;
        let path = PathBuf::from(&job.file_path);

        match self.execute(&job, &path).await {
            Ok((rows, size)) => {
                sqlx::query("UPDATE export_jobs SET file_size_bytes = $2 WHERE id = $1")
                    .bind(job_id)
                    .bind(size as i64)
                    .execute(&self.pool)
                    .await?;
                if self.queue.complete_job(JobKind::Export, job_id).await? {
                    log::info!(
                        "export job {}: completed ({} rows, {} bytes)",
                        job_id,
                        rows,
                        size
                    );
                    return Ok(JobStatus::Completed);
                }
                remove_file_if_present(&path).await;
                self.final_status(job_id).await
            }
            Err(JobError::Cancelled) => {
                log::warn!("export job {}: cancelled by user, stopping", job_id);
                remove_file_if_present(&path).await;
                Ok(JobStatus::Cancelled)
            }
            Err(err) => {
                log::error!("export job {}: failed: {}", job_id, err);
                remove_file_if_present(&path).await;
                self.queue
                    .fail_job(JobKind::Export, job_id, &err.to_string())
                    .await?;
                self.final_status(job_id).await
            }
        }
    }

    async fn final_status(&self, job_id: i32) -> JobResult<JobStatus> {
        self.queue
            .status(JobKind::Export, job_id)
            .await?
            .ok_or(JobError::NotFound(job_id))
    }

    async fn execute(&self, job: &ExportJob, path: &Path) -> JobResult<(i32, u64)> {
        let filters: ExportFilters = serde_json::from_value(job.filters.clone())
            .map_err(|e| JobError::Invalid(format!("Invalid export filters: {}", e)))?;
        let options: ExportOptions = serde_json::from_value(job.options.clone())
            .map_err(|e| JobError::Invalid(format!("Invalid export options: {}", e)))?;

        let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM subscribers");
        filters.push_where(&mut count);
        let total: i64 = count.build_query_scalar().fetch_one(&self.pool).await?;
        let total = total as i32;

        sqlx::query("UPDATE export_jobs SET total_records = $2 WHERE id = $1")
            .bind(job.id)
            .bind(total)
            .execute(&self.pool)
            .await?;

        let names = self.membership_names().await?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let headers: Vec<&'static str> = options.fields.iter().map(|f| f.header()).collect();
        let format = options.format;
        let sink_path = path.to_path_buf();
        let mut sink = tokio::task::spawn_blocking(move || {
            ExportSink::create(format, &sink_path, &headers)
        })
        .await??;

        let mut processed: i32 = 0;
        let mut last_id: i32 = 0;

        loop {
            if self.queue.is_job_cancelled(JobKind::Export, job.id).await? {
                return Err(JobError::Cancelled);
            }

            let mut page = QueryBuilder::<Postgres>::new(format!(
                "SELECT {} FROM subscribers",
                SUBSCRIBER_COLUMNS
            ));
            filters.push_where(&mut page);
            page.push(" AND id > ");
            page.push_bind(last_id);
            page.push(" ORDER BY id ASC LIMIT ");
            page.push_bind(options.batch_size as i64);

            let subscribers: Vec<Subscriber> =
                page.build_query_as().fetch_all(&self.pool).await?;
            let Some(last) = subscribers.last() else {
                break;
            };
            last_id = last.id;

            let rows = render_rows(&subscribers, &options.fields, &names);
            let batch_len = rows.len() as i32;
            sink = tokio::task::spawn_blocking(move || -> JobResult<ExportSink> {
                sink.write_rows(&rows)?;
                Ok(sink)
            })
            .await??;

            processed += batch_len;
            let progress = progress_percentage(processed as i64, total.max(processed) as i64);
            let updated = sqlx::query(
                r#"UPDATE export_jobs SET processed_records = $2, progress_percentage = $3
                   WHERE id = $1 AND status = 'processing'"#,
            )
            .bind(job.id)
            .bind(processed)
            .bind(progress)
            .execute(&self.pool)
            .await?;
            if updated.rows_affected() == 0 {
                return Err(JobError::Cancelled);
            }

            log::debug!("export job {}: {}/{} rows written", job.id, processed, total);

            if subscribers.len() < options.batch_size {
                break;
            }
        }

        let size = tokio::task::spawn_blocking(move || sink.finish()).await??;
        Ok((processed, size))
    }

    async fn membership_names(&self) -> JobResult<MembershipNames> {
        let groups: Vec<(i32, String)> = sqlx::query_as("SELECT id, name FROM subscriber_groups")
            .fetch_all(&self.pool)
            .await?;
        let segments: Vec<(i32, String)> = sqlx::query_as("SELECT id, name FROM segments")
            .fetch_all(&self.pool)
            .await?;
        Ok(MembershipNames {
            groups: groups.into_iter().collect(),
            segments: segments.into_iter().collect(),
        })
    }
}

fn render_rows(
    subscribers: &[Subscriber],
    fields: &[ExportField],
    names: &MembershipNames,
) -> Vec<Vec<super::fields::CellValue>> {
    subscribers
        .iter()
        .map(|subscriber| {
            fields
                .iter()
                .map(|field| field.value(subscriber, names))
                .collect()
        })
        .collect()
}
