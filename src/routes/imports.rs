//! Bulk subscriber import: CSV upload, job tracking and per-row results.

use rocket::State;
use rocket::form::Form;
use rocket::fs::TempFile;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use super::files;
use super::params::{ImportResultParams, JobListParams};
use crate::auth::{AuthUser, RequireAdmin};
use crate::config::AppConfig;
use crate::error::ApiError;
use crate::import::columns::{self, CsvInspection, MappableField};
use crate::import::service::{ImportStatistics, NewImport};
use crate::import::{ImportJob, ImportOptions, ImportResult, ImportService};
use crate::jobs::{JobError, remove_file_if_present};
use crate::models::{ApiResponse, Page};

const SAMPLE_ROWS: usize = 5;

#[derive(FromForm)]
pub struct ImportUpload<'r> {
    pub file: TempFile<'r>,
    /// JSON-encoded `ImportOptions`.
    pub options: Option<String>,
}

#[derive(FromForm)]
pub struct CsvFile<'r> {
    pub file: TempFile<'r>,
}

fn parse_options(raw: Option<&str>) -> Result<ImportOptions, ApiError> {
    let raw = raw
        .map(str::trim)
        .filter(|raw| !raw.is_empty())
        .ok_or_else(|| ApiError::BadRequest("options with a columnMapping are required".into()))?;
    let options: ImportOptions = serde_json::from_str(raw)
        .map_err(|e| ApiError::BadRequest(format!("Invalid import options: {}", e)))?;
    options.validate().map_err(ApiError::BadRequest)?;
    Ok(options)
}

async fn inspect(path: std::path::PathBuf) -> Result<CsvInspection, ApiError> {
    let inspection =
        tokio::task::spawn_blocking(move || columns::inspect_csv(&path, SAMPLE_ROWS))
            .await
            .map_err(JobError::from)??;
    Ok(inspection)
}

/// Upload a CSV file and queue it for import.
#[openapi(skip)]
#[post("/email-marketing/import", data = "<upload>")]
pub async fn create_import(
    user: AuthUser,
    config: &State<AppConfig>,
    imports: &State<ImportService>,
    mut upload: Form<ImportUpload<'_>>,
) -> ApiResult<ImportJob> {
    let options = parse_options(upload.options.as_deref())?;
    let stored = files::store_csv(&mut upload.file, config).await?;

    let checked = match inspect(stored.path.clone()).await {
        Ok(inspection) if inspection.headers.iter().all(String::is_empty) => {
            Err(ApiError::BadRequest("File has no header row".into()))
        }
        Ok(inspection) => {
            columns::validate_column_mapping(&options.column_mapping, Some(&inspection.headers))
                .map(|_| inspection.total_rows)
                .map_err(ApiError::BadRequest)
        }
        Err(e) => Err(e),
    };
    let total_rows = match checked {
        Ok(total_rows) => total_rows,
        Err(e) => {
            remove_file_if_present(&stored.path).await;
            return Err(e);
        }
    };

    let job = imports
        .create_job(NewImport {
            file_name: stored.file_name,
            original_file_name: stored.original_file_name,
            file_path: stored.path,
            total_records: i32::try_from(total_rows)
                .map_err(|_| ApiError::BadRequest("File has too many rows".into()))?,
            options,
            user_id: Some(user.id),
        })
        .await?;

    Ok(Json(ApiResponse::with_message(job, "Import job created")))
}

/// Inspect a CSV file without importing it.
#[openapi(skip)]
#[post("/email-marketing/import/validate", data = "<upload>")]
pub async fn validate_import(
    _user: AuthUser,
    config: &State<AppConfig>,
    mut upload: Form<CsvFile<'_>>,
) -> ApiResult<CsvInspection> {
    files::check_upload(&upload.file, config.max_upload_bytes)?;

    let scratch = tempfile::Builder::new()
        .prefix("validate-")
        .suffix(".csv")
        .tempfile_in(config.import_dir())
        .map_err(|e| ApiError::InternalError(format!("Failed to create scratch file: {}", e)))?;
    upload
        .file
        .copy_to(scratch.path())
        .await
        .map_err(|e| ApiError::InternalError(format!("Failed to read upload: {}", e)))?;

    let inspection = inspect(scratch.path().to_path_buf()).await?;
    Ok(Json(ApiResponse::ok(inspection)))
}

/// Subscriber fields a CSV column can be mapped to.
#[openapi(tag = "Import")]
#[get("/email-marketing/import/fields")]
pub fn import_fields(_user: AuthUser) -> Json<ApiResponse<Vec<MappableField>>> {
    Json(ApiResponse::ok(columns::mappable_fields()))
}

/// List import jobs, newest first.
#[openapi(tag = "Import")]
#[get("/email-marketing/import/jobs?<params..>")]
pub async fn list_import_jobs(
    _user: AuthUser,
    imports: &State<ImportService>,
    params: JobListParams,
) -> ApiResult<Page<ImportJob>> {
    let pagination = params.pagination();
    let page = imports
        .list_jobs(params.status, pagination.page(), pagination.size())
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

#[openapi(tag = "Import")]
#[get("/email-marketing/import/jobs/<job_id>")]
pub async fn get_import_job(
    _user: AuthUser,
    imports: &State<ImportService>,
    job_id: i32,
) -> ApiResult<ImportJob> {
    Ok(Json(ApiResponse::ok(imports.get_job(job_id).await?)))
}

/// Per-row validation results of an import job.
#[openapi(tag = "Import")]
#[get("/email-marketing/import/jobs/<job_id>/results?<params..>")]
pub async fn list_import_results(
    _user: AuthUser,
    imports: &State<ImportService>,
    job_id: i32,
    params: ImportResultParams,
) -> ApiResult<Page<ImportResult>> {
    let pagination = params.pagination();
    let page = imports
        .list_results(job_id, params.status, pagination.page(), pagination.size())
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

/// Cancel a pending or running import. Finished jobs answer 409.
#[openapi(tag = "Import")]
#[post("/email-marketing/import/jobs/<job_id>/cancel")]
pub async fn cancel_import_job(
    user: AuthUser,
    imports: &State<ImportService>,
    job_id: i32,
) -> ApiResult<ImportJob> {
    let job = imports.cancel_job(job_id).await?;
    log::info!("import job {}: cancelled by user {}", job_id, user.id);
    Ok(Json(ApiResponse::with_message(job, "Import job cancelled")))
}

/// Aggregate import counters; admins see every job, users their own.
#[openapi(tag = "Import")]
#[get("/email-marketing/import/statistics")]
pub async fn import_statistics(
    user: AuthUser,
    imports: &State<ImportService>,
) -> ApiResult<ImportStatistics> {
    let owner = (!user.is_admin()).then_some(user.id);
    Ok(Json(ApiResponse::ok(imports.statistics(owner).await?)))
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CleanupResponse {
    pub deleted_jobs: u64,
}

/// Delete finished import jobs older than `older_than_days` (default 30).
#[openapi(tag = "Import")]
#[post("/email-marketing/import/cleanup?<older_than_days>")]
pub async fn cleanup_imports(
    _admin: RequireAdmin,
    imports: &State<ImportService>,
    older_than_days: Option<i32>,
) -> ApiResult<CleanupResponse> {
    let days = older_than_days.unwrap_or(30);
    if days < 1 {
        return Err(ApiError::BadRequest("older_than_days must be at least 1".into()));
    }
    let deleted_jobs = imports.cleanup_old_jobs(days).await?;
    Ok(Json(ApiResponse::with_message(
        CleanupResponse { deleted_jobs },
        format!("Removed {} import jobs", deleted_jobs),
    )))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn options_require_a_mapping() {
        assert!(matches!(parse_options(None), Err(ApiError::BadRequest(_))));
        assert!(matches!(parse_options(Some("  ")), Err(ApiError::BadRequest(_))));
        assert!(matches!(
            parse_options(Some(r#"{"columnMapping":{"Name":"firstName"}}"#)),
            Err(ApiError::BadRequest(_))
        ));

        let options =
            parse_options(Some(r#"{"columnMapping":{"E-mail":"email"},"importRisky":true}"#))
                .unwrap();
        assert!(options.import_risky);
        assert_eq!(options.validation_threshold, 50);
    }

    #[test]
    fn malformed_options_are_bad_requests() {
        let err = parse_options(Some("{not json")).unwrap_err();
        assert!(err.to_string().starts_with("Invalid import options"));
    }
}
