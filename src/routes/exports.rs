//! Bulk subscriber export: job creation, tracking and file download.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::openapi;

use super::ApiResult;
use super::files::FileDownload;
use super::imports::CleanupResponse;
use super::params::JobListParams;
use crate::auth::{AuthUser, RequireAdmin};
use crate::error::ApiError;
use crate::export::fields::ExportFieldInfo;
use crate::export::{ExportJob, ExportPreview, ExportRequest, ExportService, available_fields};
use crate::models::{ApiResponse, Page};

/// Queue an export of the subscribers matching `filters`.
#[openapi(tag = "Export")]
#[post("/email-marketing/export", data = "<request>")]
pub async fn create_export(
    user: AuthUser,
    exports: &State<ExportService>,
    request: Json<ExportRequest>,
) -> ApiResult<ExportJob> {
    let job = exports.create_job(request.into_inner(), Some(user.id)).await?;
    Ok(Json(ApiResponse::with_message(job, "Export job created")))
}

/// Count and size an export before queueing it.
#[openapi(tag = "Export")]
#[post("/email-marketing/export/preview", data = "<request>")]
pub async fn preview_export(
    _user: AuthUser,
    exports: &State<ExportService>,
    request: Json<ExportRequest>,
) -> ApiResult<ExportPreview> {
    Ok(Json(ApiResponse::ok(exports.preview(&request).await?)))
}

#[openapi(tag = "Export")]
#[get("/email-marketing/export/fields")]
pub fn export_fields(_user: AuthUser) -> Json<ApiResponse<Vec<ExportFieldInfo>>> {
    Json(ApiResponse::ok(available_fields()))
}

#[openapi(tag = "Export")]
#[get("/email-marketing/export/jobs?<params..>")]
pub async fn list_export_jobs(
    _user: AuthUser,
    exports: &State<ExportService>,
    params: JobListParams,
) -> ApiResult<Page<ExportJob>> {
    let pagination = params.pagination();
    let page = exports
        .list_jobs(params.status, pagination.page(), pagination.size())
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

#[openapi(tag = "Export")]
#[get("/email-marketing/export/jobs/<job_id>")]
pub async fn get_export_job(
    _user: AuthUser,
    exports: &State<ExportService>,
    job_id: i32,
) -> ApiResult<ExportJob> {
    Ok(Json(ApiResponse::ok(exports.get_job(job_id).await?)))
}

/// Download the file of a completed export.
#[openapi(skip)]
#[get("/email-marketing/export/jobs/<job_id>/download")]
pub async fn download_export(
    _user: AuthUser,
    exports: &State<ExportService>,
    job_id: i32,
) -> Result<FileDownload, ApiError> {
    let download = exports.download(job_id).await?;
    FileDownload::open(download).await
}

#[openapi(tag = "Export")]
#[post("/email-marketing/export/jobs/<job_id>/cancel")]
pub async fn cancel_export_job(
    user: AuthUser,
    exports: &State<ExportService>,
    job_id: i32,
) -> ApiResult<ExportJob> {
    let job = exports.cancel_job(job_id).await?;
    log::info!("export job {}: cancelled by user {}", job_id, user.id);
    Ok(Json(ApiResponse::with_message(job, "Export job cancelled")))
}

/// Remove expired exports and their files.
#[openapi(tag = "Export")]
#[post("/email-marketing/export/cleanup")]
pub async fn cleanup_exports(
    _admin: RequireAdmin,
    exports: &State<ExportService>,
) -> ApiResult<CleanupResponse> {
    let deleted_jobs = exports.cleanup_expired().await?;
    Ok(Json(ApiResponse::with_message(
        CleanupResponse { deleted_jobs },
        format!("Removed {} expired exports", deleted_jobs),
    )))
}
