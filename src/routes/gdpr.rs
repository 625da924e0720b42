//! GDPR endpoints: consent tracking, data subject requests and reporting.

use rocket::State;
use rocket::serde::json::Json;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use super::params::{ConsentCheckParams, GdprRequestParams};
use crate::auth::{AuthUser, RequireAdmin};
use crate::gdpr::{
    ComplianceReport, ConsentCheck, ConsentRecord, DataSubjectRequest, GdprService,
    RetentionCleanup, TrackConsent, WithdrawConsent,
};
use crate::models::{ApiResponse, Page};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct EmailRequest {
    pub email: String,
}

fn default_retain_statistics() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ErasureRequest {
    pub email: String,
    /// Keep engagement counters on an anonymised row instead of deleting it.
    #[serde(default = "default_retain_statistics")]
    pub retain_statistics: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawResponse {
    pub withdrawn: u64,
}

#[openapi(tag = "GDPR")]
#[post("/gdpr/consent", data = "<request>")]
pub async fn track_consent(
    _user: AuthUser,
    gdpr: &State<GdprService>,
    request: Json<TrackConsent>,
) -> ApiResult<ConsentRecord> {
    let record = gdpr.track_consent(request.into_inner()).await?;
    Ok(Json(ApiResponse::with_message(record, "Consent recorded")))
}

/// Withdraw consent; withdrawing email marketing unsubscribes the address.
#[openapi(tag = "GDPR")]
#[post("/gdpr/consent/withdraw", data = "<request>")]
pub async fn withdraw_consent(
    _user: AuthUser,
    gdpr: &State<GdprService>,
    request: Json<WithdrawConsent>,
) -> ApiResult<WithdrawResponse> {
    let withdrawn = gdpr.withdraw_consent(request.into_inner()).await?;
    Ok(Json(ApiResponse::with_message(
        WithdrawResponse { withdrawn },
        "Consent withdrawn",
    )))
}

#[openapi(tag = "GDPR")]
#[get("/gdpr/consent?<params..>")]
pub async fn check_consent(
    _user: AuthUser,
    gdpr: &State<GdprService>,
    params: ConsentCheckParams,
) -> ApiResult<ConsentCheck> {
    let check = gdpr
        .check_consent(&params.email, params.consent_type, params.purpose)
        .await?;
    Ok(Json(ApiResponse::ok(check)))
}

#[openapi(tag = "GDPR")]
#[post("/gdpr/requests/access", data = "<request>")]
pub async fn access_request(
    _user: AuthUser,
    gdpr: &State<GdprService>,
    request: Json<EmailRequest>,
) -> ApiResult<DataSubjectRequest> {
    Ok(Json(ApiResponse::ok(
        gdpr.access_request(&request.email).await?,
    )))
}

#[openapi(tag = "GDPR")]
#[post("/gdpr/requests/erasure", data = "<request>")]
pub async fn erasure_request(
    user: AuthUser,
    gdpr: &State<GdprService>,
    request: Json<ErasureRequest>,
) -> ApiResult<DataSubjectRequest> {
    let result = gdpr
        .erasure_request(&request.email, request.retain_statistics)
        .await?;
    log::info!(
        "gdpr: erasure request {} issued by user {}",
        result.id,
        user.id
    );
    Ok(Json(ApiResponse::with_message(result, "Erasure processed")))
}

#[openapi(tag = "GDPR")]
#[post("/gdpr/requests/portability", data = "<request>")]
pub async fn portability_request(
    _user: AuthUser,
    gdpr: &State<GdprService>,
    request: Json<EmailRequest>,
) -> ApiResult<DataSubjectRequest> {
    Ok(Json(ApiResponse::ok(
        gdpr.portability_request(&request.email).await?,
    )))
}

#[openapi(tag = "GDPR")]
#[get("/gdpr/requests?<params..>")]
pub async fn list_requests(
    _user: AuthUser,
    gdpr: &State<GdprService>,
    params: GdprRequestParams,
) -> ApiResult<Page<DataSubjectRequest>> {
    let pagination = params.pagination();
    let page = gdpr
        .list_requests(
            params.request_type,
            params.status,
            pagination.page(),
            pagination.size(),
        )
        .await?;
    Ok(Json(ApiResponse::ok(page)))
}

#[openapi(tag = "GDPR")]
#[get("/gdpr/report")]
pub async fn compliance_report(
    _user: AuthUser,
    gdpr: &State<GdprService>,
) -> ApiResult<ComplianceReport> {
    Ok(Json(ApiResponse::ok(gdpr.compliance_report().await?)))
}

/// Expire consents past retention and delete subscribers left without any.
#[openapi(tag = "GDPR")]
#[post("/gdpr/retention/cleanup")]
pub async fn retention_cleanup(
    _admin: RequireAdmin,
    gdpr: &State<GdprService>,
) -> ApiResult<RetentionCleanup> {
    Ok(Json(ApiResponse::ok(gdpr.retention_cleanup().await?)))
}
