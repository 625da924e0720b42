//! HTTP route handlers grouped by resource domain.
//!
//! Each submodule corresponds to one area of the API (subscribers, jobs,
//! A/B tests, GDPR, analytics, ...) and exposes typed Rocket handlers
//! annotated with `#[openapi]` so `rocket_okapi` can derive an OpenAPI
//! document automatically. Multipart uploads, file downloads and the
//! tracking pixel/redirect are mounted but left out of the document.

use rocket::Route;
use rocket::serde::json::Json;
use rocket_okapi::openapi_get_routes;

use crate::error::ApiError;
use crate::models::ApiResponse;

pub mod analytics;
pub mod campaigns;
pub mod emails;
pub mod exports;
pub mod files;
pub mod gdpr;
pub mod groups;
pub mod health;
pub(crate) mod helpers;
pub mod imports;
pub mod params;
pub mod preferences;
pub mod segments;
pub mod subscribers;
pub mod ticket_templates;
pub mod users;

/// Result type of every JSON handler: the success envelope or an [`ApiError`].
pub type ApiResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Every API route, mounted under `/api/v1`, plus the OpenAPI document.
pub fn api_routes() -> Vec<Route> {
    openapi_get_routes![
        // Health
        health::health_check,
        // Auth
        crate::auth::routes::login,
        crate::auth::routes::logout_all,
        crate::auth::routes::me,
        // Users
        users::list_users,
        users::get_user,
        users::create_user,
        users::update_user,
        users::delete_user,
        preferences::get_ai_preferences,
        preferences::put_ai_preferences,
        // Subscribers, groups and segments
        subscribers::list_subscribers,
        subscribers::get_subscriber,
        subscribers::create_subscriber,
        subscribers::update_subscriber,
        subscribers::delete_subscriber,
        groups::list_groups,
        groups::get_group,
        groups::create_group,
        groups::update_group,
        groups::delete_group,
        segments::list_segments,
        segments::get_segment,
        segments::create_segment,
        segments::update_segment,
        segments::delete_segment,
        // Campaigns
        campaigns::list_campaigns,
        campaigns::get_campaign,
        campaigns::create_campaign,
        campaigns::update_campaign,
        campaigns::delete_campaign,
        // Import jobs
        imports::create_import,
        imports::validate_import,
        imports::import_fields,
        imports::list_import_jobs,
        imports::get_import_job,
        imports::list_import_results,
        imports::cancel_import_job,
        imports::import_statistics,
        imports::cleanup_imports,
        // Export jobs
        exports::create_export,
        exports::preview_export,
        exports::export_fields,
        exports::list_export_jobs,
        exports::get_export_job,
        exports::download_export,
        exports::cancel_export_job,
        exports::cleanup_exports,
        // A/B tests
        ab_tests::create_ab_test,
        ab_tests::get_ab_test,
        ab_tests::update_variant,
        ab_tests::send_ab_test,
        ab_tests::record_variant_event,
        ab_tests::ab_test_results,
        ab_tests::select_winner,
        ab_tests::delete_ab_test,
        // GDPR
        gdpr::track_consent,
        gdpr::withdraw_consent,
        gdpr::check_consent,
        gdpr::access_request,
        gdpr::erasure_request,
        gdpr::portability_request,
        gdpr::list_requests,
        gdpr::compliance_report,
        gdpr::retention_cleanup,
        // Analytics
        analytics::create_tracking,
        analytics::get_tracking,
        analytics::track_open,
        analytics::track_click,
        analytics::track_conversion,
        analytics::campaign_stats,
        analytics::dashboard,
        analytics::record_heatmap_events,
        analytics::heatmap,
        // Support desk and email previews
        ticket_templates::list_ticket_templates,
        ticket_templates::get_ticket_template,
        ticket_templates::create_ticket_template,
        ticket_templates::update_ticket_template,
        ticket_templates::delete_ticket_template,
        emails::preview_email,
    ]
}
