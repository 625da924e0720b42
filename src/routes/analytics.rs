//! Tracking pixel and click redirect, campaign statistics, the dashboard and
//! page heatmaps. The pixel, the redirect and heatmap ingestion are public.

use rocket::State;
use rocket::response::Redirect;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::ApiResult;
use super::files::Pixel;
use super::params::HeatmapParams;
use crate::analytics::tracking::{TRACKING_PIXEL, is_redirect_target};
use crate::analytics::{
    AnalyticsError, CampaignStats, CreateTracking, Dashboard, HeatmapEventInput, HeatmapGrid,
    HeatmapService, TrackingRecord, TrackingService, load_dashboard,
};
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::ApiResponse;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RecordedEvents {
    pub recorded: u64,
}

#[openapi(tag = "Analytics")]
#[post("/analytics/tracking", data = "<request>")]
pub async fn create_tracking(
    _user: AuthUser,
    tracking: &State<TrackingService>,
    request: Json<CreateTracking>,
) -> ApiResult<TrackingRecord> {
    Ok(Json(ApiResponse::ok(
        tracking.create(request.into_inner()).await?,
    )))
}

#[openapi(tag = "Analytics")]
#[get("/analytics/tracking/<tracking_id>")]
pub async fn get_tracking(
    _user: AuthUser,
    tracking: &State<TrackingService>,
    tracking_id: Uuid,
) -> ApiResult<TrackingRecord> {
    Ok(Json(ApiResponse::ok(tracking.get(tracking_id).await?)))
}

/// Open pixel. Always answers with the GIF so mail clients never show a
/// broken image.
#[openapi(skip)]
#[get("/analytics/tracking/<tracking_id>/open")]
pub async fn track_open(tracking: &State<TrackingService>, tracking_id: Uuid) -> Pixel {
    match tracking.record_open(tracking_id).await {
        Ok(true) => {}
        Ok(false) => log::debug!("open for unknown tracking id {}", tracking_id),
        Err(e) => log::error!("failed to record open for {}: {}", tracking_id, e),
    }
    Pixel(TRACKING_PIXEL)
}

/// Record a click and redirect (303) to `url`.
#[openapi(skip)]
#[get("/analytics/tracking/<tracking_id>/click?<url>")]
pub async fn track_click(
    tracking: &State<TrackingService>,
    tracking_id: Uuid,
    url: &str,
) -> Result<Redirect, ApiError> {
    if !is_redirect_target(url) {
        return Err(ApiError::BadRequest(
            "url must be an absolute http(s) URL".into(),
        ));
    }

    match tracking.record_click(tracking_id).await {
        Ok(()) => {}
        Err(AnalyticsError::NotFound(_)) => {
            log::debug!("click for unknown tracking id {}", tracking_id)
        }
        Err(e) => log::error!("failed to record click for {}: {}", tracking_id, e),
    }
    Ok(Redirect::to(url.trim().to_string()))
}

#[openapi(tag = "Analytics")]
#[post("/analytics/tracking/<tracking_id>/conversion")]
pub async fn track_conversion(
    _user: AuthUser,
    tracking: &State<TrackingService>,
    tracking_id: Uuid,
) -> ApiResult<TrackingRecord> {
    Ok(Json(ApiResponse::ok(
        tracking.record_conversion(tracking_id).await?,
    )))
}

#[openapi(tag = "Analytics")]
#[get("/analytics/campaigns/<campaign_id>/stats")]
pub async fn campaign_stats(
    _user: AuthUser,
    tracking: &State<TrackingService>,
    campaign_id: i32,
) -> ApiResult<CampaignStats> {
    Ok(Json(ApiResponse::ok(
        tracking.campaign_stats(campaign_id).await?,
    )))
}

#[openapi(tag = "Analytics")]
#[get("/analytics/dashboard")]
pub async fn dashboard(_user: AuthUser, pool: &State<sqlx::PgPool>) -> ApiResult<Dashboard> {
    Ok(Json(ApiResponse::ok(load_dashboard(pool.inner()).await?)))
}

/// Ingest a batch of click/move/scroll events.
#[openapi(tag = "Analytics")]
#[post("/analytics/heatmap/events", data = "<events>")]
pub async fn record_heatmap_events(
    heatmaps: &State<HeatmapService>,
    events: Json<Vec<HeatmapEventInput>>,
) -> ApiResult<RecordedEvents> {
    let recorded = heatmaps.record(events.into_inner()).await?;
    Ok(Json(ApiResponse::ok(RecordedEvents { recorded })))
}

#[openapi(tag = "Analytics")]
#[get("/analytics/heatmap?<params..>")]
pub async fn heatmap(
    _user: AuthUser,
    heatmaps: &State<HeatmapService>,
    params: HeatmapParams,
) -> ApiResult<HeatmapGrid> {
    let grid = heatmaps
        .grid(&params.page_url, params.event_type, params.grid_size)
        .await?;
    Ok(Json(ApiResponse::ok(grid)))
}
