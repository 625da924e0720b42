use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use super::helpers::require_name;
use super::params::CampaignListParams;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, CAMPAIGN_COLUMNS, Campaign, CampaignStatus, Page};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateCampaign {
    pub name: String,
    pub subject: String,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateCampaign {
    pub name: Option<String>,
    pub subject: Option<String>,
    pub content: Option<String>,
    /// `draft` or `scheduled`; campaigns become `sent` only by sending.
    pub status: Option<CampaignStatus>,
}

async fn fetch_campaign(pool: &sqlx::PgPool, campaign_id: i32) -> Result<Campaign, ApiError> {
    let sql = format!("SELECT {} FROM campaigns WHERE id = $1", CAMPAIGN_COLUMNS);
    sqlx::query_as(&sql)
        .bind(campaign_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Campaign {} not found", campaign_id)))
}

/// Content is frozen once a campaign has gone out or an A/B test is running.
fn ensure_editable(campaign: &Campaign) -> Result<(), ApiError> {
    if campaign.status == CampaignStatus::Sent.as_str() {
        return Err(ApiError::Conflict(format!(
            "Campaign {} has already been sent",
            campaign.id
        )));
    }
    if campaign.test_status.as_deref() == Some("testing") {
        return Err(ApiError::Conflict(format!(
            "Campaign {} has an A/B test in progress",
            campaign.id
        )));
    }
    Ok(())
}

#[openapi(tag = "Campaigns")]
#[get("/campaigns?<params..>")]
pub async fn list_campaigns(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    params: CampaignListParams,
) -> ApiResult<Page<Campaign>> {
    let pagination = params.pagination();
    let status = params.status.map(CampaignStatus::as_str);

    let sql = format!(
        r#"SELECT {} FROM campaigns
           WHERE ($1::text IS NULL OR status = $1)
           ORDER BY created_at DESC, id DESC
           LIMIT $2 OFFSET $3"#,
        CAMPAIGN_COLUMNS
    );
    let items_query = sqlx::query_as::<_, Campaign>(&sql)
        .bind(status)
        .bind(pagination.size())
        .bind(pagination.offset())
        .fetch_all(pool.inner());
    let count_query = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) FROM campaigns WHERE ($1::text IS NULL OR status = $1)",
    )
    .bind(status)
    .fetch_one(pool.inner());

    let (items, total) = tokio::try_join!(items_query, count_query)?;
    Ok(Json(ApiResponse::ok(Page::new(
        items,
        pagination.page(),
        pagination.size(),
        total,
    ))))
}

#[openapi(tag = "Campaigns")]
#[get("/campaigns/<campaign_id>")]
pub async fn get_campaign(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    campaign_id: i32,
) -> ApiResult<Campaign> {
    Ok(Json(ApiResponse::ok(
        fetch_campaign(pool.inner(), campaign_id).await?,
    )))
}

#[openapi(tag = "Campaigns")]
#[post("/campaigns", data = "<request>")]
pub async fn create_campaign(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    request: Json<CreateCampaign>,
) -> ApiResult<Campaign> {
    let request = request.into_inner();
    let name = require_name(&request.name, "Campaign name")?;
    let subject = require_name(&request.subject, "Subject")?;

    let sql = format!(
        "INSERT INTO campaigns (name, subject, content) VALUES ($1, $2, $3) RETURNING {}",
        CAMPAIGN_COLUMNS
    );
    let campaign: Campaign = sqlx::query_as(&sql)
        .bind(name)
        .bind(subject)
        .bind(request.content)
        .fetch_one(pool.inner())
        .await?;

    log::info!("campaign {} created", campaign.id);
    Ok(Json(ApiResponse::with_message(campaign, "Campaign created")))
}

#[openapi(tag = "Campaigns")]
#[put("/campaigns/<campaign_id>", data = "<request>")]
pub async fn update_campaign(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    campaign_id: i32,
    request: Json<UpdateCampaign>,
) -> ApiResult<Campaign> {
    let request = request.into_inner();
    if request.status == Some(CampaignStatus::Sent) {
        return Err(ApiError::BadRequest(
            "Campaign status cannot be set to sent directly".into(),
        ));
    }
    let name = request
        .name
        .as_deref()
        .map(|name| require_name(name, "Campaign name"))
        .transpose()?;
    let subject = request
        .subject
        .as_deref()
        .map(|subject| require_name(subject, "Subject"))
        .transpose()?;

    let mut tx = pool.begin().await?;
    let sql = format!(
        "SELECT {} FROM campaigns WHERE id = $1 FOR UPDATE",
        CAMPAIGN_COLUMNS
    );
    let current: Campaign = sqlx::query_as(&sql)
        .bind(campaign_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Campaign {} not found", campaign_id)))?;
    ensure_editable(&current)?;

    let sql = format!(
        r#"UPDATE campaigns
           SET name = COALESCE($2, name),
               subject = COALESCE($3, subject),
               content = COALESCE($4, content),
               status = COALESCE($5, status)
           WHERE id = $1
           RETURNING {}"#,
        CAMPAIGN_COLUMNS
    );
    let campaign: Campaign = sqlx::query_as(&sql)
        .bind(campaign_id)
        .bind(name)
        .bind(subject)
        .bind(request.content)
        .bind(request.status.map(CampaignStatus::as_str))
        .fetch_one(&mut *tx)
        .await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::with_message(campaign, "Campaign updated")))
}

/// Delete a campaign with its variants and tracking rows.
#[openapi(tag = "Campaigns")]
#[delete("/campaigns/<campaign_id>")]
pub async fn delete_campaign(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    campaign_id: i32,
) -> ApiResult<()> {
    let campaign = fetch_campaign(pool.inner(), campaign_id).await?;
    if campaign.test_status.as_deref() == Some("testing") {
        return Err(ApiError::Conflict(format!(
            "Campaign {} has an A/B test in progress",
            campaign_id
        )));
    }

    sqlx::query("DELETE FROM campaigns WHERE id = $1")
        .bind(campaign_id)
        .execute(pool.inner())
        .await?;

    log::info!("campaign {} deleted", campaign_id);
    Ok(Json(ApiResponse::with_message((), "Campaign deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn campaign(status: &str, test_status: Option<&str>) -> Campaign {
        Campaign {
            id: 7,
            name: "Spring".into(),
            subject: "Hello".into(),
            content: String::new(),
            status: status.into(),
            is_ab_test: test_status.is_some(),
            test_status: test_status.map(str::to_string),
            winner_criteria: None,
            auto_select_winner: false,
            test_duration_hours: 24,
            confidence_level: 95,
            min_sample_size: 100,
            selected_winner_id: None,
            winner_selected_at: None,
            sent_at: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn drafts_are_editable() {
        assert!(ensure_editable(&campaign("draft", None)).is_ok());
        assert!(ensure_editable(&campaign("scheduled", Some("draft"))).is_ok());
    }

    #[test]
    fn sent_or_testing_campaigns_are_frozen() {
        assert!(matches!(
            ensure_editable(&campaign("sent", None)),
            Err(ApiError::Conflict(_))
        ));
        assert!(matches!(
            ensure_editable(&campaign("draft", Some("testing"))),
            Err(ApiError::Conflict(_))
        ));
    }
}
