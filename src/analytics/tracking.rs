//! Per-recipient email tracking: open pixel, click redirect, conversions.
//!
//! Unique opens, clicks and conversions feed the variant metrics used by
//! A/B tests. Subscriber counters take the first open and every click.

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AnalyticsError, AnalyticsResult, rate};
use crate::import::validation::normalize_email;

/// Transparent 1x1 GIF served by the open pixel.
pub const TRACKING_PIXEL: &[u8] = &[
    0x47, 0x49, 0x46, 0x38, 0x39, 0x61, 0x01, 0x00, 0x01, 0x00, 0x80, 0x00, 0x00, 0x00, 0x00,
    0x00, 0xff, 0xff, 0xff, 0x21, 0xf9, 0x04, 0x01, 0x00, 0x00, 0x00, 0x00, 0x2c, 0x00, 0x00,
    0x00, 0x00, 0x01, 0x00, 0x01, 0x00, 0x00, 0x02, 0x02, 0x44, 0x01, 0x00, 0x3b,
];

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackingRecord {
    pub tracking_id: Uuid,
    pub campaign_id: i32,
    pub variant_id: Option<i32>,
    pub subscriber_id: Option<i32>,
    pub email: String,
    pub open_count: i32,
    pub click_count: i32,
    pub first_opened_at: Option<DateTime<Utc>>,
    pub last_clicked_at: Option<DateTime<Utc>>,
    pub converted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

const TRACKING_COLUMNS: &str = "tracking_id, campaign_id, variant_id, subscriber_id, email, \
     open_count, click_count, first_opened_at, last_clicked_at, converted_at, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTracking {
    pub campaign_id: i32,
    pub email: String,
    pub variant_id: Option<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CampaignStats {
    pub campaign_id: i32,
    pub sent: i64,
    pub unique_opens: i64,
    pub total_opens: i64,
    pub unique_clicks: i64,
    pub total_clicks: i64,
    pub conversions: i64,
    pub open_rate: f64,
    pub click_rate: f64,
    pub conversion_rate: f64,
}

/// Row touched by an event, with whether it was the recipient's first of its kind.
#[derive(Debug, FromRow)]
struct EventOutcome {
    subscriber_id: Option<i32>,
    variant_id: Option<i32>,
    first: bool,
}

/// Only absolute http(s) targets are followed by the click redirect.
pub fn is_redirect_target(url: &str) -> bool {
    let lower = url.trim().to_ascii_lowercase();
    (lower.starts_with("http://") || lower.starts_with("https://"))
        && lower.len() > "https://".len()
        && !lower.contains(char::is_whitespace)
}

#[derive(Clone)]
pub struct TrackingService {
    pool: PgPool,
}

impl TrackingService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn create(&self, request: CreateTracking) -> AnalyticsResult<TrackingRecord> {
        let email = normalize_email(&request.email)
            .ok_or_else(|| AnalyticsError::Invalid("email is required".to_string()))?;

        let campaign_exists: bool =
            sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM campaigns WHERE id = $1)")
                .bind(request.campaign_id)
                .fetch_one(&self.pool)
                .await?;
        if !campaign_exists {
            return Err(AnalyticsError::NotFound(format!(
                "Campaign {} not found",
                request.campaign_id
            )));
        }

        let sql = format!(
            r#"INSERT INTO email_tracking (tracking_id, campaign_id, variant_id, subscriber_id, email)
               VALUES ($1, $2, $3, (SELECT id FROM subscribers WHERE lower(email) = $4), $4)
               RETURNING {}"#,
            TRACKING_COLUMNS
        );
        let record = sqlx::query_as(&sql)
            .bind(Uuid::new_v4())
            .bind(request.campaign_id)
            .bind(request.variant_id)
            .bind(&email)
            .fetch_one(&self.pool)
            .await?;
        Ok(record)
    }

    pub async fn get(&self, tracking_id: Uuid) -> AnalyticsResult<TrackingRecord> {
        let sql = format!(
            "SELECT {} FROM email_tracking WHERE tracking_id = $1",
            TRACKING_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(tracking_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| AnalyticsError::NotFound(format!("Tracking id {} not found", tracking_id)))
    }

    /// Record an open. Returns false for unknown tracking ids.
    pub async fn record_open(&self, tracking_id: Uuid) -> AnalyticsResult<bool> {
        let mut tx = self.pool.begin().await?;
        let outcome: Option<EventOutcome> = sqlx::query_as(
            r#"UPDATE email_tracking
               SET open_count = open_count + 1, first_opened_at = COALESCE(first_opened_at, NOW())
               WHERE tracking_id = $1
               RETURNING subscriber_id, variant_id, open_count = 1 AS first"#,
        )
        .bind(tracking_id)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(outcome) = outcome else {
            return Ok(false);
        };
        if outcome.first {
            bump_subscriber(&mut tx, outcome.subscriber_id, "opens").await?;
            bump_variant(&mut tx, outcome.variant_id, "opened_count").await?;
        }
        tx.commit().await?;
        Ok(true)
    }

    /// Record a click. Unknown tracking ids are a 404.
    pub async fn record_click(&self, tracking_id: Uuid) -> AnalyticsResult<()> {
        let mut tx = self.pool.begin().await?;
        let outcome: EventOutcome = sqlx::query_as(
            r#"UPDATE email_tracking
               SET click_count = click_count + 1, last_clicked_at = NOW()
               WHERE tracking_id = $1
               RETURNING subscriber_id, variant_id, click_count = 1 AS first"#,
        )
        .bind(tracking_id)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| AnalyticsError::NotFound(format!("Tracking id {} not found", tracking_id)))?;

        bump_subscriber(&mut tx, outcome.subscriber_id, "clicks").await?;
        if outcome.first {
            bump_variant(&mut tx, outcome.variant_id, "clicked_count").await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Record a conversion; repeats for the same recipient are ignored.
    pub async fn record_conversion(&self, tracking_id: Uuid) -> AnalyticsResult<TrackingRecord> {
        let mut tx = self.pool.begin().await?;
        let outcome: Option<EventOutcome> = sqlx::query_as(
            r#"UPDATE email_tracking SET converted_at = NOW()
               WHERE tracking_id = $1 AND converted_at IS NULL
               RETURNING subscriber_id, variant_id, TRUE AS first"#,
        )
        .bind(tracking_id)
        .fetch_optional(&mut *tx)
        .await?;

        if let Some(outcome) = outcome {
            bump_variant(&mut tx, outcome.variant_id, "conversion_count").await?;
        }
        tx.commit().await?;
        self.get(tracking_id).await
    }

    pub async fn campaign_stats(&self, campaign_id: i32) -> AnalyticsResult<CampaignStats> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM campaigns WHERE id = $1)")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await?;
        if !exists {
            return Err(AnalyticsError::NotFound(format!(
                "Campaign {} not found",
                campaign_id
            )));
        }

        let (sent, unique_opens, total_opens, unique_clicks, total_clicks, conversions): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COUNT(*) FILTER (WHERE open_count > 0),
                      COALESCE(SUM(open_count), 0)::int8,
                      COUNT(*) FILTER (WHERE click_count > 0),
                      COALESCE(SUM(click_count), 0)::int8,
                      COUNT(*) FILTER (WHERE converted_at IS NOT NULL)
               FROM email_tracking WHERE campaign_id = $1"#,
        )
        .bind(campaign_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(CampaignStats {
            campaign_id,
            sent,
            unique_opens,
            total_opens,
            unique_clicks,
            total_clicks,
            conversions,
            open_rate: rate(unique_opens, sent),
            click_rate: rate(unique_clicks, sent),
            conversion_rate: rate(conversions, sent),
        })
    }
}

async fn bump_subscriber(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    subscriber_id: Option<i32>,
    column: &'static str,
) -> Result<(), sqlx::Error> {
    let Some(id) = subscriber_id else {
        return Ok(());
    };
    let sql = format!(
        "UPDATE subscribers SET {col} = {col} + 1, updated_at = NOW() WHERE id = $1",
        col = column
    );
    sqlx::query(&sql).bind(id).execute(&mut **tx).await?;
    Ok(())
}

async fn bump_variant(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    variant_id: Option<i32>,
    column: &'static str,
) -> Result<(), sqlx::Error> {
    let Some(id) = variant_id else {
        return Ok(());
    };
    let sql = format!(
        "UPDATE campaign_variants SET {col} = {col} + 1 WHERE id = $1",
        col = column
    );
    sqlx::query(&sql).bind(id).execute(&mut **tx).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pixel_is_a_gif() {
        assert!(TRACKING_PIXEL.starts_with(b"GIF89a"));
        assert_eq!(TRACKING_PIXEL.last(), Some(&0x3b));
    }

    #[test]
    fn redirect_targets_must_be_absolute_http() {
        assert!(is_redirect_target("https://example.com/offer?x=1"));
        assert!(is_redirect_target("HTTP://example.com"));
        assert!(!is_redirect_target("javascript:alert(1)"));
        assert!(!is_redirect_target("//evil.example"));
        assert!(!is_redirect_target("https://"));
        assert!(!is_redirect_target("https://exa mple.com"));
    }
}
