use chrono::{DateTime, Duration, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool, Postgres, Transaction};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use uuid::Uuid;

use super::distribution::distribute;
use super::statistics::{self, ConfidenceInterval, VariantMetrics, WinnerCriteria};
use crate::models::{CAMPAIGN_COLUMNS, Campaign};

pub const MIN_VARIANTS: usize = 2;
pub const MAX_VARIANTS: usize = 5;
const SPLIT_TOLERANCE: f64 = 0.01;
const VARIANT_LABELS: [&str; MAX_VARIANTS] = ["A", "B", "C", "D", "E"];
const CONFIDENCE_LEVELS: [i32; 3] = [90, 95, 99];

#[derive(Debug, Error)]
pub enum AbTestError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Invalid(String),
    #[error("{0}")]
    NotFound(String),
    #[error("{0}")]
    Conflict(String),
}

pub type AbTestResult<T> = Result<T, AbTestError>;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CampaignVariant {
    pub id: i32,
    pub campaign_id: i32,
    pub label: String,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub from_name: Option<String>,
    pub split_percentage: f64,
    pub status: String,
    pub sent_count: i32,
    pub opened_count: i32,
    pub clicked_count: i32,
    pub conversion_count: i32,
    pub created_at: DateTime<Utc>,
}

const VARIANT_COLUMNS: &str = "id, campaign_id, label, subject, content, from_name, split_percentage, \
     status, sent_count, opened_count, clicked_count, conversion_count, created_at";

impl CampaignVariant {
    pub fn metrics(&self) -> VariantMetrics {
        VariantMetrics {
            sent: self.sent_count as i64,
            opened: self.opened_count as i64,
            clicked: self.clicked_count as i64,
            converted: self.conversion_count as i64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariantInput {
    pub label: String,
    pub subject: Option<String>,
    pub content: Option<String>,
    pub from_name: Option<String>,
    pub split_percentage: f64,
}

fn default_duration() -> i32 {
    24
}

fn default_confidence() -> i32 {
    95
}

fn default_min_sample() -> i32 {
    100
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateAbTest {
    pub campaign_id: i32,
    #[serde(default)]
    pub winner_criteria: WinnerCriteria,
    #[serde(default)]
    pub auto_select_winner: bool,
    #[serde(default = "default_duration")]
    pub test_duration_hours: i32,
    #[serde(default = "default_confidence")]
    pub confidence_level: i32,
    #[serde(default = "default_min_sample")]
    pub min_sample_size: i32,
    pub variants: Vec<VariantInput>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateVariant {
    pub subject: Option<String>,
    pub content: Option<String>,
    pub from_name: Option<String>,
    pub split_percentage: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum VariantEventKind {
    Open,
    Click,
    Conversion,
}

impl VariantEventKind {
    fn column(self) -> &'static str {
        match self {
            VariantEventKind::Open => "opened_count",
            VariantEventKind::Click => "clicked_count",
            VariantEventKind::Conversion => "conversion_count",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct AbTestSummary {
    pub campaign: Campaign,
    pub variants: Vec<CampaignVariant>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariantAssignment {
    pub variant_id: i32,
    pub label: String,
    pub recipients: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SendSummary {
    pub campaign_id: i32,
    pub total_recipients: usize,
    pub variants: Vec<VariantAssignment>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct VariantResult {
    pub variant_id: i32,
    pub label: String,
    pub status: String,
    pub sent: i32,
    pub opened: i32,
    pub clicked: i32,
    pub converted: i32,
    pub open_rate: f64,
    pub click_rate: f64,
    pub conversion_rate: f64,
    /// Interval for the rate named by the test's winner criterion.
    pub confidence_interval: ConfidenceInterval,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AbTestResults {
    pub campaign_id: i32,
    pub test_status: Option<String>,
    pub winner_criteria: WinnerCriteria,
    pub confidence_level: i32,
    pub variants: Vec<VariantResult>,
    pub chi_square: Option<f64>,
    pub degrees_of_freedom: usize,
    pub p_value: Option<f64>,
    pub is_significant: bool,
    pub min_sample_reached: bool,
    pub duration_elapsed: bool,
    pub leader_variant_id: Option<i32>,
    pub selected_winner_id: Option<i32>,
}

/// Check variant count, labels and that splits add up to 100.
pub fn validate_variants(variants: &[VariantInput]) -> Result<(), String> {
    if !(MIN_VARIANTS..=MAX_VARIANTS).contains(&variants.len()) {
        return Err(format!(
            "An A/B test needs between {} and {} variants",
            MIN_VARIANTS, MAX_VARIANTS
        ));
    }

    let mut labels = HashSet::new();
    for variant in variants {
        if !VARIANT_LABELS.contains(&variant.label.as_str()) {
            return Err(format!("Invalid variant label '{}'", variant.label));
        }
        if !labels.insert(variant.label.as_str()) {
            return Err(format!("Duplicate variant label '{}'", variant.label));
        }
        if !(variant.split_percentage > 0.0 && variant.split_percentage <= 100.0) {
            return Err(format!(
                "Variant {} split must be between 0 and 100",
                variant.label
            ));
        }
    }

    let sum: f64 = variants.iter().map(|v| v.split_percentage).sum();
    check_split_sum(sum)
}

fn check_split_sum(sum: f64) -> Result<(), String> {
    if (sum - 100.0).abs() > SPLIT_TOLERANCE {
        return Err(format!("Split percentages must sum to 100 (got {})", sum));
    }
    Ok(())
}

fn validate_settings(request: &CreateAbTest) -> Result<(), String> {
    if !CONFIDENCE_LEVELS.contains(&request.confidence_level) {
        return Err("confidenceLevel must be 90, 95 or 99".to_string());
    }
    if request.test_duration_hours < 1 {
        return Err("testDurationHours must be at least 1".to_string());
    }
    if request.min_sample_size < 1 {
        return Err("minSampleSize must be at least 1".to_string());
    }
    validate_variants(&request.variants)
}

fn criteria_of(campaign: &Campaign) -> WinnerCriteria {
    campaign
        .winner_criteria
        .as_deref()
        .and_then(WinnerCriteria::parse)
        .unwrap_or_default()
}

fn round4(value: f64) -> f64 {
    (value * 10_000.0).round() / 10_000.0
}

#[derive(Clone)]
pub struct AbTestService {
    pool: PgPool,
}

impl AbTestService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn lock_campaign(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: i32,
    ) -> AbTestResult<Campaign> {
        let sql = format!(
            "SELECT {} FROM campaigns WHERE id = $1 FOR UPDATE",
            CAMPAIGN_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(campaign_id)
            .fetch_optional(&mut **tx)
            .await?
            .ok_or_else(|| AbTestError::NotFound(format!("Campaign {} not found", campaign_id)))
    }

    async fn lock_test(
        tx: &mut Transaction<'_, Postgres>,
        campaign_id: i32,
    ) -> AbTestResult<Campaign> {
        let campaign = Self::lock_campaign(tx, campaign_id).await?;
        if !campaign.is_ab_test {
            return Err(AbTestError::NotFound(format!(
                "Campaign {} has no A/B test",
                campaign_id
            )));
        }
        Ok(campaign)
    }

    async fn load_variants<'e, E>(executor: E, campaign_id: i32) -> AbTestResult<Vec<CampaignVariant>>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            "SELECT {} FROM campaign_variants WHERE campaign_id = $1 ORDER BY label ASC",
            VARIANT_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(campaign_id)
            .fetch_all(executor)
            .await?)
    }

    pub async fn create(&self, request: CreateAbTest) -> AbTestResult<AbTestSummary> {
        validate_settings(&request).map_err(AbTestError::Invalid)?;

        let mut tx = self.pool.begin().await?;
        let campaign = Self::lock_campaign(&mut tx, request.campaign_id).await?;
        if campaign.is_ab_test {
            return Err(AbTestError::Conflict(format!(
                "Campaign {} already has an A/B test",
                campaign.id
            )));
        }
        if campaign.sent_at.is_some() {
            return Err(AbTestError::Conflict(format!(
                "Campaign {} was already sent",
                campaign.id
            )));
        }

        let sql = format!(
            r#"UPDATE campaigns
               SET is_ab_test = TRUE, test_status = 'draft', winner_criteria = $2,
                   auto_select_winner = $3, test_duration_hours = $4, confidence_level = $5,
                   min_sample_size = $6
               WHERE id = $1
               RETURNING {}"#,
            CAMPAIGN_COLUMNS
        );
        let campaign: Campaign = sqlx::query_as(&sql)
            .bind(campaign.id)
            .bind(request.winner_criteria.as_str())
            .bind(request.auto_select_winner)
            .bind(request.test_duration_hours)
            .bind(request.confidence_level)
            .bind(request.min_sample_size)
            .fetch_one(&mut *tx)
            .await?;

        let mut inputs = request.variants;
        inputs.sort_by(|a, b| a.label.cmp(&b.label));
        for variant in &inputs {
            sqlx::query(
                r#"INSERT INTO campaign_variants (campaign_id, label, subject, content, from_name, split_percentage)
                   VALUES ($1, $2, $3, $4, $5, $6)"#,
            )
            .bind(campaign.id)
            .bind(&variant.label)
            .bind(&variant.subject)
            .bind(&variant.content)
            .bind(&variant.from_name)
            .bind(variant.split_percentage)
            .execute(&mut *tx)
            .await?;
        }

        let variants = Self::load_variants(&mut *tx, campaign.id).await?;
        tx.commit().await?;

        log::info!(
            "ab test: created for campaign {} with {} variants",
            campaign.id,
            variants.len()
        );
        Ok(AbTestSummary { campaign, variants })
    }

    pub async fn get(&self, campaign_id: i32) -> AbTestResult<AbTestSummary> {
        let sql = format!("SELECT {} FROM campaigns WHERE id = $1", CAMPAIGN_COLUMNS);
        let campaign: Campaign = sqlx::query_as(&sql)
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await?
            .filter(|c: &Campaign| c.is_ab_test)
            .ok_or_else(|| {
                AbTestError::NotFound(format!("Campaign {} has no A/B test", campaign_id))
            })?;
        let variants = Self::load_variants(&self.pool, campaign_id).await?;
        Ok(AbTestSummary { campaign, variants })
    }

    /// Edit a variant while the test is still a draft.
    pub async fn update_variant(
        &self,
        campaign_id: i32,
        variant_id: i32,
        update: UpdateVariant,
    ) -> AbTestResult<CampaignVariant> {
        let mut tx = self.pool.begin().await?;
        let campaign = Self::lock_test(&mut tx, campaign_id).await?;
        if campaign.test_status.as_deref() != Some("draft") {
            return Err(AbTestError::Conflict(
                "Variants can only be edited before the test is sent".to_string(),
            ));
        }

        let variants = Self::load_variants(&mut *tx, campaign_id).await?;
        if !variants.iter().any(|v| v.id == variant_id) {
            return Err(AbTestError::NotFound(format!(
                "Variant {} not found in campaign {}",
                variant_id, campaign_id
            )));
        }

        if let Some(split) = update.split_percentage {
            if !(split > 0.0 && split <= 100.0) {
                return Err(AbTestError::Invalid(
                    "Split must be between 0 and 100".to_string(),
                ));
            }
            let sum: f64 = variants
                .iter()
                .map(|v| if v.id == variant_id { split } else { v.split_percentage })
                .sum();
            check_split_sum(sum).map_err(AbTestError::Invalid)?;
        }

        let sql = format!(
            r#"UPDATE campaign_variants
               SET subject = COALESCE($2, subject),
                   content = COALESCE($3, content),
                   from_name = COALESCE($4, from_name),
                   split_percentage = COALESCE($5, split_percentage)
               WHERE id = $1
               RETURNING {}"#,
            VARIANT_COLUMNS
        );
        let variant: CampaignVariant = sqlx::query_as(&sql)
            .bind(variant_id)
            .bind(&update.subject)
            .bind(&update.content)
            .bind(&update.from_name)
            .bind(update.split_percentage)
            .fetch_one(&mut *tx)
            .await?;
        tx.commit().await?;

        Ok(variant)
    }

    /// Assign active subscribers to variants and record the sends.
    pub async fn send(
        &self,
        campaign_id: i32,
        subscriber_ids: Option<Vec<i32>>,
    ) -> AbTestResult<SendSummary> {
        let mut tx = self.pool.begin().await?;
        let campaign = Self::lock_test(&mut tx, campaign_id).await?;
        if campaign.test_status.as_deref() != Some("draft") {
            return Err(AbTestError::Conflict(format!(
                "A/B test for campaign {} was already sent",
                campaign_id
            )));
        }

        let variants = Self::load_variants(&mut *tx, campaign_id).await?;
        let recipients: Vec<(i32, String)> = sqlx::query_as(
            r#"SELECT id, email FROM subscribers
               WHERE status = 'active' AND ($1::int4[] IS NULL OR id = ANY($1))
               ORDER BY id"#,
        )
        .bind(&subscriber_ids)
        .fetch_all(&mut *tx)
        .await?;

        if recipients.is_empty() {
            return Err(AbTestError::Invalid(
                "No active subscribers to send to".to_string(),
            ));
        }
        let total_recipients = recipients.len();

        let splits: Vec<f64> = variants.iter().map(|v| v.split_percentage).collect();
        let buckets = {
            let mut rng = rand::thread_rng();
            distribute(recipients, &splits, &mut rng)
        };

        let mut assignments = Vec::with_capacity(variants.len());
        for (variant, bucket) in variants.iter().zip(buckets) {
            let tracking_ids: Vec<Uuid> = bucket.iter().map(|_| Uuid::new_v4()).collect();
            let ids: Vec<i32> = bucket.iter().map(|(id, _)| *id).collect();
            let emails: Vec<String> = bucket.into_iter().map(|(_, email)| email).collect();

            sqlx::query(
                r#"INSERT INTO email_tracking (tracking_id, campaign_id, variant_id, subscriber_id, email)
                   SELECT t.tracking_id, $2, $3, t.subscriber_id, t.email
                   FROM UNNEST($1::uuid[], $4::int4[], $5::text[]) AS t(tracking_id, subscriber_id, email)"#,
            )
            .bind(&tracking_ids)
            .bind(campaign_id)
            .bind(variant.id)
            .bind(&ids)
            .bind(&emails)
            .execute(&mut *tx)
            .await?;

            sqlx::query(
                "UPDATE campaign_variants SET sent_count = sent_count + $2, status = 'testing' WHERE id = $1",
            )
            .bind(variant.id)
            .bind(ids.len() as i32)
            .execute(&mut *tx)
            .await?;

            sqlx::query("UPDATE subscribers SET sent = sent + 1 WHERE id = ANY($1)")
                .bind(&ids)
                .execute(&mut *tx)
                .await?;

            assignments.push(VariantAssignment {
                variant_id: variant.id,
                label: variant.label.clone(),
                recipients: ids.len(),
            });
        }

        sqlx::query(
            "UPDATE campaigns SET test_status = 'testing', status = 'sent', sent_at = NOW() WHERE id = $1",
        )
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        log::info!(
            "ab test: campaign {} sent to {} recipients across {} variants",
            campaign_id,
            total_recipients,
            assignments.len()
        );
        Ok(SendSummary {
            campaign_id,
            total_recipients,
            variants: assignments,
        })
    }

    pub async fn record_event(
        &self,
        campaign_id: i32,
        variant_id: i32,
        event: VariantEventKind,
        count: i32,
    ) -> AbTestResult<CampaignVariant> {
        if count < 1 {
            return Err(AbTestError::Invalid("count must be positive".to_string()));
        }

        let sql = format!(
            "UPDATE campaign_variants SET {col} = {col} + $3 WHERE id = $1 AND campaign_id = $2 RETURNING {cols}",
            col = event.column(),
            cols = VARIANT_COLUMNS
        );
        sqlx::query_as(&sql)
            .bind(variant_id)
            .bind(campaign_id)
            .bind(count)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| {
                AbTestError::NotFound(format!(
                    "Variant {} not found in campaign {}",
                    variant_id, campaign_id
                ))
            })
    }

    pub async fn results(&self, campaign_id: i32) -> AbTestResult<AbTestResults> {
        let summary = self.get(campaign_id).await?;
        Ok(compute_results(&summary.campaign, &summary.variants, Utc::now()))
    }

    /// Pick the winner, manually or by the test's criterion.
    pub async fn select_winner(
        &self,
        campaign_id: i32,
        variant_id: Option<i32>,
    ) -> AbTestResult<AbTestSummary> {
        let mut tx = self.pool.begin().await?;
        let campaign = Self::lock_test(&mut tx, campaign_id).await?;
        if campaign.test_status.as_deref() != Some("testing") {
            return Err(AbTestError::Conflict(format!(
                "A/B test for campaign {} is not running",
                campaign_id
            )));
        }

        let variants = Self::load_variants(&mut *tx, campaign_id).await?;
        let winner = match variant_id {
            Some(id) => variants.iter().find(|v| v.id == id).ok_or_else(|| {
                AbTestError::NotFound(format!(
                    "Variant {} not found in campaign {}",
                    id, campaign_id
                ))
            })?,
            None => {
                let metrics: Vec<VariantMetrics> =
                    variants.iter().map(CampaignVariant::metrics).collect();
                let index = statistics::leader(&metrics, criteria_of(&campaign))
                    .ok_or_else(|| AbTestError::Invalid("Test has no variants".to_string()))?;
                &variants[index]
            }
        };

        sqlx::query(
            r#"UPDATE campaign_variants
               SET status = CASE WHEN id = $2 THEN 'winner' ELSE 'loser' END
               WHERE campaign_id = $1"#,
        )
        .bind(campaign_id)
        .bind(winner.id)
        .execute(&mut *tx)
        .await?;

        let sql = format!(
            r#"UPDATE campaigns
               SET test_status = 'completed', selected_winner_id = $2, winner_selected_at = NOW(),
                   subject = COALESCE($3, subject), content = COALESCE($4, content)
               WHERE id = $1
               RETURNING {}"#,
            CAMPAIGN_COLUMNS
        );
        let campaign: Campaign = sqlx::query_as(&sql)
            .bind(campaign_id)
            .bind(winner.id)
            .bind(&winner.subject)
            .bind(&winner.content)
            .fetch_one(&mut *tx)
            .await?;

        let variants = Self::load_variants(&mut *tx, campaign_id).await?;
        tx.commit().await?;

        log::info!(
            "ab test: campaign {} winner is variant {} ({})",
            campaign_id,
            winner_label(&variants, campaign.selected_winner_id),
            if variant_id.is_some() { "manual" } else { "automatic" }
        );
        Ok(AbTestSummary { campaign, variants })
    }

    /// Remove a test that has not been sent yet.
    pub async fn delete(&self, campaign_id: i32) -> AbTestResult<()> {
        let mut tx = self.pool.begin().await?;
        let campaign = Self::lock_test(&mut tx, campaign_id).await?;
        if campaign.test_status.as_deref() != Some("draft") {
            return Err(AbTestError::Conflict(format!(
                "A/B test for campaign {} was already sent",
                campaign_id
            )));
        }

        sqlx::query("DELETE FROM campaign_variants WHERE campaign_id = $1")
            .bind(campaign_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query(
            r#"UPDATE campaigns
               SET is_ab_test = FALSE, test_status = NULL, winner_criteria = NULL,
                   auto_select_winner = FALSE
               WHERE id = $1"#,
        )
        .bind(campaign_id)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;

        log::info!("ab test: removed from campaign {}", campaign_id);
        Ok(())
    }

    /// Select winners for running tests whose duration and sample size are met.
    pub async fn auto_select_winners(&self) -> AbTestResult<Vec<i32>> {
        let due: Vec<i32> = sqlx::query_scalar(
            r#"SELECT id FROM campaigns
               WHERE is_ab_test AND test_status = 'testing' AND auto_select_winner
                 AND sent_at IS NOT NULL
                 AND sent_at + make_interval(hours => test_duration_hours) <= NOW()
               ORDER BY id"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut selected = Vec::new();
        for campaign_id in due {
            let summary = self.get(campaign_id).await?;
            let results = compute_results(&summary.campaign, &summary.variants, Utc::now());
            if !results.min_sample_reached {
                log::debug!(
                    "ab test: campaign {} duration elapsed but sample size not reached",
                    campaign_id
                );
                continue;
            }
            match self.select_winner(campaign_id, None).await {
                Ok(_) => selected.push(campaign_id),
                Err(AbTestError::Conflict(msg)) => log::debug!("ab test: {}", msg),
                Err(err) => log::error!(
                    "ab test: auto-selection failed for campaign {}: {}",
                    campaign_id,
                    err
                ),
            }
        }

        Ok(selected)
    }
}

fn winner_label(variants: &[CampaignVariant], winner_id: Option<i32>) -> &str {
    variants
        .iter()
        .find(|v| Some(v.id) == winner_id)
        .map(|v| v.label.as_str())
        .unwrap_or("?")
}

pub fn compute_results(
    campaign: &Campaign,
    variants: &[CampaignVariant],
    now: DateTime<Utc>,
) -> AbTestResults {
    let criteria = criteria_of(campaign);
    let metrics: Vec<VariantMetrics> = variants.iter().map(CampaignVariant::metrics).collect();

    let observations: Vec<(i64, i64)> = metrics.iter().map(|m| m.trials(criteria)).collect();
    let chi_square = statistics::chi_square(&observations);
    let degrees_of_freedom = variants.len().saturating_sub(1);
    let p_value = chi_square.map(|stat| statistics::p_value(stat, degrees_of_freedom));
    let is_significant =
        p_value.is_some_and(|p| statistics::is_significant(p, campaign.confidence_level));

    let min_sample_reached = !variants.is_empty()
        && variants
            .iter()
            .all(|v| v.sent_count >= campaign.min_sample_size);
    let duration_elapsed = campaign.sent_at.is_some_and(|sent_at| {
        sent_at + Duration::hours(campaign.test_duration_hours as i64) <= now
    });
    let leader_variant_id = statistics::leader(&metrics, criteria).map(|index| variants[index].id);

    let results = variants
        .iter()
        .zip(&metrics)
        .map(|(variant, m)| {
            let (trials, successes) = m.trials(criteria);
            VariantResult {
                variant_id: variant.id,
                label: variant.label.clone(),
                status: variant.status.clone(),
                sent: variant.sent_count,
                opened: variant.opened_count,
                clicked: variant.clicked_count,
                converted: variant.conversion_count,
                open_rate: round4(m.rate(WinnerCriteria::OpenRate)),
                click_rate: round4(m.rate(WinnerCriteria::ClickRate)),
                conversion_rate: round4(m.rate(WinnerCriteria::ConversionRate)),
                confidence_interval: statistics::wilson_interval(
                    successes,
                    trials,
                    campaign.confidence_level,
                ),
            }
        })
        .collect();

    AbTestResults {
        campaign_id: campaign.id,
        test_status: campaign.test_status.clone(),
        winner_criteria: criteria,
        confidence_level: campaign.confidence_level,
        variants: results,
        chi_square: chi_square.map(round4),
        degrees_of_freedom,
        p_value,
        is_significant,
        min_sample_reached,
        duration_elapsed,
        leader_variant_id,
        selected_winner_id: campaign.selected_winner_id,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn tests_without_criteria_are_decided_on_conversions() {
        let request: CreateAbTest = serde_json::from_value(serde_json::json!({
            "campaignId": 7,
            "variants": [
                {"label": "A", "splitPercentage": 50.0},
                {"label": "B", "splitPercentage": 50.0}
            ]
        }))
        .unwrap();
        assert_eq!(request.winner_criteria, WinnerCriteria::ConversionRate);
        assert_eq!(WinnerCriteria::parse("bogus").unwrap_or_default(), WinnerCriteria::ConversionRate);
    }

    fn input(label: &str, split: f64) -> VariantInput {
        VariantInput {
            label: label.to_string(),
            subject: None,
            content: None,
            from_name: None,
            split_percentage: split,
        }
    }

    fn campaign(sent_at: Option<DateTime<Utc>>) -> Campaign {
        Campaign {
            id: 1,
            name: "Spring".into(),
            subject: "Hello".into(),
            content: String::new(),
            status: "sent".into(),
            is_ab_test: true,
            test_status: Some("testing".into()),
            winner_criteria: Some("open_rate".into()),
            auto_select_winner: true,
            test_duration_hours: 24,
            confidence_level: 95,
            min_sample_size: 100,
            selected_winner_id: None,
            winner_selected_at: None,
            sent_at,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    fn variant(id: i32, label: &str, sent: i32, opened: i32) -> CampaignVariant {
        CampaignVariant {
            id,
            campaign_id: 1,
            label: label.into(),
            subject: None,
            content: None,
            from_name: None,
            split_percentage: 50.0,
            status: "testing".into(),
            sent_count: sent,
            opened_count: opened,
            clicked_count: 0,
            conversion_count: 0,
            created_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
        }
    }

    #[test]
    fn splits_must_sum_to_one_hundred() {
        assert!(validate_variants(&[input("A", 50.0), input("B", 50.0)]).is_ok());
        assert!(validate_variants(&[input("A", 33.33), input("B", 33.33), input("C", 33.34)]).is_ok());
        assert!(validate_variants(&[input("A", 60.0), input("B", 30.0)]).is_err());
    }

    #[test]
    fn variant_count_and_labels_are_checked() {
        assert!(validate_variants(&[input("A", 100.0)]).is_err());
        assert!(validate_variants(&[input("A", 50.0), input("A", 50.0)]).is_err());
        assert!(validate_variants(&[input("A", 50.0), input("F", 50.0)]).is_err());

        let six: Vec<VariantInput> = ["A", "B", "C", "D", "E", "A"]
            .iter()
            .map(|l| input(l, 100.0 / 6.0))
            .collect();
        assert!(validate_variants(&six).is_err());
    }

    #[test]
    fn results_report_leader_and_readiness() {
        let sent_at = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let c = campaign(Some(sent_at));
        let variants = [variant(10, "A", 200, 30), variant(11, "B", 200, 60)];

        let early = compute_results(&c, &variants, sent_at + Duration::hours(2));
        assert_eq!(early.leader_variant_id, Some(11));
        assert!(early.is_significant);
        assert!(early.min_sample_reached);
        assert!(!early.duration_elapsed);
        assert_eq!(early.degrees_of_freedom, 1);
        assert_eq!(early.variants[1].open_rate, 0.3);

        let later = compute_results(&c, &variants, sent_at + Duration::hours(25));
        assert!(later.duration_elapsed);
    }

    #[test]
    fn small_samples_are_not_ready() {
        let c = campaign(None);
        let variants = [variant(10, "A", 20, 3), variant(11, "B", 200, 60)];
        let results = compute_results(&c, &variants, Utc::now());
        assert!(!results.min_sample_reached);
        assert!(!results.duration_elapsed);
    }
}
