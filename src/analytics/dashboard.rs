use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{self, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::{AnalyticsResult, rate};
use crate::jobs::{JobKind, JobQueue, JobStatus};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Dashboard {
    pub total_subscribers: i64,
    pub subscribers_by_status: BTreeMap<String, i64>,
    pub total_campaigns: i64,
    pub sent_campaigns: i64,
    pub active_ab_tests: i64,
    pub emails_sent: i64,
    pub total_opens: i64,
    pub total_clicks: i64,
    pub average_open_rate: f64,
    pub average_click_rate: f64,
    pub import_jobs: BTreeMap<String, i64>,
    pub export_jobs: BTreeMap<String, i64>,
    pub generated_at: DateTime<Utc>,
}

fn by_status(counts: Vec<(JobStatus, i64)>) -> BTreeMap<String, i64> {
    counts
        .into_iter()
        .map(|(status, count)| (status.as_str().to_string(), count))
        .collect()
}

pub async fn load_dashboard(pool: &PgPool) -> AnalyticsResult<Dashboard> {
    let queue = JobQueue::new(pool.clone());

    let status_query = sqlx::query_as::<_, (String, i64)>(
        "SELECT status, COUNT(*) FROM subscribers GROUP BY status ORDER BY status",
    )
    .fetch_all(pool);
    let campaign_query = sqlx::query_as::<_, (i64, i64, i64)>(
        r#"SELECT COUNT(*),
                  COUNT(*) FILTER (WHERE status = 'sent'),
                  COUNT(*) FILTER (WHERE is_ab_test AND test_status = 'testing')
           FROM campaigns"#,
    )
    .fetch_one(pool);
    let engagement_query = sqlx::query_as::<_, (i64, i64, i64, i64, i64)>(
        r#"SELECT COUNT(*),
                  COALESCE(SUM(open_count), 0)::int8,
                  COALESCE(SUM(click_count), 0)::int8,
                  COUNT(*) FILTER (WHERE open_count > 0),
                  COUNT(*) FILTER (WHERE click_count > 0)
           FROM email_tracking"#,
    )
    .fetch_one(pool);

    let (statuses, campaigns, engagement, imports, exports) = tokio::try_join!(
        status_query,
        campaign_query,
        engagement_query,
        queue.counts_by_status(JobKind::Import),
        queue.counts_by_status(JobKind::Export),
    )?;

    let (total_campaigns, sent_campaigns, active_ab_tests) = campaigns;
    let (emails_sent, total_opens, total_clicks, unique_opens, unique_clicks) = engagement;
    let total_subscribers = statuses.iter().map(|(_, count)| count).sum();

    Ok(Dashboard {
        total_subscribers,
        subscribers_by_status: statuses.into_iter().collect(),
        total_campaigns,
        sent_campaigns,
        active_ab_tests,
        emails_sent,
        total_opens,
        total_clicks,
        average_open_rate: rate(unique_opens, emails_sent),
        average_click_rate: rate(unique_clicks, emails_sent),
        import_jobs: by_status(imports),
        export_jobs: by_status(exports),
        generated_at: Utc::now(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_counts_are_keyed_by_status_name() {
        let map = by_status(vec![(JobStatus::Completed, 3), (JobStatus::Failed, 1)]);
        assert_eq!(map.get("completed"), Some(&3));
        assert_eq!(map.get("failed"), Some(&1));
        assert!(!map.contains_key("pending"));
    }
}
