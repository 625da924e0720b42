use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::{Postgres, QueryBuilder};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use super::fields::ExportField;
use crate::models::SubscriberStatus;

pub const MIN_BATCH_SIZE: usize = 100;
pub const MAX_BATCH_SIZE: usize = 10_000;
const DEFAULT_BATCH_SIZE: usize = 1_000;

/// Erased subscribers and anyone whose latest marketing consent is withdrawn
/// never leave the system, whatever the filters say.
const CONSENT_COMPLIANT: &str = " WHERE anonymized_at IS NULL \
     AND COALESCE((SELECT c.consent_status FROM consent_records c \
     WHERE c.email = subscribers.email AND c.consent_type = 'email_marketing' \
     ORDER BY c.consented_at DESC, c.id DESC LIMIT 1), 'given') <> 'withdrawn'";

fn default_batch_size() -> usize {
    DEFAULT_BATCH_SIZE
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
pub struct DateRange {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
}

/// Which subscribers an export includes. Empty lists do not filter.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportFilters {
    #[serde(default)]
    pub status: Vec<SubscriberStatus>,
    #[serde(default)]
    pub group_ids: Vec<i32>,
    #[serde(default)]
    pub segment_ids: Vec<i32>,
    /// Bounds on `subscribedAt`, both inclusive.
    #[serde(default)]
    pub date_range: Option<DateRange>,
}

impl ExportFilters {
    pub fn validate(&self) -> Result<(), String> {
        if let Some(DateRange {
            start: Some(start),
            end: Some(end),
        }) = &self.date_range
        {
            if start > end {
                return Err("dateRange.start must not be after dateRange.end".to_string());
            }
        }
        Ok(())
    }

    /// Append ` WHERE ...` for these filters; always emits a WHERE clause so
    /// callers can chain further `AND` conditions.
    pub fn push_where(&self, builder: &mut QueryBuilder<'_, Postgres>) {
        builder.push(CONSENT_COMPLIANT);

        if !self.status.is_empty() {
            let statuses: Vec<String> = self
                .status
                .iter()
                .map(|status| status.as_str().to_string())
                .collect();
            builder.push(" AND status = ANY(");
            builder.push_bind(statuses);
            builder.push(")");
        }

        if !self.group_ids.is_empty() {
            builder.push(" AND group_ids && ");
            builder.push_bind(self.group_ids.clone());
            builder.push("::int4[]");
        }

        if !self.segment_ids.is_empty() {
            builder.push(" AND segment_ids && ");
            builder.push_bind(self.segment_ids.clone());
            builder.push("::int4[]");
        }

        if let Some(range) = &self.date_range {
            if let Some(start) = range.start {
                builder.push(" AND subscribed_at >= ");
                builder.push_bind(start);
            }
            if let Some(end) = range.end {
                builder.push(" AND subscribed_at <= ");
                builder.push_bind(end);
            }
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ExportFormat {
    #[default]
    Csv,
    Xlsx,
}

impl ExportFormat {
    pub fn extension(self) -> &'static str {
        match self {
            ExportFormat::Csv => "csv",
            ExportFormat::Xlsx => "xlsx",
        }
    }

    pub fn content_type(self) -> &'static str {
        match self {
            ExportFormat::Csv => "text/csv",
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportOptions {
    #[serde(default)]
    pub format: ExportFormat,
    pub fields: Vec<ExportField>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl ExportOptions {
    pub fn validate(&self) -> Result<(), String> {
        if self.fields.is_empty() {
            return Err("At least one export field is required".to_string());
        }
        if !(MIN_BATCH_SIZE..=MAX_BATCH_SIZE).contains(&self.batch_size) {
            return Err(format!(
                "batchSize must be between {} and {}",
                MIN_BATCH_SIZE, MAX_BATCH_SIZE
            ));
        }
        Ok(())
    }
}
