use chrono::{DateTime, Utc};
use rocket_db_pools::sqlx::FromRow;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

// ===== Response envelopes =====

/// Success envelope shared by every JSON route: `{success: true, data, message?}`.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: T,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data,
            message: None,
        }
    }

    pub fn with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            data,
            message: Some(message.into()),
        }
    }
}

/// One page of a listing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: i64,
    pub size: i64,
    pub total: i64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, page: i64, size: i64, total: i64) -> Self {
        Self {
            items,
            page,
            size,
            total,
        }
    }

    pub fn total_pages(&self) -> i64 {
        if self.size <= 0 {
            0
        } else {
            (self.total + self.size - 1) / self.size
        }
    }
}

// ===== Subscribers =====

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SubscriberStatus {
    Active,
    Pending,
    Unsubscribed,
    Bounced,
    Complained,
}

impl SubscriberStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            SubscriberStatus::Active => "active",
            SubscriberStatus::Pending => "pending",
            SubscriberStatus::Unsubscribed => "unsubscribed",
            SubscriberStatus::Bounced => "bounced",
            SubscriberStatus::Complained => "complained",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "active" => Some(SubscriberStatus::Active),
            "pending" => Some(SubscriberStatus::Pending),
            "unsubscribed" => Some(SubscriberStatus::Unsubscribed),
            "bounced" => Some(SubscriberStatus::Bounced),
            "complained" => Some(SubscriberStatus::Complained),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Subscriber {
    pub id: i32,
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub status: String,
    pub group_ids: Vec<i32>,
    pub segment_ids: Vec<i32>,
    pub sent: i32,
    pub opens: i32,
    pub clicks: i32,
    pub custom_fields: Value,
    pub subscribed_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub anonymized_at: Option<DateTime<Utc>>,
}

pub const SUBSCRIBER_COLUMNS: &str = "id, email, first_name, last_name, company, phone, location, status, \
     group_ids, segment_ids, sent, opens, clicks, custom_fields, subscribed_at, updated_at, anonymized_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberGroup {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Segment {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub criteria: Value,
    pub created_at: DateTime<Utc>,
}

// ===== Campaigns =====

/// Delivery state of a campaign. A/B progress is tracked separately in
/// `test_status`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sent,
}

impl CampaignStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sent => "sent",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct Campaign {
    pub id: i32,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub status: String,
    pub is_ab_test: bool,
    pub test_status: Option<String>,
    pub winner_criteria: Option<String>,
    pub auto_select_winner: bool,
    pub test_duration_hours: i32,
    pub confidence_level: i32,
    pub min_sample_size: i32,
    pub selected_winner_id: Option<i32>,
    pub winner_selected_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub const CAMPAIGN_COLUMNS: &str = "id, name, subject, content, status, is_ab_test, test_status, \
     winner_criteria, auto_select_winner, test_duration_hours, confidence_level, min_sample_size, \
     selected_winner_id, winner_selected_at, sent_at, created_at";

// ===== Support desk =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TicketTemplate {
    pub id: i32,
    pub name: String,
    pub category: String,
    pub subject: String,
    pub body: String,
    pub default_priority: String,
    pub fields: Value,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ===== Users =====

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UserRecord {
    pub id: i32,
    pub email: String,
    pub display_name: Option<String>,
    pub role: String,
    pub disabled: bool,
    pub created_at: DateTime<Utc>,
    pub last_login_at: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_omits_missing_message() {
        let json = serde_json::to_value(ApiResponse::ok(5)).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 5}));

        let json = serde_json::to_value(ApiResponse::with_message("x", "done")).unwrap();
        assert_eq!(json["message"], "done");
    }

    #[test]
    fn page_count_rounds_up() {
        let page: Page<i32> = Page::new(vec![], 1, 10, 21);
        assert_eq!(page.total_pages(), 3);
        let empty: Page<i32> = Page::new(vec![], 1, 10, 0);
        assert_eq!(empty.total_pages(), 0);
    }

    #[test]
    fn subscriber_status_parses_case_insensitively() {
        assert_eq!(SubscriberStatus::parse(" Active "), Some(SubscriberStatus::Active));
        assert_eq!(SubscriberStatus::parse("gone"), None);
        assert_eq!(SubscriberStatus::Bounced.as_str(), "bounced");
    }
}
