//! Query parameter helpers shared by multiple API route handlers.
//!
//! These structs and enums provide strongly-typed parsing for URL query strings
//! while exposing the metadata needed for OpenAPI generation via `rocket_okapi`.

use rocket::form::{self, ValueField};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::analytics::HeatmapEventType;
use crate::gdpr::{ConsentType, RequestStatus, RequestType};
use crate::import::RowStatus;
use crate::jobs::JobStatus;
use crate::models::{CampaignStatus, SubscriberStatus};

const fn default_page() -> i64 {
    1
}

const fn default_page_size() -> i64 {
    50
}

const MAX_PAGE_SIZE: i64 = 100;

fn default_sort_order() -> SortOrder {
    SortOrder::Desc
}

fn default_subscriber_sort_field() -> SubscriberSortField {
    SubscriberSortField::SubscribedAt
}

/// Common pagination parameters applied to list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema, rocket::form::FromForm)]
#[serde(rename_all = "camelCase")]
pub struct PaginationParams {
    /// One-based page index (defaults to the first page).
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    /// Number of items per page (clamped between 1 and 100, default 50).
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl Default for PaginationParams {
    fn default() -> Self {
        Self {
            page: default_page(),
            size: default_page_size(),
        }
    }
}

impl PaginationParams {
    /// Normalized 1-based page index.
    pub fn page(&self) -> i64 {
        self.page.max(1)
    }

    /// Normalized page size capped at [`MAX_PAGE_SIZE`].
    pub fn size(&self) -> i64 {
        self.size.clamp(1, MAX_PAGE_SIZE)
    }

    pub fn offset(&self) -> i64 {
        (self.page() - 1) * self.size()
    }
}

/// Sort direction for list endpoints.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    /// Render the sort order as a SQL keyword.
    pub fn sql_keyword(self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

impl<'r> form::FromFormField<'r> for SortOrder {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value.to_ascii_lowercase().as_str() {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(form::Error::validation(format!(
                "invalid sort order '{other}'; expected 'asc' or 'desc'"
            ))
            .into()),
        }
    }
}

/// Sort keys supported by the subscriber list endpoint.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum SubscriberSortField {
    Email,
    #[default]
    SubscribedAt,
    UpdatedAt,
    Opens,
    Clicks,
}

impl SubscriberSortField {
    /// Name of the column used when ordering query results.
    pub fn sql_column(self) -> &'static str {
        match self {
            SubscriberSortField::Email => "email",
            SubscriberSortField::SubscribedAt => "subscribed_at",
            SubscriberSortField::UpdatedAt => "updated_at",
            SubscriberSortField::Opens => "opens",
            SubscriberSortField::Clicks => "clicks",
        }
    }
}

impl<'r> form::FromFormField<'r> for SubscriberSortField {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        match field.value {
            "email" => Ok(SubscriberSortField::Email),
            "subscribedAt" => Ok(SubscriberSortField::SubscribedAt),
            "updatedAt" => Ok(SubscriberSortField::UpdatedAt),
            "opens" => Ok(SubscriberSortField::Opens),
            "clicks" => Ok(SubscriberSortField::Clicks),
            other => Err(
                form::Error::validation(format!("invalid subscriber sort key '{other}'")).into(),
            ),
        }
    }
}

impl<'r> form::FromFormField<'r> for SubscriberStatus {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        SubscriberStatus::parse(field.value).ok_or_else(|| {
            form::Error::validation(format!("invalid subscriber status '{}'", field.value)).into()
        })
    }
}

impl<'r> form::FromFormField<'r> for JobStatus {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        JobStatus::parse(&field.value.to_ascii_lowercase()).ok_or_else(|| {
            form::Error::validation(format!("invalid job status '{}'", field.value)).into()
        })
    }
}

impl<'r> form::FromFormField<'r> for RowStatus {
    fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
        RowStatus::parse(&field.value.to_ascii_lowercase()).ok_or_else(|| {
            form::Error::validation(format!("invalid row status '{}'", field.value)).into()
        })
    }
}

/// Parse a query value through the enum's serde name.
fn serde_variant<'v, T: DeserializeOwned>(field: &ValueField<'v>, what: &str) -> form::Result<'v, T> {
    serde_json::from_value(serde_json::Value::String(field.value.to_string()))
        .map_err(|_| form::Error::validation(format!("invalid {} '{}'", what, field.value)).into())
}

macro_rules! serde_form_field {
    ($($ty:ty => $what:literal),* $(,)?) => {$(
        impl<'r> form::FromFormField<'r> for $ty {
            fn from_value(field: ValueField<'r>) -> form::Result<'r, Self> {
                serde_variant(&field, $what)
            }
        }
    )*};
}

serde_form_field!(
    ConsentType => "consent type",
    RequestType => "request type",
    RequestStatus => "request status",
    HeatmapEventType => "event type",
    CampaignStatus => "campaign status",
);

/// Query parameters accepted by the subscriber list endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SubscriberListParams {
    /// Case-insensitive match against email, first name, last name and company.
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub status: Option<SubscriberStatus>,
    #[field(name = "groupId")]
    #[serde(default)]
    pub group_id: Option<i32>,
    #[field(name = "segmentId")]
    #[serde(default)]
    pub segment_id: Option<i32>,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
    /// Sort column (defaults to `subscribedAt`).
    #[field(name = "sortBy", default = SubscriberSortField::SubscribedAt)]
    #[serde(default = "default_subscriber_sort_field")]
    pub sort_by: SubscriberSortField,
    /// Sort direction (defaults to `desc`).
    #[field(default = SortOrder::Desc)]
    #[serde(default = "default_sort_order")]
    pub order: SortOrder,
}

impl SubscriberListParams {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }

    /// Trimmed search term; `None` when blank.
    pub fn query(&self) -> Option<&str> {
        self.q
            .as_deref()
            .map(str::trim)
            .filter(|value| !value.is_empty())
    }
}

/// Query parameters for job list endpoints.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct JobListParams {
    #[serde(default)]
    pub status: Option<JobStatus>,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl JobListParams {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }
}

/// Query parameters for the per-row import results endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportResultParams {
    #[serde(default)]
    pub status: Option<RowStatus>,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl ImportResultParams {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CampaignListParams {
    #[serde(default)]
    pub status: Option<CampaignStatus>,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl CampaignListParams {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }
}

/// Filters for the data subject request listing.
#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
pub struct GdprRequestParams {
    #[serde(default)]
    pub request_type: Option<RequestType>,
    #[serde(default)]
    pub status: Option<RequestStatus>,
    #[field(default = 1)]
    #[serde(default = "default_page")]
    pub page: i64,
    #[field(default = 50)]
    #[serde(default = "default_page_size")]
    pub size: i64,
}

impl GdprRequestParams {
    pub fn pagination(&self) -> PaginationParams {
        PaginationParams {
            page: self.page,
            size: self.size,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
pub struct ConsentCheckParams {
    pub email: String,
    pub consent_type: ConsentType,
    #[serde(default)]
    pub purpose: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
pub struct HeatmapParams {
    pub page_url: String,
    #[serde(default)]
    pub event_type: Option<HeatmapEventType>,
    /// Cells per side (default 20).
    #[serde(default)]
    pub grid_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize, rocket::form::FromForm, JsonSchema)]
pub struct TicketTemplateParams {
    #[field(default = false)]
    #[serde(default)]
    pub active_only: bool,
    #[serde(default)]
    pub category: Option<String>,
}
