use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::models::Subscriber;

/// A subscriber column that can be exported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub enum ExportField {
    Email,
    FirstName,
    LastName,
    Company,
    Phone,
    Status,
    Location,
    Sent,
    Opens,
    Clicks,
    SubscribedAt,
    LastUpdated,
    Groups,
    Segments,
}

pub const ALL_FIELDS: [ExportField; 14] = [
    ExportField::Email,
    ExportField::FirstName,
    ExportField::LastName,
    ExportField::Company,
    ExportField::Phone,
    ExportField::Status,
    ExportField::Location,
    ExportField::Sent,
    ExportField::Opens,
    ExportField::Clicks,
    ExportField::SubscribedAt,
    ExportField::LastUpdated,
    ExportField::Groups,
    ExportField::Segments,
];

/// One exported cell. Counters stay numeric so spreadsheets can sum them.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(i64),
}

impl CellValue {
    pub fn to_text(&self) -> String {
        match self {
            CellValue::Text(value) => value.clone(),
            CellValue::Number(value) => value.to_string(),
        }
    }
}

/// Id -> name lookups for group and segment membership columns.
#[derive(Debug, Clone, Default)]
pub struct MembershipNames {
    pub groups: HashMap<i32, String>,
    pub segments: HashMap<i32, String>,
}

fn join_names(ids: &[i32], names: &HashMap<i32, String>) -> String {
    ids.iter()
        .map(|id| names.get(id).cloned().unwrap_or_else(|| id.to_string()))
        .collect::<Vec<_>>()
        .join(";")
}

impl ExportField {
    pub fn key(self) -> &'static str {
        match self {
            ExportField::Email => "email",
            ExportField::FirstName => "firstName",
            ExportField::LastName => "lastName",
            ExportField::Company => "company",
            ExportField::Phone => "phone",
            ExportField::Status => "status",
            ExportField::Location => "location",
            ExportField::Sent => "sent",
            ExportField::Opens => "opens",
            ExportField::Clicks => "clicks",
            ExportField::SubscribedAt => "subscribedAt",
            ExportField::LastUpdated => "lastUpdated",
            ExportField::Groups => "groups",
            ExportField::Segments => "segments",
        }
    }

    /// Column header written to the file.
    pub fn header(self) -> &'static str {
        match self {
            ExportField::Email => "Email",
            ExportField::FirstName => "First Name",
            ExportField::LastName => "Last Name",
            ExportField::Company => "Company",
            ExportField::Phone => "Phone",
            ExportField::Status => "Status",
            ExportField::Location => "Location",
            ExportField::Sent => "Emails Sent",
            ExportField::Opens => "Opens",
            ExportField::Clicks => "Clicks",
            ExportField::SubscribedAt => "Subscribed At",
            ExportField::LastUpdated => "Last Updated",
            ExportField::Groups => "Groups",
            ExportField::Segments => "Segments",
        }
    }

    pub fn parse(key: &str) -> Option<Self> {
        ALL_FIELDS.into_iter().find(|field| field.key() == key)
    }

    pub fn value(self, subscriber: &Subscriber, names: &MembershipNames) -> CellValue {
        let text = |value: &Option<String>| CellValue::Text(value.clone().unwrap_or_default());
        match self {
            ExportField::Email => CellValue::Text(subscriber.email.clone()),
            ExportField::FirstName => text(&subscriber.first_name),
            ExportField::LastName => text(&subscriber.last_name),
            ExportField::Company => text(&subscriber.company),
            ExportField::Phone => text(&subscriber.phone),
            ExportField::Status => CellValue::Text(subscriber.status.clone()),
            ExportField::Location => text(&subscriber.location),
            ExportField::Sent => CellValue::Number(subscriber.sent as i64),
            ExportField::Opens => CellValue::Number(subscriber.opens as i64),
            ExportField::Clicks => CellValue::Number(subscriber.clicks as i64),
            ExportField::SubscribedAt => CellValue::Text(subscriber.subscribed_at.to_rfc3339()),
            ExportField::LastUpdated => CellValue::Text(subscriber.updated_at.to_rfc3339()),
            ExportField::Groups => {
                CellValue::Text(join_names(&subscriber.group_ids, &names.groups))
            }
            ExportField::Segments => {
                CellValue::Text(join_names(&subscriber.segment_ids, &names.segments))
            }
        }
    }
}

/// Field descriptor returned by the export field listing.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ExportFieldInfo {
    pub key: String,
    pub label: String,
}

pub fn available_fields() -> Vec<ExportFieldInfo> {
    ALL_FIELDS
        .into_iter()
        .map(|field| ExportFieldInfo {
            key: field.key().to_string(),
            label: field.header().to_string(),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn subscriber() -> Subscriber {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        Subscriber {
            id: 1,
            email: "jane@example.com".into(),
            first_name: Some("Jane".into()),
            last_name: None,
            company: None,
            phone: None,
            location: Some("Berlin".into()),
            status: "active".into(),
            group_ids: vec![1, 7],
            segment_ids: vec![],
            sent: 12,
            opens: 5,
            clicks: 2,
            custom_fields: json!({}),
            subscribed_at: at,
            updated_at: at,
            anonymized_at: None,
        }
    }

    #[test]
    fn keys_parse_back() {
        for field in ALL_FIELDS {
            assert_eq!(ExportField::parse(field.key()), Some(field));
        }
        assert_eq!(ExportField::parse("password"), None);
    }

    #[test]
    fn values_render_per_field() {
        let mut names = MembershipNames::default();
        names.groups.insert(1, "Newsletter".into());

        let s = subscriber();
        assert_eq!(ExportField::FirstName.value(&s, &names), CellValue::Text("Jane".into()));
        assert_eq!(ExportField::LastName.value(&s, &names), CellValue::Text(String::new()));
        assert_eq!(ExportField::Opens.value(&s, &names), CellValue::Number(5));
        assert_eq!(
            ExportField::Groups.value(&s, &names),
            CellValue::Text("Newsletter;7".into())
        );
        assert_eq!(
            ExportField::SubscribedAt.value(&s, &names).to_text(),
            "2024-03-01T12:00:00+00:00"
        );
    }
}
