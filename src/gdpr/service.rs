use chrono::{DateTime, Months, Utc};
use rocket_db_pools::sqlx::{self, FromRow, PgPool};
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use super::anonymize::{AnonymizationMethod, anonymize_value, anonymized_email};
use crate::import::validation::{is_valid_syntax, normalize_email};
use crate::models::{Page, SUBSCRIBER_COLUMNS, Subscriber};

/// Requests still open after this many days are flagged in the report.
const REQUEST_DEADLINE_DAYS: i32 = 30;

#[derive(Debug, Error)]
pub enum GdprError {
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),
    #[error("{0}")]
    Invalid(String),
}

pub type GdprResult<T> = Result<T, GdprError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConsentType {
    EmailMarketing,
    DataProcessing,
    Profiling,
    ThirdPartySharing,
    Analytics,
}

impl ConsentType {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentType::EmailMarketing => "email_marketing",
            ConsentType::DataProcessing => "data_processing",
            ConsentType::Profiling => "profiling",
            ConsentType::ThirdPartySharing => "third_party_sharing",
            ConsentType::Analytics => "analytics",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ConsentMethod {
    ExplicitOptIn,
    DoubleOptIn,
    ImpliedConsent,
    LegitimateInterest,
    Import,
}

impl ConsentMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            ConsentMethod::ExplicitOptIn => "explicit_opt_in",
            ConsentMethod::DoubleOptIn => "double_opt_in",
            ConsentMethod::ImpliedConsent => "implied_consent",
            ConsentMethod::LegitimateInterest => "legitimate_interest",
            ConsentMethod::Import => "import",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum LegalBasis {
    Consent,
    Contract,
    LegalObligation,
    VitalInterests,
    PublicTask,
    LegitimateInterests,
}

impl LegalBasis {
    pub fn as_str(self) -> &'static str {
        match self {
            LegalBasis::Consent => "consent",
            LegalBasis::Contract => "contract",
            LegalBasis::LegalObligation => "legal_obligation",
            LegalBasis::VitalInterests => "vital_interests",
            LegalBasis::PublicTask => "public_task",
            LegalBasis::LegitimateInterests => "legitimate_interests",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestType {
    Access,
    Erasure,
    Portability,
    WithdrawConsent,
}

impl RequestType {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestType::Access => "access",
            RequestType::Erasure => "erasure",
            RequestType::Portability => "portability",
            RequestType::WithdrawConsent => "withdraw_consent",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    InProgress,
    Completed,
    Rejected,
}

impl RequestStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::InProgress => "in_progress",
            RequestStatus::Completed => "completed",
            RequestStatus::Rejected => "rejected",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsentRecord {
    pub id: i32,
    pub subscriber_id: Option<i32>,
    pub email: String,
    pub consent_type: String,
    pub consent_status: String,
    pub consent_method: String,
    pub legal_basis: String,
    pub purposes: Vec<String>,
    pub retention_months: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub consented_at: DateTime<Utc>,
    pub withdrawn_at: Option<DateTime<Utc>>,
    pub withdrawal_reason: Option<String>,
}

const CONSENT_COLUMNS: &str = "id, subscriber_id, email, consent_type, consent_status, consent_method, \
     legal_basis, purposes, retention_months, ip_address, user_agent, consented_at, withdrawn_at, \
     withdrawal_reason";

impl ConsentRecord {
    /// When the consent lapses, if it has a retention period.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let months = u32::try_from(self.retention_months?).ok()?;
        self.consented_at.checked_add_months(Months::new(months))
    }

    pub fn is_valid_for(&self, purpose: Option<&str>, now: DateTime<Utc>) -> bool {
        if self.consent_status != "given" {
            return false;
        }
        if self.expires_at().is_some_and(|expiry| now > expiry) {
            return false;
        }
        purpose.is_none_or(|purpose| self.purposes.iter().any(|p| p == purpose))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct DataSubjectRequest {
    pub id: i32,
    pub email: String,
    pub request_type: String,
    pub status: String,
    pub details: Value,
    pub response_data: Option<Value>,
    pub notes: Option<String>,
    pub requested_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

const REQUEST_COLUMNS: &str =
    "id, email, request_type, status, details, response_data, notes, requested_at, completed_at";

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct TrackConsent {
    pub email: String,
    pub consent_type: ConsentType,
    pub consent_method: ConsentMethod,
    pub legal_basis: LegalBasis,
    #[serde(default)]
    pub purposes: Vec<String>,
    pub retention_months: Option<i32>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct WithdrawConsent {
    pub email: String,
    pub consent_type: ConsentType,
    pub reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ConsentCheck {
    pub email: String,
    pub consent_type: ConsentType,
    pub purpose: Option<String>,
    pub has_valid_consent: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RiskAssessment {
    pub level: String,
    pub issues: Vec<String>,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RiskInputs {
    pub total_subscribers: i64,
    pub active_subscribers: i64,
    pub overdue_requests: i64,
    pub expired_consents: i64,
}

/// Flag common problems; zero issues is low risk, three or more is high.
pub fn assess_risk(inputs: RiskInputs) -> RiskAssessment {
    let mut issues = Vec::new();
    let mut recommendations = Vec::new();

    if inputs.total_subscribers > 0
        && (inputs.active_subscribers as f64 / inputs.total_subscribers as f64) < 0.5
    {
        issues.push("High percentage of inactive subscribers".to_string());
        recommendations
            .push("Review consent status and clean up inactive subscribers".to_string());
    }
    if inputs.overdue_requests > 0 {
        issues.push(format!(
            "{} data subject requests open for more than {} days",
            inputs.overdue_requests, REQUEST_DEADLINE_DAYS
        ));
        recommendations.push("Complete outstanding data subject requests".to_string());
    }
    if inputs.expired_consents > 0 {
        issues.push(format!(
            "{} consent records past their retention period",
            inputs.expired_consents
        ));
        recommendations.push("Run the data retention cleanup".to_string());
    }

    let level = match issues.len() {
        0 => "low",
        1 | 2 => "medium",
        _ => "high",
    };

    RiskAssessment {
        level: level.to_string(),
        issues,
        recommendations,
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ComplianceReport {
    pub report_date: DateTime<Utc>,
    pub total_subscribers: i64,
    pub consented_subscribers: i64,
    pub withdrawn_consents: i64,
    pub pending_requests: i64,
    pub completed_requests: i64,
    pub expired_consents: i64,
    pub anonymized_records: i64,
    pub last_anonymized_at: Option<DateTime<Utc>>,
    pub risk_assessment: RiskAssessment,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct RetentionCleanup {
    pub expired_consents: u64,
    pub deleted_subscribers: u64,
    pub errors: Vec<String>,
}

fn processing_activities() -> Value {
    json!([
        {
            "activity": "Email Marketing",
            "purpose": "Send promotional emails",
            "legalBasis": LegalBasis::Consent.as_str(),
            "dataCategories": ["email", "name", "preferences"]
        },
        {
            "activity": "Engagement Analytics",
            "purpose": "Measure opens and clicks to improve campaigns",
            "legalBasis": LegalBasis::LegitimateInterests.as_str(),
            "dataCategories": ["email", "engagement"]
        }
    ])
}

fn clean_email(raw: &str) -> GdprResult<String> {
    normalize_email(raw)
        .filter(|email| is_valid_syntax(email))
        .ok_or_else(|| GdprError::Invalid(format!("Invalid email address '{}'", raw.trim())))
}

#[derive(Clone)]
pub struct GdprService {
    pool: PgPool,
}

impl GdprService {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn find_subscriber(&self, email: &str) -> GdprResult<Option<Subscriber>> {
        let sql = format!(
            "SELECT {} FROM subscribers WHERE lower(email) = $1",
            SUBSCRIBER_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await?)
    }

    async fn consent_history(&self, email: &str) -> GdprResult<Vec<ConsentRecord>> {
        let sql = format!(
            "SELECT {} FROM consent_records WHERE lower(email) = $1 ORDER BY consented_at DESC, id DESC",
            CONSENT_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(email)
            .fetch_all(&self.pool)
            .await?)
    }

    async fn store_request<'e, E>(
        executor: E,
        email: &str,
        request_type: RequestType,
        status: RequestStatus,
        details: Value,
        response_data: Option<Value>,
        notes: Option<String>,
    ) -> GdprResult<DataSubjectRequest>
    where
        E: sqlx::PgExecutor<'e>,
    {
        let sql = format!(
            r#"INSERT INTO data_subject_requests (email, request_type, status, details, response_data, notes, completed_at)
               VALUES ($1, $2, $3, $4, $5, $6,
                       CASE WHEN $3 IN ('completed', 'rejected') THEN NOW() END)
               RETURNING {}"#,
            REQUEST_COLUMNS
        );
        Ok(sqlx::query_as(&sql)
            .bind(email)
            .bind(request_type.as_str())
            .bind(status.as_str())
            .bind(details)
            .bind(response_data)
            .bind(notes)
            .fetch_one(executor)
            .await?)
    }

    pub async fn track_consent(&self, request: TrackConsent) -> GdprResult<ConsentRecord> {
        let email = clean_email(&request.email)?;
        if request.retention_months.is_some_and(|months| months < 1) {
            return Err(GdprError::Invalid(
                "retentionMonths must be at least 1".to_string(),
            ));
        }

        let subscriber_id = self.find_subscriber(&email).await?.map(|s| s.id);
        let sql = format!(
            r#"INSERT INTO consent_records
               (subscriber_id, email, consent_type, consent_status, consent_method, legal_basis,
                purposes, retention_months, ip_address, user_agent)
               VALUES ($1, $2, $3, 'given', $4, $5, $6, $7, $8, $9)
               RETURNING {}"#,
            CONSENT_COLUMNS
        );
        let record: ConsentRecord = sqlx::query_as(&sql)
            .bind(subscriber_id)
            .bind(&email)
            .bind(request.consent_type.as_str())
            .bind(request.consent_method.as_str())
            .bind(request.legal_basis.as_str())
            .bind(&request.purposes)
            .bind(request.retention_months)
            .bind(&request.ip_address)
            .bind(&request.user_agent)
            .fetch_one(&self.pool)
            .await?;

        log::info!(
            "gdpr: consent {} recorded ({} via {})",
            record.id,
            record.consent_type,
            record.consent_method
        );
        Ok(record)
    }

    /// Withdraw every active consent of the type; returns how many were withdrawn.
    pub async fn withdraw_consent(&self, request: WithdrawConsent) -> GdprResult<u64> {
        let email = clean_email(&request.email)?;
        let mut tx = self.pool.begin().await?;

        let withdrawn = sqlx::query(
            r#"UPDATE consent_records
               SET consent_status = 'withdrawn', withdrawn_at = NOW(), withdrawal_reason = $3
               WHERE lower(email) = $1 AND consent_type = $2 AND consent_status = 'given'"#,
        )
        .bind(&email)
        .bind(request.consent_type.as_str())
        .bind(&request.reason)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if request.consent_type == ConsentType::EmailMarketing {
            sqlx::query(
                "UPDATE subscribers SET status = 'unsubscribed', updated_at = NOW() WHERE lower(email) = $1",
            )
            .bind(&email)
            .execute(&mut *tx)
            .await?;
        }

        Self::store_request(
            &mut *tx,
            &email,
            RequestType::WithdrawConsent,
            RequestStatus::Completed,
            json!({"consentType": request.consent_type.as_str(), "reason": request.reason}),
            Some(json!({"withdrawnRecords": withdrawn})),
            None,
        )
        .await?;
        tx.commit().await?;

        log::info!(
            "gdpr: withdrew {} {} consents",
            withdrawn,
            request.consent_type.as_str()
        );
        Ok(withdrawn)
    }

    pub async fn check_consent(
        &self,
        email: &str,
        consent_type: ConsentType,
        purpose: Option<String>,
    ) -> GdprResult<ConsentCheck> {
        let email = clean_email(email)?;
        let sql = format!(
            "SELECT {} FROM consent_records WHERE lower(email) = $1 AND consent_type = $2",
            CONSENT_COLUMNS
        );
        let records: Vec<ConsentRecord> = sqlx::query_as(&sql)
            .bind(&email)
            .bind(consent_type.as_str())
            .fetch_all(&self.pool)
            .await?;

        let now = Utc::now();
        let has_valid_consent = records
            .iter()
            .any(|record| record.is_valid_for(purpose.as_deref(), now));

        Ok(ConsentCheck {
            email,
            consent_type,
            purpose,
            has_valid_consent,
        })
    }

    /// Right of access: everything held about the address.
    pub async fn access_request(&self, email: &str) -> GdprResult<DataSubjectRequest> {
        let email = clean_email(email)?;
        let subscriber = self.find_subscriber(&email).await?;
        let consents = self.consent_history(&email).await?;

        let response = json!({
            "personalData": subscriber,
            "consentHistory": consents,
            "dataProcessingActivities": processing_activities(),
            "dataRetentionInfo": {
                "retentionPeriod": "24 months",
                "scheduledDeletion": Value::Null
            },
            "thirdPartySharing": []
        });

        let request = Self::store_request(
            &self.pool,
            &email,
            RequestType::Access,
            RequestStatus::Completed,
            json!({}),
            Some(response),
            None,
        )
        .await?;
        log::info!("gdpr: access request {} completed", request.id);
        Ok(request)
    }

    /// Right to erasure. With `retain_statistics` the subscriber row is kept
    /// with identifying fields hashed; otherwise it is deleted outright.
    pub async fn erasure_request(
        &self,
        email: &str,
        retain_statistics: bool,
    ) -> GdprResult<DataSubjectRequest> {
        let email = clean_email(email)?;
        let details = json!({"retainStatistics": retain_statistics});
        let replacement = anonymized_email(&email);

        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT {} FROM subscribers WHERE lower(email) = $1 FOR UPDATE",
            SUBSCRIBER_COLUMNS
        );
        let subscriber: Option<Subscriber> = sqlx::query_as(&sql)
            .bind(&email)
            .fetch_optional(&mut *tx)
            .await?;

        let notes = match (&subscriber, retain_statistics) {
            (None, _) => Some("No subscriber data found".to_string()),
            (Some(subscriber), true) => {
                let hash = |value: &Option<String>, field: &str| {
                    value
                        .as_deref()
                        .map(|v| anonymize_value(v, field, AnonymizationMethod::Hash))
                };
                sqlx::query(
                    r#"UPDATE subscribers
                       SET email = $2, first_name = $3, last_name = $4, phone = $5, company = $6,
                           location = NULL, custom_fields = '{}'::jsonb, status = 'unsubscribed',
                           anonymized_at = NOW(), updated_at = NOW()
                       WHERE id = $1"#,
                )
                .bind(subscriber.id)
                .bind(&replacement)
                .bind(hash(&subscriber.first_name, "firstName"))
                .bind(hash(&subscriber.last_name, "lastName"))
                .bind(hash(&subscriber.phone, "phone"))
                .bind(hash(&subscriber.company, "company"))
                .execute(&mut *tx)
                .await?;

                sqlx::query(
                    r#"UPDATE consent_records
                       SET email = $2, ip_address = NULL, user_agent = NULL
                       WHERE lower(email) = $1"#,
                )
                .bind(&email)
                .bind(&replacement)
                .execute(&mut *tx)
                .await?;
                None
            }
            (Some(subscriber), false) => {
                sqlx::query("DELETE FROM consent_records WHERE lower(email) = $1")
                    .bind(&email)
                    .execute(&mut *tx)
                    .await?;
                sqlx::query("DELETE FROM subscribers WHERE id = $1")
                    .bind(subscriber.id)
                    .execute(&mut *tx)
                    .await?;
                None
            }
        };

        sqlx::query("UPDATE email_tracking SET email = $2 WHERE lower(email) = $1")
            .bind(&email)
            .bind(&replacement)
            .execute(&mut *tx)
            .await?;

        // Earlier access and portability answers hold full copies of the data.
        sqlx::query(
            r#"UPDATE data_subject_requests
               SET email = $2, response_data = NULL, details = details - 'reason'
               WHERE lower(email) = $1"#,
        )
        .bind(&email)
        .bind(&replacement)
        .execute(&mut *tx)
        .await?;

        let request = Self::store_request(
            &mut *tx,
            &replacement,
            RequestType::Erasure,
            RequestStatus::Completed,
            details,
            None,
            notes,
        )
        .await?;
        tx.commit().await?;

        log::info!(
            "gdpr: erasure request {} completed ({})",
            request.id,
            if retain_statistics { "anonymized" } else { "deleted" }
        );
        Ok(request)
    }

    /// Right to data portability: a machine-readable copy of the subscriber.
    pub async fn portability_request(&self, email: &str) -> GdprResult<DataSubjectRequest> {
        let email = clean_email(email)?;
        let Some(subscriber) = self.find_subscriber(&email).await? else {
            let request = Self::store_request(
                &self.pool,
                &email,
                RequestType::Portability,
                RequestStatus::Rejected,
                json!({}),
                None,
                Some("No data found for the provided email".to_string()),
            )
            .await?;
            log::info!("gdpr: portability request {} rejected", request.id);
            return Ok(request);
        };

        let consents = self.consent_history(&email).await?;
        let portable = json!({
            "personalInformation": {
                "email": subscriber.email,
                "firstName": subscriber.first_name,
                "lastName": subscriber.last_name,
                "company": subscriber.company,
                "phone": subscriber.phone,
                "location": subscriber.location,
                "subscribedAt": subscriber.subscribed_at,
            },
            "preferences": {
                "groups": subscriber.group_ids,
                "segments": subscriber.segment_ids,
                "status": subscriber.status,
                "customFields": subscriber.custom_fields,
            },
            "engagementData": {
                "emailsSent": subscriber.sent,
                "emailsOpened": subscriber.opens,
                "linksClicked": subscriber.clicks,
            },
            "consentHistory": consents,
        });

        let request = Self::store_request(
            &self.pool,
            &email,
            RequestType::Portability,
            RequestStatus::Completed,
            json!({}),
            Some(portable),
            None,
        )
        .await?;
        log::info!("gdpr: portability request {} completed", request.id);
        Ok(request)
    }

    pub async fn list_requests(
        &self,
        request_type: Option<RequestType>,
        status: Option<RequestStatus>,
        page: i64,
        size: i64,
    ) -> GdprResult<Page<DataSubjectRequest>> {
        let request_type = request_type.map(RequestType::as_str);
        let status = status.map(RequestStatus::as_str);
        let offset = (page - 1) * size;

        let sql = format!(
            r#"SELECT {} FROM data_subject_requests
               WHERE ($1::text IS NULL OR request_type = $1) AND ($2::text IS NULL OR status = $2)
               ORDER BY requested_at DESC, id DESC
               LIMIT $3 OFFSET $4"#,
            REQUEST_COLUMNS
        );
        let items_query = sqlx::query_as::<_, DataSubjectRequest>(&sql)
            .bind(request_type)
            .bind(status)
            .bind(size)
            .bind(offset)
            .fetch_all(&self.pool);
        let count_query = sqlx::query_scalar::<_, i64>(
            r#"SELECT COUNT(*) FROM data_subject_requests
               WHERE ($1::text IS NULL OR request_type = $1) AND ($2::text IS NULL OR status = $2)"#,
        )
        .bind(request_type)
        .bind(status)
        .fetch_one(&self.pool);

        let (items, total) = tokio::try_join!(items_query, count_query)?;
        Ok(Page::new(items, page, size, total))
    }

    pub async fn compliance_report(&self) -> GdprResult<ComplianceReport> {
        let (total_subscribers, active_subscribers, anonymized_records, last_anonymized_at): (
            i64,
            i64,
            i64,
            Option<DateTime<Utc>>,
        ) = sqlx::query_as(
            r#"SELECT COUNT(*),
                      COUNT(*) FILTER (WHERE status = 'active' AND anonymized_at IS NULL),
                      COUNT(*) FILTER (WHERE anonymized_at IS NOT NULL),
                      MAX(anonymized_at)
               FROM subscribers"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (withdrawn_consents, expired_consents): (i64, i64) = sqlx::query_as(
            r#"SELECT COUNT(*) FILTER (WHERE consent_status = 'withdrawn'),
                      COUNT(*) FILTER (WHERE consent_status = 'expired'
                          OR (consent_status = 'given' AND retention_months IS NOT NULL
                              AND consented_at + make_interval(months => retention_months) < NOW()))
               FROM consent_records"#,
        )
        .fetch_one(&self.pool)
        .await?;

        let (pending_requests, completed_requests, overdue_requests): (i64, i64, i64) =
            sqlx::query_as(
                r#"SELECT COUNT(*) FILTER (WHERE status IN ('pending', 'in_progress')),
                          COUNT(*) FILTER (WHERE status = 'completed'),
                          COUNT(*) FILTER (WHERE status IN ('pending', 'in_progress')
                              AND requested_at < NOW() - make_interval(days => $1))
                   FROM data_subject_requests"#,
            )
            .bind(REQUEST_DEADLINE_DAYS)
            .fetch_one(&self.pool)
            .await?;

        let risk_assessment = assess_risk(RiskInputs {
            total_subscribers,
            active_subscribers,
            overdue_requests,
            expired_consents,
        });

        log::info!("gdpr: compliance report generated (risk {})", risk_assessment.level);
        Ok(ComplianceReport {
            report_date: Utc::now(),
            total_subscribers,
            consented_subscribers: active_subscribers,
            withdrawn_consents,
            pending_requests,
            completed_requests,
            expired_consents,
            anonymized_records,
            last_anonymized_at,
            risk_assessment,
        })
    }

    /// Expire lapsed consents and delete subscribers left without any valid consent.
    pub async fn retention_cleanup(&self) -> GdprResult<RetentionCleanup> {
        let expired: Vec<String> = sqlx::query_scalar(
            r#"UPDATE consent_records SET consent_status = 'expired'
               WHERE consent_status = 'given' AND retention_months IS NOT NULL
                 AND consented_at + make_interval(months => retention_months) < NOW()
               RETURNING lower(email)"#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut result = RetentionCleanup {
            expired_consents: expired.len() as u64,
            ..Default::default()
        };

        let mut emails = expired;
        emails.sort();
        emails.dedup();

        for email in emails {
            let deleted = sqlx::query(
                r#"DELETE FROM subscribers s
                   WHERE lower(s.email) = $1
                     AND NOT EXISTS (
                         SELECT 1 FROM consent_records c
                         WHERE lower(c.email) = $1 AND c.consent_status = 'given'
                           AND (c.retention_months IS NULL
                                OR c.consented_at + make_interval(months => c.retention_months) >= NOW()))"#,
            )
            .bind(&email)
            .execute(&self.pool)
            .await;

            match deleted {
                Ok(outcome) => result.deleted_subscribers += outcome.rows_affected(),
                Err(err) => {
                    log::error!("gdpr: retention cleanup failed for a subscriber: {}", err);
                    result.errors.push(err.to_string());
                }
            }
        }

        log::info!(
            "gdpr: retention cleanup expired {} consents, deleted {} subscribers",
            result.expired_consents,
            result.deleted_subscribers
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn record(status: &str, retention_months: Option<i32>, purposes: &[&str]) -> ConsentRecord {
        ConsentRecord {
            id: 1,
            subscriber_id: None,
            email: "jane@example.com".into(),
            consent_type: "email_marketing".into(),
            consent_status: status.into(),
            consent_method: "double_opt_in".into(),
            legal_basis: "consent".into(),
            purposes: purposes.iter().map(|p| p.to_string()).collect(),
            retention_months,
            ip_address: None,
            user_agent: None,
            consented_at: Utc.with_ymd_and_hms(2024, 1, 31, 0, 0, 0).unwrap(),
            withdrawn_at: None,
            withdrawal_reason: None,
        }
    }

    #[test]
    fn consent_validity_checks_status_expiry_and_purpose() {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        let given = record("given", None, &["newsletter"]);
        assert!(given.is_valid_for(None, now));
        assert!(given.is_valid_for(Some("newsletter"), now));
        assert!(!given.is_valid_for(Some("profiling"), now));

        assert!(!record("withdrawn", None, &[]).is_valid_for(None, now));

        let short = record("given", Some(3), &[]);
        assert!(!short.is_valid_for(None, now));
        let long = record("given", Some(12), &[]);
        assert!(long.is_valid_for(None, now));
    }

    #[test]
    fn expiry_adds_calendar_months() {
        let r = record("given", Some(1), &[]);
        // Jan 31 + 1 month clamps to the end of February.
        assert_eq!(
            r.expires_at(),
            Some(Utc.with_ymd_and_hms(2024, 2, 29, 0, 0, 0).unwrap())
        );
        assert!(record("given", None, &[]).expires_at().is_none());
        let just_after = r.consented_at + Duration::days(30);
        assert!(!r.is_valid_for(None, just_after));
    }

    #[test]
    fn risk_levels() {
        let healthy = assess_risk(RiskInputs {
            total_subscribers: 10,
            active_subscribers: 9,
            ..Default::default()
        });
        assert_eq!(healthy.level, "low");
        assert!(healthy.issues.is_empty());

        let medium = assess_risk(RiskInputs {
            total_subscribers: 10,
            active_subscribers: 2,
            ..Default::default()
        });
        assert_eq!(medium.level, "medium");

        let high = assess_risk(RiskInputs {
            total_subscribers: 10,
            active_subscribers: 2,
            overdue_requests: 1,
            expired_consents: 4,
        });
        assert_eq!(high.level, "high");
        assert_eq!(high.recommendations.len(), 3);
    }

    #[test]
    fn enum_names_match_stored_values() {
        assert_eq!(ConsentType::ThirdPartySharing.as_str(), "third_party_sharing");
        assert_eq!(
            serde_json::to_value(ConsentMethod::DoubleOptIn).unwrap(),
            "double_opt_in"
        );
        assert_eq!(RequestType::WithdrawConsent.as_str(), "withdraw_consent");
    }
}
