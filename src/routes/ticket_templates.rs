//! Canned support ticket templates.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiResult;
use super::helpers::require_name;
use super::params::TicketTemplateParams;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, TicketTemplate};

const TEMPLATE_COLUMNS: &str =
    "id, name, category, subject, body, default_priority, fields, is_active, created_at, updated_at";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum TicketPriority {
    Low,
    Medium,
    High,
    Urgent,
}

impl TicketPriority {
    pub fn as_str(self) -> &'static str {
        match self {
            TicketPriority::Low => "low",
            TicketPriority::Medium => "medium",
            TicketPriority::High => "high",
            TicketPriority::Urgent => "urgent",
        }
    }
}

fn default_priority() -> TicketPriority {
    TicketPriority::Medium
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateTicketTemplate {
    pub name: String,
    pub category: String,
    pub subject: String,
    pub body: String,
    #[serde(default = "default_priority")]
    pub default_priority: TicketPriority,
    /// Custom field definitions shown when the template is used.
    pub fields: Option<Value>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateTicketTemplate {
    pub name: Option<String>,
    pub category: Option<String>,
    pub subject: Option<String>,
    pub body: Option<String>,
    pub default_priority: Option<TicketPriority>,
    pub fields: Option<Value>,
    pub is_active: Option<bool>,
}

fn check_fields(fields: Option<&Value>) -> Result<(), ApiError> {
    match fields {
        Some(value) if !value.is_array() => Err(ApiError::BadRequest(
            "fields must be a JSON array".into(),
        )),
        _ => Ok(()),
    }
}

fn optional_name(raw: Option<&str>, what: &str) -> Result<Option<String>, ApiError> {
    raw.map(|value| require_name(value, what)).transpose()
}

#[openapi(tag = "Ticket Templates")]
#[get("/tickets/templates?<params..>")]
pub async fn list_ticket_templates(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    params: TicketTemplateParams,
) -> ApiResult<Vec<TicketTemplate>> {
    let sql = format!(
        r#"SELECT {} FROM ticket_templates
           WHERE (NOT $1 OR is_active)
             AND ($2::text IS NULL OR category = $2)
           ORDER BY category, name"#,
        TEMPLATE_COLUMNS
    );
    let templates = sqlx::query_as(&sql)
        .bind(params.active_only)
        .bind(params.category.as_deref().map(str::trim))
        .fetch_all(pool.inner())
        .await?;
    Ok(Json(ApiResponse::ok(templates)))
}

#[openapi(tag = "Ticket Templates")]
#[get("/tickets/templates/<template_id>")]
pub async fn get_ticket_template(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    template_id: i32,
) -> ApiResult<TicketTemplate> {
    let sql = format!("SELECT {} FROM ticket_templates WHERE id = $1", TEMPLATE_COLUMNS);
    let template = sqlx::query_as(&sql)
        .bind(template_id)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket template {} not found", template_id)))?;
    Ok(Json(ApiResponse::ok(template)))
}

#[openapi(tag = "Ticket Templates")]
#[post("/tickets/templates", data = "<request>")]
pub async fn create_ticket_template(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    request: Json<CreateTicketTemplate>,
) -> ApiResult<TicketTemplate> {
    let request = request.into_inner();
    let name = require_name(&request.name, "Template name")?;
    let category = require_name(&request.category, "Category")?;
    let subject = require_name(&request.subject, "Subject")?;
    check_fields(request.fields.as_ref())?;

    let sql = format!(
        r#"INSERT INTO ticket_templates
               (name, category, subject, body, default_priority, fields, is_active)
           VALUES ($1, $2, $3, $4, $5, $6, $7)
           RETURNING {}"#,
        TEMPLATE_COLUMNS
    );
    // A duplicate name surfaces as 409 through the unique violation mapping.
    let template: TicketTemplate = sqlx::query_as(&sql)
        .bind(name)
        .bind(category)
        .bind(subject)
        .bind(request.body)
        .bind(request.default_priority.as_str())
        .bind(request.fields.unwrap_or_else(|| Value::Array(Vec::new())))
        .bind(request.is_active)
        .fetch_one(pool.inner())
        .await?;

    Ok(Json(ApiResponse::with_message(template, "Ticket template created")))
}

#[openapi(tag = "Ticket Templates")]
#[put("/tickets/templates/<template_id>", data = "<request>")]
pub async fn update_ticket_template(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    template_id: i32,
    request: Json<UpdateTicketTemplate>,
) -> ApiResult<TicketTemplate> {
    let request = request.into_inner();
    let name = optional_name(request.name.as_deref(), "Template name")?;
    let category = optional_name(request.category.as_deref(), "Category")?;
    let subject = optional_name(request.subject.as_deref(), "Subject")?;
    check_fields(request.fields.as_ref())?;

    let sql = format!(
        r#"UPDATE ticket_templates
           SET name = COALESCE($2, name),
               category = COALESCE($3, category),
               subject = COALESCE($4, subject),
               body = COALESCE($5, body),
               default_priority = COALESCE($6, default_priority),
               fields = COALESCE($7, fields),
               is_active = COALESCE($8, is_active),
               updated_at = NOW()
           WHERE id = $1
           RETURNING {}"#,
        TEMPLATE_COLUMNS
    );
    let template = sqlx::query_as::<_, TicketTemplate>(&sql)
        .bind(template_id)
        .bind(name)
        .bind(category)
        .bind(subject)
        .bind(request.body)
        .bind(request.default_priority.map(TicketPriority::as_str))
        .bind(request.fields)
        .bind(request.is_active)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Ticket template {} not found", template_id)))?;

    Ok(Json(ApiResponse::with_message(template, "Ticket template updated")))
}

#[openapi(tag = "Ticket Templates")]
#[delete("/tickets/templates/<template_id>")]
pub async fn delete_ticket_template(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    template_id: i32,
) -> ApiResult<()> {
    let deleted = sqlx::query("DELETE FROM ticket_templates WHERE id = $1")
        .bind(template_id)
        .execute(pool.inner())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(format!(
            "Ticket template {} not found",
            template_id
        )));
    }
    Ok(Json(ApiResponse::with_message((), "Ticket template deleted")))
}
