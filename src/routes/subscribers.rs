use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::{self, Postgres, QueryBuilder};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiResult;
use super::helpers::{ensure_membership_ids, escape_like, require_email};
use super::params::SubscriberListParams;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, Page, SUBSCRIBER_COLUMNS, Subscriber, SubscriberStatus};

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateSubscriber {
    pub email: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    /// Defaults to `active`.
    pub status: Option<SubscriberStatus>,
    #[serde(default)]
    pub group_ids: Vec<i32>,
    #[serde(default)]
    pub segment_ids: Vec<i32>,
    pub custom_fields: Option<Value>,
}

/// Partial update; absent fields are left unchanged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateSubscriber {
    pub email: Option<String>,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub company: Option<String>,
    pub phone: Option<String>,
    pub location: Option<String>,
    pub status: Option<SubscriberStatus>,
    pub group_ids: Option<Vec<i32>>,
    pub segment_ids: Option<Vec<i32>>,
    pub custom_fields: Option<Value>,
}

fn check_custom_fields(value: Option<&Value>) -> Result<(), ApiError> {
    match value {
        Some(value) if !value.is_object() => Err(ApiError::BadRequest(
            "customFields must be a JSON object".into(),
        )),
        _ => Ok(()),
    }
}

fn push_filters(builder: &mut QueryBuilder<'_, Postgres>, params: &SubscriberListParams) {
    builder.push(" WHERE TRUE");

    if let Some(term) = params.query() {
        let pattern = format!("%{}%", escape_like(term));
        builder.push(" AND (");
        let mut columns = builder.separated(" OR ");
        for column in ["email", "first_name", "last_name", "company"] {
            columns.push(format!("{} ILIKE ", column));
            columns.push_bind_unseparated(pattern.clone());
        }
        builder.push(")");
    }
    if let Some(status) = params.status {
        builder.push(" AND status = ").push_bind(status.as_str());
    }
    if let Some(group_id) = params.group_id {
        builder.push(" AND ").push_bind(group_id).push(" = ANY(group_ids)");
    }
    if let Some(segment_id) = params.segment_id {
        builder.push(" AND ").push_bind(segment_id).push(" = ANY(segment_ids)");
    }
}

/// List subscribers with search, status/membership filters and sorting.
#[openapi(tag = "Subscribers")]
#[get("/subscribers?<params..>")]
pub async fn list_subscribers(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    params: SubscriberListParams,
) -> ApiResult<Page<Subscriber>> {
    let pagination = params.pagination();

    let mut list = QueryBuilder::<Postgres>::new(format!("SELECT {} FROM subscribers", SUBSCRIBER_COLUMNS));
    push_filters(&mut list, &params);
    list.push(format!(
        " ORDER BY {col} {dir}, id {dir} LIMIT ",
        col = params.sort_by.sql_column(),
        dir = params.order.sql_keyword()
    ))
    .push_bind(pagination.size())
    .push(" OFFSET ")
    .push_bind(pagination.offset());

    let mut count = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM subscribers");
    push_filters(&mut count, &params);

    let items_query = list.build_query_as::<Subscriber>().fetch_all(pool.inner());
    let count_query = count.build_query_scalar::<i64>().fetch_one(pool.inner());
    let (items, total) = tokio::try_join!(items_query, count_query)?;

    Ok(Json(ApiResponse::ok(Page::new(
        items,
        pagination.page(),
        pagination.size(),
        total,
    ))))
}

#[openapi(tag = "Subscribers")]
#[get("/subscribers/<subscriber_id>")]
pub async fn get_subscriber(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    subscriber_id: i32,
) -> ApiResult<Subscriber> {
    let sql = format!("SELECT {} FROM subscribers WHERE id = $1", SUBSCRIBER_COLUMNS);
    let subscriber = sqlx::query_as(&sql)
        .bind(subscriber_id)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Subscriber {} not found", subscriber_id)))?;
    Ok(Json(ApiResponse::ok(subscriber)))
}

#[openapi(tag = "Subscribers")]
#[post("/subscribers", data = "<request>")]
pub async fn create_subscriber(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    request: Json<CreateSubscriber>,
) -> ApiResult<Subscriber> {
    let request = request.into_inner();
    let email = require_email(&request.email)?;
    check_custom_fields(request.custom_fields.as_ref())?;
    ensure_membership_ids(pool.inner(), &request.group_ids, &request.segment_ids).await?;

    let sql = format!(
        r#"INSERT INTO subscribers
               (email, first_name, last_name, company, phone, location, status,
                group_ids, segment_ids, custom_fields)
           VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
           RETURNING {}"#,
        SUBSCRIBER_COLUMNS
    );
    let subscriber: Subscriber = sqlx::query_as(&sql)
        .bind(&email)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.company)
        .bind(&request.phone)
        .bind(&request.location)
        .bind(request.status.unwrap_or(SubscriberStatus::Active).as_str())
        .bind(&request.group_ids)
        .bind(&request.segment_ids)
        .bind(
            request
                .custom_fields
                .unwrap_or_else(|| Value::Object(Default::default())),
        )
        .fetch_one(pool.inner())
        .await?;

    log::debug!("subscriber {} created", subscriber.id);
    Ok(Json(ApiResponse::with_message(subscriber, "Subscriber created")))
}

#[openapi(tag = "Subscribers")]
#[put("/subscribers/<subscriber_id>", data = "<request>")]
pub async fn update_subscriber(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    subscriber_id: i32,
    request: Json<UpdateSubscriber>,
) -> ApiResult<Subscriber> {
    let request = request.into_inner();
    let email = request.email.as_deref().map(require_email).transpose()?;
    check_custom_fields(request.custom_fields.as_ref())?;
    ensure_membership_ids(
        pool.inner(),
        request.group_ids.as_deref().unwrap_or_default(),
        request.segment_ids.as_deref().unwrap_or_default(),
    )
    .await?;

    let sql = format!(
        r#"UPDATE subscribers
           SET email = COALESCE($2, email),
               first_name = COALESCE($3, first_name),
               last_name = COALESCE($4, last_name),
               company = COALESCE($5, company),
               phone = COALESCE($6, phone),
               location = COALESCE($7, location),
               status = COALESCE($8, status),
               group_ids = COALESCE($9, group_ids),
               segment_ids = COALESCE($10, segment_ids),
               custom_fields = COALESCE($11, custom_fields),
               updated_at = NOW()
           WHERE id = $1
           RETURNING {}"#,
        SUBSCRIBER_COLUMNS
    );
    let subscriber = sqlx::query_as::<_, Subscriber>(&sql)
        .bind(subscriber_id)
        .bind(email)
        .bind(&request.first_name)
        .bind(&request.last_name)
        .bind(&request.company)
        .bind(&request.phone)
        .bind(&request.location)
        .bind(request.status.map(SubscriberStatus::as_str))
        .bind(&request.group_ids)
        .bind(&request.segment_ids)
        .bind(request.custom_fields)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Subscriber {} not found", subscriber_id)))?;

    Ok(Json(ApiResponse::with_message(subscriber, "Subscriber updated")))
}

#[openapi(tag = "Subscribers")]
#[delete("/subscribers/<subscriber_id>")]
pub async fn delete_subscriber(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    subscriber_id: i32,
) -> ApiResult<()> {
    let deleted = sqlx::query("DELETE FROM subscribers WHERE id = $1")
        .bind(subscriber_id)
        .execute(pool.inner())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(format!(
            "Subscriber {} not found",
            subscriber_id
        )));
    }
    Ok(Json(ApiResponse::with_message((), "Subscriber deleted")))
}
