use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::{self, FromRow};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use super::helpers::require_name;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, SubscriberGroup};

/// A group together with the number of subscribers that belong to it.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupWithCount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub group: SubscriberGroup,
    pub subscriber_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupInput {
    pub name: String,
    pub description: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct GroupUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
}

const GROUP_WITH_COUNT: &str = r#"
    SELECT g.id, g.name, g.description, g.created_at,
           (SELECT COUNT(*) FROM subscribers s WHERE g.id = ANY(s.group_ids)) AS subscriber_count
    FROM subscriber_groups g"#;

#[openapi(tag = "Groups")]
#[get("/groups")]
pub async fn list_groups(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
) -> ApiResult<Vec<GroupWithCount>> {
    let sql = format!("{} ORDER BY g.name", GROUP_WITH_COUNT);
    let groups = sqlx::query_as(&sql).fetch_all(pool.inner()).await?;
    Ok(Json(ApiResponse::ok(groups)))
}

#[openapi(tag = "Groups")]
#[get("/groups/<group_id>")]
pub async fn get_group(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    group_id: i32,
) -> ApiResult<GroupWithCount> {
    let sql = format!("{} WHERE g.id = $1", GROUP_WITH_COUNT);
    let group = sqlx::query_as(&sql)
        .bind(group_id)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Group {} not found", group_id)))?;
    Ok(Json(ApiResponse::ok(group)))
}

#[openapi(tag = "Groups")]
#[post("/groups", data = "<request>")]
pub async fn create_group(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    request: Json<GroupInput>,
) -> ApiResult<SubscriberGroup> {
    let name = require_name(&request.name, "Group name")?;
    let group = sqlx::query_as::<_, SubscriberGroup>(
        "INSERT INTO subscriber_groups (name, description) VALUES ($1, $2) \
         RETURNING id, name, description, created_at",
    )
    .bind(name)
    .bind(&request.description)
    .fetch_one(pool.inner())
    .await?;
    Ok(Json(ApiResponse::with_message(group, "Group created")))
}

#[openapi(tag = "Groups")]
#[put("/groups/<group_id>", data = "<request>")]
pub async fn update_group(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    group_id: i32,
    request: Json<GroupUpdate>,
) -> ApiResult<SubscriberGroup> {
    let name = request
        .name
        .as_deref()
        .map(|name| require_name(name, "Group name"))
        .transpose()?;
    let group = sqlx::query_as::<_, SubscriberGroup>(
        r#"UPDATE subscriber_groups
           SET name = COALESCE($2, name), description = COALESCE($3, description)
           WHERE id = $1
           RETURNING id, name, description, created_at"#,
    )
    .bind(group_id)
    .bind(name)
    .bind(&request.description)
    .fetch_optional(pool.inner())
    .await?
    .ok_or_else(|| ApiError::NotFound(format!("Group {} not found", group_id)))?;
    Ok(Json(ApiResponse::with_message(group, "Group updated")))
}

/// Delete a group and drop it from every subscriber's membership list.
#[openapi(tag = "Groups")]
#[delete("/groups/<group_id>")]
pub async fn delete_group(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    group_id: i32,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM subscriber_groups WHERE id = $1")
        .bind(group_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("Group {} not found", group_id)));
    }
    let detached = sqlx::query(
        "UPDATE subscribers SET group_ids = array_remove(group_ids, $1), updated_at = NOW() \
         WHERE $1 = ANY(group_ids)",
    )
    .bind(group_id)
    .execute(&mut *tx)
    .await?
    .rows_affected();
    tx.commit().await?;

    log::info!("group {} deleted, detached from {} subscribers", group_id, detached);
    Ok(Json(ApiResponse::with_message((), "Group deleted")))
}
