use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx::{self, FromRow};
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiResult;
use super::helpers::require_name;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::{ApiResponse, Segment};

const SEGMENT_COLUMNS: &str = "id, name, description, criteria, created_at";

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentWithCount {
    #[sqlx(flatten)]
    #[serde(flatten)]
    pub segment: Segment,
    pub subscriber_count: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentInput {
    pub name: String,
    pub description: Option<String>,
    /// Free-form rule document; stored as given.
    pub criteria: Option<Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SegmentUpdate {
    pub name: Option<String>,
    pub description: Option<String>,
    pub criteria: Option<Value>,
}

fn check_criteria(criteria: Option<&Value>) -> Result<(), ApiError> {
    match criteria {
        Some(value) if !value.is_object() => Err(ApiError::BadRequest(
            "criteria must be a JSON object".into(),
        )),
        _ => Ok(()),
    }
}

const SEGMENT_WITH_COUNT: &str = r#"
    SELECT sg.id, sg.name, sg.description, sg.criteria, sg.created_at,
           (SELECT COUNT(*) FROM subscribers s WHERE sg.id = ANY(s.segment_ids)) AS subscriber_count
    FROM segments sg"#;

#[openapi(tag = "Segments")]
#[get("/segments")]
pub async fn list_segments(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
) -> ApiResult<Vec<SegmentWithCount>> {
    let sql = format!("{} ORDER BY sg.name", SEGMENT_WITH_COUNT);
    let segments = sqlx::query_as(&sql).fetch_all(pool.inner()).await?;
    Ok(Json(ApiResponse::ok(segments)))
}

#[openapi(tag = "Segments")]
#[get("/segments/<segment_id>")]
pub async fn get_segment(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    segment_id: i32,
) -> ApiResult<SegmentWithCount> {
    let sql = format!("{} WHERE sg.id = $1", SEGMENT_WITH_COUNT);
    let segment = sqlx::query_as(&sql)
        .bind(segment_id)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Segment {} not found", segment_id)))?;
    Ok(Json(ApiResponse::ok(segment)))
}

#[openapi(tag = "Segments")]
#[post("/segments", data = "<request>")]
pub async fn create_segment(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    request: Json<SegmentInput>,
) -> ApiResult<Segment> {
    let request = request.into_inner();
    let name = require_name(&request.name, "Segment name")?;
    check_criteria(request.criteria.as_ref())?;

    let sql = format!(
        "INSERT INTO segments (name, description, criteria) VALUES ($1, $2, $3) RETURNING {}",
        SEGMENT_COLUMNS
    );
    let segment = sqlx::query_as::<_, Segment>(&sql)
        .bind(name)
        .bind(request.description)
        .bind(
            request
                .criteria
                .unwrap_or_else(|| Value::Object(Default::default())),
        )
        .fetch_one(pool.inner())
        .await?;
    Ok(Json(ApiResponse::with_message(segment, "Segment created")))
}

#[openapi(tag = "Segments")]
#[put("/segments/<segment_id>", data = "<request>")]
pub async fn update_segment(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    segment_id: i32,
    request: Json<SegmentUpdate>,
) -> ApiResult<Segment> {
    let request = request.into_inner();
    let name = request
        .name
        .as_deref()
        .map(|name| require_name(name, "Segment name"))
        .transpose()?;
    check_criteria(request.criteria.as_ref())?;

    let sql = format!(
        r#"UPDATE segments
           SET name = COALESCE($2, name),
               description = COALESCE($3, description),
               criteria = COALESCE($4, criteria)
           WHERE id = $1
           RETURNING {}"#,
        SEGMENT_COLUMNS
    );
    let segment = sqlx::query_as::<_, Segment>(&sql)
        .bind(segment_id)
        .bind(name)
        .bind(request.description)
        .bind(request.criteria)
        .fetch_optional(pool.inner())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Segment {} not found", segment_id)))?;
    Ok(Json(ApiResponse::with_message(segment, "Segment updated")))
}

#[openapi(tag = "Segments")]
#[delete("/segments/<segment_id>")]
pub async fn delete_segment(
    _user: AuthUser,
    pool: &State<sqlx::PgPool>,
    segment_id: i32,
) -> ApiResult<()> {
    let mut tx = pool.begin().await?;
    let deleted = sqlx::query("DELETE FROM segments WHERE id = $1")
        .bind(segment_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("Segment {} not found", segment_id)));
    }
    sqlx::query(
        "UPDATE subscribers SET segment_ids = array_remove(segment_ids, $1), updated_at = NOW() \
         WHERE $1 = ANY(segment_ids)",
    )
    .bind(segment_id)
    .execute(&mut *tx)
    .await?;
    tx.commit().await?;

    Ok(Json(ApiResponse::with_message((), "Segment deleted")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn criteria_must_be_an_object() {
        assert!(check_criteria(None).is_ok());
        assert!(check_criteria(Some(&json!({"status": "active"}))).is_ok());
        assert!(check_criteria(Some(&json!("status = active"))).is_err());
    }
}
