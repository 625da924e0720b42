//! Per-user AI assistant preferences, stored as an opaque JSON object.

use chrono::{DateTime, Utc};
use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::ApiResult;
use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::models::ApiResponse;

const MAX_PREFERENCES_BYTES: usize = 16 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct AiPreferences {
    pub preferences: Value,
    /// Unset until the user saves preferences for the first time.
    pub updated_at: Option<DateTime<Utc>>,
}

fn check_preferences(value: &Value) -> Result<(), ApiError> {
    if !value.is_object() {
        return Err(ApiError::BadRequest(
            "Preferences must be a JSON object".into(),
        ));
    }
    if value.to_string().len() > MAX_PREFERENCES_BYTES {
        return Err(ApiError::BadRequest(format!(
            "Preferences must be smaller than {} bytes",
            MAX_PREFERENCES_BYTES
        )));
    }
    Ok(())
}

#[openapi(tag = "Users")]
#[get("/users/me/ai-preferences")]
pub async fn get_ai_preferences(
    user: AuthUser,
    pool: &State<sqlx::PgPool>,
) -> ApiResult<AiPreferences> {
    let row: Option<(Value, DateTime<Utc>)> = sqlx::query_as(
        "SELECT preferences, updated_at FROM user_ai_preferences WHERE user_id = $1",
    )
    .bind(user.id)
    .fetch_optional(pool.inner())
    .await?;

    let preferences = match row {
        Some((preferences, updated_at)) => AiPreferences {
            preferences,
            updated_at: Some(updated_at),
        },
        None => AiPreferences {
            preferences: Value::Object(Default::default()),
            updated_at: None,
        },
    };
    Ok(Json(ApiResponse::ok(preferences)))
}

/// Replace the caller's preferences.
#[openapi(tag = "Users")]
#[put("/users/me/ai-preferences", data = "<preferences>")]
pub async fn put_ai_preferences(
    user: AuthUser,
    pool: &State<sqlx::PgPool>,
    preferences: Json<Value>,
) -> ApiResult<AiPreferences> {
    let preferences = preferences.into_inner();
    check_preferences(&preferences)?;

    let (preferences, updated_at): (Value, DateTime<Utc>) = sqlx::query_as(
        r#"INSERT INTO user_ai_preferences (user_id, preferences, updated_at)
           VALUES ($1, $2, NOW())
           ON CONFLICT (user_id) DO UPDATE
           SET preferences = EXCLUDED.preferences, updated_at = EXCLUDED.updated_at
           RETURNING preferences, updated_at"#,
    )
    .bind(user.id)
    .bind(preferences)
    .fetch_one(pool.inner())
    .await?;

    Ok(Json(ApiResponse::with_message(
        AiPreferences {
            preferences,
            updated_at: Some(updated_at),
        },
        "Preferences saved",
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn only_objects_are_accepted() {
        assert!(check_preferences(&json!({"tone": "friendly"})).is_ok());
        assert!(check_preferences(&json!(["tone"])).is_err());
        assert!(check_preferences(&json!("friendly")).is_err());
    }

    #[test]
    fn oversized_preferences_are_rejected() {
        let big = "x".repeat(MAX_PREFERENCES_BYTES);
        assert!(check_preferences(&json!({ "notes": big })).is_err());
    }
}
