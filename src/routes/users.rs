//! Admin user management.

use rocket::State;
use rocket::serde::json::Json;
use rocket_db_pools::sqlx;
use rocket_okapi::okapi::schemars::JsonSchema;
use rocket_okapi::openapi;
use serde::{Deserialize, Serialize};

use super::ApiResult;
use super::params::PaginationParams;
use crate::auth::passwords::PasswordService;
use crate::auth::responses::Role;
use crate::auth::routes::increment_token_version;
use crate::auth::{AuthState, RequireAdmin};
use crate::error::ApiError;
use crate::import::validation::{is_valid_syntax, normalize_email};
use crate::models::{ApiResponse, Page, UserRecord};

const USER_COLUMNS: &str = "id, email, display_name, role, disabled, created_at, last_login_at";

fn default_role() -> Role {
    Role::User
}

#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateUser {
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
    #[serde(default = "default_role")]
    pub role: Role,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct UpdateUser {
    pub display_name: Option<String>,
    pub role: Option<Role>,
    pub disabled: Option<bool>,
    /// New password; revokes the user's outstanding tokens.
    pub password: Option<String>,
}

fn check_password(password: &str) -> Result<(), ApiError> {
    if PasswordService::is_acceptable(password) {
        Ok(())
    } else {
        Err(ApiError::BadRequest(
            "Password must be at least 8 characters".into(),
        ))
    }
}

async fn fetch_user(pool: &sqlx::PgPool, user_id: i32) -> Result<UserRecord, ApiError> {
    let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
    sqlx::query_as(&sql)
        .bind(user_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", user_id)))
}

#[openapi(tag = "Users")]
#[get("/users?<params..>")]
pub async fn list_users(
    _admin: RequireAdmin,
    pool: &State<sqlx::PgPool>,
    params: PaginationParams,
) -> ApiResult<Page<UserRecord>> {
    let sql = format!(
        "SELECT {} FROM users ORDER BY created_at DESC, id DESC LIMIT $1 OFFSET $2",
        USER_COLUMNS
    );
    let users_query = sqlx::query_as::<_, UserRecord>(&sql)
        .bind(params.size())
        .bind(params.offset())
        .fetch_all(pool.inner());
    let count_query = sqlx::query_scalar::<_, i64>("SELECT COUNT(*) FROM users").fetch_one(pool.inner());

    let (users, total) = tokio::try_join!(users_query, count_query)?;
    Ok(Json(ApiResponse::ok(Page::new(
        users,
        params.page(),
        params.size(),
        total,
    ))))
}

#[openapi(tag = "Users")]
#[get("/users/<user_id>")]
pub async fn get_user(
    _admin: RequireAdmin,
    pool: &State<sqlx::PgPool>,
    user_id: i32,
) -> ApiResult<UserRecord> {
    Ok(Json(ApiResponse::ok(fetch_user(pool.inner(), user_id).await?)))
}

#[openapi(tag = "Users")]
#[post("/users", data = "<request>")]
pub async fn create_user(
    _admin: RequireAdmin,
    auth: &State<AuthState>,
    pool: &State<sqlx::PgPool>,
    request: Json<CreateUser>,
) -> ApiResult<UserRecord> {
    let request = request.into_inner();
    let email = normalize_email(&request.email)
        .filter(|email| is_valid_syntax(email))
        .ok_or_else(|| ApiError::BadRequest("A valid email is required".into()))?;
    check_password(&request.password)?;
    let password_hash = auth.password_service.hash_password(&request.password)?;

    let mut tx = pool.begin().await?;
    let sql = format!(
        "INSERT INTO users (email, display_name, role) VALUES ($1, $2, $3) RETURNING {}",
        USER_COLUMNS
    );
    let user: UserRecord = sqlx::query_as(&sql)
        .bind(&email)
        .bind(request.display_name.as_deref().map(str::trim))
        .bind(request.role.as_str())
        .fetch_one(&mut *tx)
        .await?;
    sqlx::query("INSERT INTO local_user_credentials (user_id, password_hash) VALUES ($1, $2)")
        .bind(user.id)
        .bind(password_hash)
        .execute(&mut *tx)
        .await?;
    tx.commit().await?;

    log::info!("created {} user {}", user.role, user.id);
    Ok(Json(ApiResponse::with_message(user, "User created")))
}

#[openapi(tag = "Users")]
#[put("/users/<user_id>", data = "<request>")]
pub async fn update_user(
    admin: RequireAdmin,
    auth: &State<AuthState>,
    pool: &State<sqlx::PgPool>,
    user_id: i32,
    request: Json<UpdateUser>,
) -> ApiResult<UserRecord> {
    let request = request.into_inner();
    let RequireAdmin(caller) = admin;
    if caller.id == user_id
        && (request.disabled == Some(true) || request.role == Some(Role::User))
    {
        return Err(ApiError::BadRequest(
            "You cannot disable or demote your own account".into(),
        ));
    }

    let password_hash = match request.password.as_deref() {
        Some(password) => {
            check_password(password)?;
            Some(auth.password_service.hash_password(password)?)
        }
        None => None,
    };

    let mut tx = pool.begin().await?;
    let sql = format!(
        r#"UPDATE users
           SET display_name = COALESCE($2, display_name),
               role = COALESCE($3, role),
               disabled = COALESCE($4, disabled)
           WHERE id = $1
           RETURNING {}"#,
        USER_COLUMNS
    );
    let user: UserRecord = sqlx::query_as(&sql)
        .bind(user_id)
        .bind(request.display_name.as_deref().map(str::trim))
        .bind(request.role.map(|role| role.as_str()))
        .bind(request.disabled)
        .fetch_optional(&mut *tx)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("User {} not found", user_id)))?;

    if let Some(hash) = &password_hash {
        sqlx::query(
            r#"INSERT INTO local_user_credentials (user_id, password_hash) VALUES ($1, $2)
               ON CONFLICT (user_id) DO UPDATE
               SET password_hash = EXCLUDED.password_hash, failed_attempts = 0,
                   locked_until = NULL, password_updated_at = NOW()"#,
        )
        .bind(user_id)
        .bind(hash)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;

    if password_hash.is_some() {
        increment_token_version(pool.inner(), user_id).await?;
        log::info!("password reset for user {} by admin {}", user_id, caller.id);
    }

    Ok(Json(ApiResponse::with_message(user, "User updated")))
}

#[openapi(tag = "Users")]
#[delete("/users/<user_id>")]
pub async fn delete_user(
    admin: RequireAdmin,
    pool: &State<sqlx::PgPool>,
    user_id: i32,
) -> ApiResult<()> {
    if admin.0.id == user_id {
        return Err(ApiError::BadRequest("You cannot delete your own account".into()));
    }

    let deleted = sqlx::query("DELETE FROM users WHERE id = $1")
        .bind(user_id)
        .execute(pool.inner())
        .await?
        .rows_affected();
    if deleted == 0 {
        return Err(ApiError::NotFound(format!("User {} not found", user_id)));
    }

    log::info!("user {} deleted by admin {}", user_id, admin.0.id);
    Ok(Json(ApiResponse::with_message((), "User deleted")))
}
