use std::ops::DerefMut;

use chrono::{DateTime, Duration, Utc};
use rocket::serde::json::Json;
use rocket::{State, get, post};
use rocket_db_pools::sqlx::{self, Row};
use rocket_okapi::openapi;

use crate::auth::guards::AuthUser;
use crate::auth::responses::{LoginRequest, LoginResponse, LogoutAllResponse, Role, UserSummary};
use crate::auth::jwt::TokenSubject;
use crate::auth::{AuthError, AuthResult, AuthState};
use crate::error::ApiError;
use crate::models::ApiResponse;

type AuthRouteResult<T> = Result<Json<ApiResponse<T>>, ApiError>;

/// Exchange email and password for a bearer token.
#[openapi(tag = "Auth")]
#[post("/auth/login", data = "<payload>")]
pub async fn login(
    state: &State<AuthState>,
    pool: &State<sqlx::PgPool>,
    payload: Json<LoginRequest>,
) -> AuthRouteResult<LoginResponse> {
    let email = payload.email.trim().to_lowercase();
    let password = payload.password.as_str();

    if email.is_empty() || password.is_empty() {
        return Err(ApiError::BadRequest(
            "Email and password are required".into(),
        ));
    }

    let now = Utc::now();
    let mut tx = pool.begin().await?;

    let row = sqlx::query(
        r#"
        SELECT u.id, u.email, u.display_name, u.role, u.token_version, u.disabled,
               cred.password_hash, cred.failed_attempts, cred.locked_until
        FROM users u
        LEFT JOIN local_user_credentials cred ON cred.user_id = u.id
        WHERE lower(u.email) = $1
        FOR UPDATE OF u
        "#,
    )
    .bind(&email)
    .fetch_optional(tx.deref_mut())
    .await?;

    let Some(row) = row else {
        state.password_service.verify_or_decoy(password, None)?;
        return Err(AuthError::InvalidCredentials.into());
    };

    let user_id: i32 = row.try_get("id")?;
    let db_email: String = row.try_get("email")?;
    let display_name: Option<String> = row.try_get("display_name")?;
    let role_str: String = row.try_get("role")?;
    let token_version: i32 = row.try_get("token_version")?;
    let disabled: bool = row.try_get("disabled")?;
    let password_hash: Option<String> = row.try_get("password_hash")?;
    let failed_attempts: Option<i32> = row.try_get("failed_attempts")?;
    let locked_until: Option<DateTime<Utc>> = row.try_get("locked_until")?;

    if disabled {
        return Err(AuthError::AccountDisabled.into());
    }

    if locked_until.is_some_and(|lock_time| lock_time > now) {
        return Err(AuthError::AccountLocked.into());
    }

    let verified = state
        .password_service
        .verify_or_decoy(password, password_hash.as_deref())?;

    if !verified {
        handle_failed_attempt(
            &mut tx,
            state,
            user_id,
            failed_attempts.unwrap_or(0),
            now,
        )
        .await?;
        tx.commit().await?;
        log::info!("failed login for user {}", user_id);
        return Err(AuthError::InvalidCredentials.into());
    }

    sqlx::query(
        "UPDATE local_user_credentials SET failed_attempts = 0, locked_until = NULL WHERE user_id = $1",
    )
    .bind(user_id)
    .execute(tx.deref_mut())
    .await?;

    sqlx::query("UPDATE users SET last_login_at = $1 WHERE id = $2")
        .bind(now)
        .bind(user_id)
        .execute(tx.deref_mut())
        .await?;

    tx.commit().await?;

    let role = Role::parse(&role_str);
    let access_token = state.jwt_service.issue(TokenSubject {
        user_id,
        email: &db_email,
        role,
        token_version,
    })?;

    Ok(Json(ApiResponse::ok(LoginResponse {
        access_token: access_token.token,
        access_token_expires_at: access_token.expires_at,
        user: UserSummary {
            id: user_id,
            email: db_email,
            display_name,
            role,
        },
    })))
}

/// Revoke every outstanding token for the caller.
#[openapi(tag = "Auth")]
#[post("/auth/logout-all")]
pub async fn logout_all(
    pool: &State<sqlx::PgPool>,
    user: AuthUser,
) -> AuthRouteResult<LogoutAllResponse> {
    let token_version = increment_token_version(pool.inner(), user.id).await?;
    log::info!("revoked all tokens for user {}", user.id);
    Ok(Json(ApiResponse::with_message(
        LogoutAllResponse { token_version },
        "All sessions revoked",
    )))
}

/// Describe the authenticated caller.
#[openapi(tag = "Auth")]
#[get("/auth/me")]
pub async fn me(pool: &State<sqlx::PgPool>, user: AuthUser) -> AuthRouteResult<UserSummary> {
    let display_name: Option<String> =
        sqlx::query_scalar("SELECT display_name FROM users WHERE id = $1")
            .bind(user.id)
            .fetch_one(pool.inner())
            .await?;

    Ok(Json(ApiResponse::ok(UserSummary {
        id: user.id,
        email: user.email,
        display_name,
        role: user.role,
    })))
}

async fn handle_failed_attempt(
    tx: &mut sqlx::Transaction<'_, sqlx::Postgres>,
    state: &AuthState,
    user_id: i32,
    failed_attempts: i32,
    now: DateTime<Utc>,
) -> AuthResult<()> {
    let new_attempts = failed_attempts + 1;
    let lock_until = if new_attempts >= state.config.max_failed_attempts {
        Some(now + Duration::seconds(state.config.lockout_secs))
    } else {
        None
    };

    sqlx::query(
        "UPDATE local_user_credentials SET failed_attempts = $1, locked_until = $2 WHERE user_id = $3",
    )
    .bind(new_attempts)
    .bind(lock_until)
    .bind(user_id)
    .execute(tx.deref_mut())
    .await?;

    Ok(())
}

/// Bump the token version, invalidating every token issued before.
pub async fn increment_token_version(pool: &sqlx::PgPool, user_id: i32) -> AuthResult<i32> {
    let version: i32 = sqlx::query_scalar(
        "UPDATE users SET token_version = token_version + 1 WHERE id = $1 RETURNING token_version",
    )
    .bind(user_id)
    .fetch_one(pool)
    .await?;
    Ok(version)
}
