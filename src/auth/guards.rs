use rocket::Request;
use rocket::State;
use rocket::http::Status;
use rocket::request::{FromRequest, Outcome};
use rocket_db_pools::sqlx::{self, Row};
use rocket_okapi::request::OpenApiFromRequest;

use crate::auth::responses::Role;
use crate::auth::{AuthError, AuthResult, AuthState};

/// Authenticated caller. The user row is re-read on every request, so role
/// changes, disabling, and token revocation apply immediately.
#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct AuthUser {
    pub id: i32,
    pub email: String,
    pub role: Role,
    pub token_version: i32,
}

impl AuthUser {
    pub fn is_admin(&self) -> bool {
        matches!(self.role, Role::Admin)
    }
}

#[rocket::async_trait]
impl<'r> FromRequest<'r> for AuthUser {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match extract_user(request).await {
            Ok(user) => Outcome::Success(user),
            Err(err) => {
                log::debug!("rejecting request to {}: {}", request.uri(), err);
                Outcome::Error((err.status(), err))
            }
        }
    }
}

#[derive(Debug, Clone, OpenApiFromRequest)]
pub struct RequireAdmin(pub AuthUser);

#[rocket::async_trait]
impl<'r> FromRequest<'r> for RequireAdmin {
    type Error = AuthError;

    async fn from_request(request: &'r Request<'_>) -> Outcome<Self, Self::Error> {
        match AuthUser::from_request(request).await {
            Outcome::Success(user) => {
                if user.is_admin() {
                    Outcome::Success(RequireAdmin(user))
                } else {
                    Outcome::Error((Status::Forbidden, AuthError::Forbidden))
                }
            }
            Outcome::Error(err) => Outcome::Error(err),
            Outcome::Forward(_) => Outcome::Error((Status::Unauthorized, AuthError::Unauthorized)),
        }
    }
}

async fn extract_user(request: &Request<'_>) -> AuthResult<AuthUser> {
    let token = bearer_token_from_request(request)?;

    let auth_state = request
        .guard::<&State<AuthState>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("AuthState missing from state".into()))?;

    let pool = request
        .guard::<&State<sqlx::PgPool>>()
        .await
        .succeeded()
        .ok_or_else(|| AuthError::Config("database pool missing from state".into()))?;

    let claims = auth_state.jwt_service.verify(token)?;
    let user_id = claims.user_id()?;

    let row = sqlx::query("SELECT email, role, token_version, disabled FROM users WHERE id = $1")
        .bind(user_id)
        .fetch_optional(pool.inner())
        .await?
        .ok_or(AuthError::Unauthorized)?;

    if row.try_get::<bool, _>("disabled")? {
        return Err(AuthError::AccountDisabled);
    }

    let email: String = row.try_get("email")?;
    let role = Role::parse(row.try_get::<&str, _>("role")?);
    let token_version: i32 = row.try_get("token_version")?;
    if !claims.is_current(token_version, role) {
        return Err(AuthError::TokenInvalid);
    }

    Ok(AuthUser {
        id: user_id,
        email,
        role,
        token_version,
    })
}

fn bearer_token_from_request<'a>(request: &'a Request<'_>) -> AuthResult<&'a str> {
    let header = request
        .headers()
        .get_one("Authorization")
        .ok_or(AuthError::Unauthorized)?;
    parse_bearer(header).ok_or(AuthError::Unauthorized)
}

fn parse_bearer(header: &str) -> Option<&str> {
    let (scheme, token) = header.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("Bearer") && !token.is_empty() {
        Some(token)
    } else {
        None
    }
}
