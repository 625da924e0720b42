use rocket::http::Status;
use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("account locked")]
    AccountLocked,
    #[error("account disabled")]
    AccountDisabled,
    #[error("token expired")]
    TokenExpired,
    #[error("token invalid")]
    TokenInvalid,
    #[error("unauthorized")]
    Unauthorized,
    #[error("forbidden")]
    Forbidden,
    #[error("configuration error: {0}")]
    Config(String),
    #[error("database error: {0}")]
    Sqlx(#[from] rocket_db_pools::sqlx::Error),
    #[error("jwt error: {0}")]
    Jwt(#[from] jsonwebtoken::errors::Error),
    #[error("argon2 parameter error: {0}")]
    Argon2(String),
    #[error("password hashing error: {0}")]
    PasswordHash(String),
}

impl AuthError {
    pub fn status(&self) -> Status {
        match self {
            AuthError::InvalidCredentials => Status::Unauthorized,
            AuthError::AccountLocked => Status::Locked,
            AuthError::AccountDisabled => Status::Forbidden,
            AuthError::TokenExpired | AuthError::TokenInvalid | AuthError::Unauthorized => {
                Status::Unauthorized
            }
            AuthError::Forbidden => Status::Forbidden,
            AuthError::Jwt(_)
            | AuthError::Config(_)
            | AuthError::Sqlx(_)
            | AuthError::Argon2(_)
            | AuthError::PasswordHash(_) => Status::InternalServerError,
        }
    }
}

impl From<argon2::Error> for AuthError {
    fn from(err: argon2::Error) -> Self {
        AuthError::Argon2(err.to_string())
    }
}

impl From<argon2::password_hash::Error> for AuthError {
    fn from(err: argon2::password_hash::Error) -> Self {
        AuthError::PasswordHash(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_errors_to_http_statuses() {
        assert_eq!(AuthError::InvalidCredentials.status(), Status::Unauthorized);
        assert_eq!(AuthError::AccountLocked.status(), Status::Locked);
        assert_eq!(AuthError::AccountDisabled.status(), Status::Forbidden);
        assert_eq!(AuthError::Config("x".into()).status(), Status::InternalServerError);
    }
}
