use crate::auth::{AuthError, AuthResult};

/// Authentication configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub issuer: String,
    pub audience: String,
    pub access_token_ttl_secs: i64,
    pub jwt_secret: String,
    pub jwt_kid: Option<String>,
    pub max_failed_attempts: i32,
    pub lockout_secs: i64,
}

impl AuthConfig {
    pub fn from_env() -> AuthResult<Self> {
        let issuer =
            std::env::var("MARKETING_JWT_ISSUER").unwrap_or_else(|_| "http://localhost".into());
        let audience =
            std::env::var("MARKETING_JWT_AUDIENCE").unwrap_or_else(|_| "marketing-api".into());
        let access_token_ttl_secs = std::env::var("MARKETING_ACCESS_TOKEN_TTL_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(60 * 60);
        let jwt_secret = std::env::var("MARKETING_JWT_SECRET")
            .ok()
            .filter(|secret| !secret.trim().is_empty())
            .ok_or_else(|| AuthError::Config("MARKETING_JWT_SECRET is required".into()))?;
        let jwt_kid = std::env::var("MARKETING_JWT_KID").ok();
        let max_failed_attempts = std::env::var("MARKETING_MAX_FAILED_LOGINS")
            .ok()
            .and_then(|v| v.parse::<i32>().ok())
            .unwrap_or(5);
        let lockout_secs = std::env::var("MARKETING_LOCKOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<i64>().ok())
            .unwrap_or(5 * 60);

        Ok(Self {
            issuer,
            audience,
            access_token_ttl_secs,
            jwt_secret,
            jwt_kid,
            max_failed_attempts,
            lockout_secs,
        })
    }

    /// Configuration with a fixed secret, for tests and local tooling.
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            issuer: "http://localhost".into(),
            audience: "marketing-api".into(),
            access_token_ttl_secs: 60 * 60,
            jwt_secret: secret.into(),
            jwt_kid: None,
            max_failed_attempts: 5,
            lockout_secs: 5 * 60,
        }
    }
}
