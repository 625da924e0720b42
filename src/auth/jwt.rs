//! HS256 access tokens for the admin API.

use chrono::{DateTime, Duration, Utc};
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::auth::responses::Role;
use crate::auth::{AuthConfig, AuthError, AuthResult};

const CLOCK_SKEW_SECS: u64 = 30;

/// The user a token is minted for, as read from the `users` row.
#[derive(Debug, Clone, Copy)]
pub struct TokenSubject<'a> {
    pub user_id: i32,
    pub email: &'a str,
    pub role: Role,
    pub token_version: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessTokenClaims {
    pub sub: String,
    pub iss: String,
    pub aud: String,
    pub exp: i64,
    pub iat: i64,
    pub jti: String,
    pub email: String,
    pub role: Role,
    pub token_version: i32,
}

impl AccessTokenClaims {
    pub fn user_id(&self) -> AuthResult<i32> {
        self.sub.parse().map_err(|_| AuthError::TokenInvalid)
    }

    /// A token stays valid only while the row still carries the version and
    /// role it was minted with.
    pub fn is_current(&self, token_version: i32, role: Role) -> bool {
        self.token_version == token_version && self.role == role
    }
}

#[derive(Debug, Clone)]
pub struct SignedAccessToken {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

pub struct JwtService {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    issuer: String,
    audience: String,
    access_token_ttl: Duration,
    kid: Option<String>,
}

impl JwtService {
    pub fn from_config(config: &AuthConfig) -> AuthResult<Self> {
        if config.access_token_ttl_secs <= 0 {
            return Err(AuthError::Config(
                "access token TTL must be positive".into(),
            ));
        }
        let secret = config.jwt_secret.as_bytes();

        let mut validation = Validation::new(Algorithm::HS256);
        validation.set_audience(&[config.audience.as_str()]);
        validation.set_issuer(&[config.issuer.as_str()]);
        validation.set_required_spec_claims(&["exp", "sub", "iss", "aud"]);
        validation.leeway = CLOCK_SKEW_SECS;

        Ok(Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
            validation,
            issuer: config.issuer.clone(),
            audience: config.audience.clone(),
            access_token_ttl: Duration::seconds(config.access_token_ttl_secs),
            kid: config.jwt_kid.clone(),
        })
    }

    pub fn issue(&self, subject: TokenSubject<'_>) -> AuthResult<SignedAccessToken> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.access_token_ttl;

        let mut header = Header::new(Algorithm::HS256);
        header.kid = self.kid.clone();

        let claims = AccessTokenClaims {
            sub: subject.user_id.to_string(),
            iss: self.issuer.clone(),
            aud: self.audience.clone(),
            exp: expires_at.timestamp(),
            iat: issued_at.timestamp(),
            jti: Uuid::new_v4().to_string(),
            email: subject.email.to_string(),
            role: subject.role,
            token_version: subject.token_version,
        };

        Ok(SignedAccessToken {
            token: encode(&header, &claims, &self.encoding_key)?,
            expires_at,
        })
    }

    pub fn verify(&self, token: &str) -> AuthResult<AccessTokenClaims> {
        decode::<AccessTokenClaims>(token, &self.decoding_key, &self.validation)
            .map(|data| data.claims)
            .map_err(|err| match err.kind() {
                ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                _ => AuthError::TokenInvalid,
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn subject(role: Role, token_version: i32) -> TokenSubject<'static> {
        TokenSubject {
            user_id: 42,
            email: "editor@example.com",
            role,
            token_version,
        }
    }

    #[test]
    fn verified_claims_carry_the_subject() {
        let service = JwtService::from_config(&AuthConfig::with_secret("s3cret")).unwrap();
        let signed = service.issue(subject(Role::Admin, 3)).unwrap();

        let claims = service.verify(&signed.token).unwrap();
        assert_eq!(claims.user_id().unwrap(), 42);
        assert_eq!(claims.email, "editor@example.com");
        assert_eq!(claims.role, Role::Admin);
        assert_eq!(claims.exp, signed.expires_at.timestamp());
        assert!(claims.is_current(3, Role::Admin));
    }

    #[test]
    fn bumped_version_or_changed_role_makes_claims_stale() {
        let service = JwtService::from_config(&AuthConfig::with_secret("s3cret")).unwrap();
        let claims = service
            .verify(&service.issue(subject(Role::Admin, 0)).unwrap().token)
            .unwrap();
        assert!(!claims.is_current(1, Role::Admin));
        assert!(!claims.is_current(0, Role::User));
    }

    #[test]
    fn foreign_secret_or_audience_is_rejected() {
        let verifier = JwtService::from_config(&AuthConfig::with_secret("shared")).unwrap();

        let other_secret = JwtService::from_config(&AuthConfig::with_secret("other")).unwrap();
        let token = other_secret.issue(subject(Role::User, 0)).unwrap().token;
        assert!(matches!(verifier.verify(&token), Err(AuthError::TokenInvalid)));

        let mut other_audience = AuthConfig::with_secret("shared");
        other_audience.audience = "billing-api".into();
        let foreign = JwtService::from_config(&other_audience).unwrap();
        let token = foreign.issue(subject(Role::User, 0)).unwrap().token;
        assert!(verifier.verify(&token).is_err());
    }

    #[test]
    fn non_positive_ttl_is_a_config_error() {
        let mut config = AuthConfig::with_secret("s3cret");
        config.access_token_ttl_secs = 0;
        assert!(matches!(
            JwtService::from_config(&config),
            Err(AuthError::Config(_))
        ));
    }
}
