use argon2::password_hash::SaltString;
use argon2::{
    Algorithm, Argon2, ParamsBuilder, PasswordHash, PasswordHasher, PasswordVerifier, Version,
};
use rand::RngCore;

use crate::auth::{AuthError, AuthResult};

const SALT_LEN: usize = 16;
const MIN_PASSWORD_LEN: usize = 8;
const MAX_PASSWORD_LEN: usize = 1024;

/// Argon2id hashing with OWASP's 19 MiB / 2 pass profile.
#[derive(Clone)]
pub struct PasswordService {
    argon2: Argon2<'static>,
    /// Verified against when the account has no credentials, so unknown
    /// emails cost the same as wrong passwords.
    decoy_hash: String,
}

impl PasswordService {
    pub fn new() -> AuthResult<Self> {
        let params = ParamsBuilder::new()
            .m_cost(19 * 1024)
            .t_cost(2)
            .p_cost(1)
            .build()?;
        let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);
        let decoy_hash = hash_with(&argon2, "decoy-password-never-matches")?;
        Ok(Self { argon2, decoy_hash })
    }

    pub fn hash_password(&self, password: &str) -> AuthResult<String> {
        hash_with(&self.argon2, password)
    }

    pub fn verify_password(&self, password: &str, encoded: &str) -> AuthResult<bool> {
        let parsed = PasswordHash::new(encoded)?;
        match self.argon2.verify_password(password.as_bytes(), &parsed) {
            Ok(()) => Ok(true),
            Err(argon2::password_hash::Error::Password) => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Verify against `encoded`, or burn an equivalent verification and
    /// report a mismatch when there is nothing to check.
    pub fn verify_or_decoy(&self, password: &str, encoded: Option<&str>) -> AuthResult<bool> {
        match encoded {
            Some(encoded) => self.verify_password(password, encoded),
            None => self
                .verify_password(password, &self.decoy_hash)
                .map(|_| false),
        }
    }

    pub fn is_acceptable(password: &str) -> bool {
        (MIN_PASSWORD_LEN..=MAX_PASSWORD_LEN).contains(&password.chars().count())
    }
}

fn hash_with(argon2: &Argon2<'_>, password: &str) -> AuthResult<String> {
    let mut salt_bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut salt_bytes);
    let salt = SaltString::encode_b64(&salt_bytes)?;
    Ok(argon2.hash_password(password.as_bytes(), &salt)?.to_string())
}
