//! Shared helper functions for Rocket route handlers.

use rocket_db_pools::sqlx::{self, PgPool};

use crate::error::ApiError;
use crate::import::validation::{is_valid_syntax, normalize_email};

/// Lower-cased address, or 400 when it is not a plausible email.
pub fn require_email(raw: &str) -> Result<String, ApiError> {
    normalize_email(raw)
        .filter(|email| is_valid_syntax(email))
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid email address '{}'", raw.trim())))
}

/// Fail with 400 when any group or segment id does not exist.
pub async fn ensure_membership_ids(
    pool: &PgPool,
    group_ids: &[i32],
    segment_ids: &[i32],
) -> Result<(), ApiError> {
    for (table, ids, label) in [
        ("subscriber_groups", group_ids, "group"),
        ("segments", segment_ids, "segment"),
    ] {
        if ids.is_empty() {
            continue;
        }
        let sql = format!("SELECT id FROM {} WHERE id = ANY($1)", table);
        let found: Vec<i32> = sqlx::query_scalar(&sql).bind(ids).fetch_all(pool).await?;
        if let Some(missing) = ids.iter().find(|id| !found.contains(id)) {
            return Err(ApiError::BadRequest(format!("Unknown {} id {}", label, missing)));
        }
    }
    Ok(())
}

/// Escape `%`, `_` and `\` for use inside an ILIKE pattern.
pub fn escape_like(term: &str) -> String {
    let mut escaped = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// Trimmed name, or 400 when blank.
pub fn require_name(raw: &str, what: &str) -> Result<String, ApiError> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(ApiError::BadRequest(format!("{} is required", what)));
    }
    Ok(name.to_string())
}
