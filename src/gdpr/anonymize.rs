//! Irreversible transforms for personal data.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Domain used for erased addresses; `.invalid` can never resolve.
pub const ANONYMIZED_DOMAIN: &str = "anonymized.invalid";
pub const REDACTED: &str = "[REDACTED]";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum AnonymizationMethod {
    #[default]
    Hash,
    Pseudonymize,
    Generalize,
    Suppress,
}

fn sha256_hex(value: &str) -> String {
    Sha256::digest(value.as_bytes())
        .iter()
        .map(|byte| format!("{:02x}", byte))
        .collect()
}

/// First 16 hex characters of the SHA-256 digest.
pub fn hash_value(value: &str) -> String {
    sha256_hex(value)[..16].to_string()
}

/// Stable pseudonym: `pseudo_<8 hex>`.
pub fn pseudonymize_value(value: &str) -> String {
    format!("pseudo_{}", &sha256_hex(value)[..8])
}

/// Coarsen a value while keeping its shape for the given field.
pub fn generalize_value(value: &str, field: &str) -> String {
    match field {
        "email" => match value.split_once('@') {
            Some((_, domain)) if !domain.is_empty() => format!("***@{}", domain),
            _ => "***@***.***".to_string(),
        },
        "phone" => value
            .chars()
            .map(|c| if c.is_ascii_digit() { '*' } else { c })
            .collect(),
        "firstName" | "lastName" => {
            let mut chars = value.chars();
            match chars.next() {
                Some(first) => {
                    let mut out = first.to_string();
                    out.extend(chars.map(|_| '*'));
                    out
                }
                None => String::new(),
            }
        }
        _ => "***".to_string(),
    }
}

pub fn anonymize_value(value: &str, field: &str, method: AnonymizationMethod) -> String {
    match method {
        AnonymizationMethod::Hash => hash_value(value),
        AnonymizationMethod::Pseudonymize => pseudonymize_value(value),
        AnonymizationMethod::Generalize => generalize_value(value, field),
        AnonymizationMethod::Suppress => REDACTED.to_string(),
    }
}

/// Replacement address for an erased subscriber; keeps the unique email column valid.
pub fn anonymized_email(email: &str) -> String {
    format!("{}@{}", hash_value(email), ANONYMIZED_DOMAIN)
}
