//! Heuristic email scoring used while importing rows.
//!
//! Scoring is purely local: no DNS, MX, or reputation lookups.

use regex::Regex;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

const DISPOSABLE_DOMAINS: &[&str] = &[
    "mailinator.com",
    "guerrillamail.com",
    "tempmail.com",
    "throwawaymail.com",
    "10minutemail.com",
    "yopmail.com",
    "temp-mail.org",
    "maildrop.cc",
];

const ROLE_ACCOUNTS: &[&str] = &[
    "admin",
    "info",
    "support",
    "sales",
    "contact",
    "help",
    "service",
    "webmaster",
    "postmaster",
    "hostmaster",
    "abuse",
];

const DOMAIN_TYPOS: &[(&str, &str)] = &[
    ("gmial.com", "gmail.com"),
    ("gamil.com", "gmail.com"),
    ("gmal.com", "gmail.com"),
    ("hotmial.com", "hotmail.com"),
    ("hotmal.com", "hotmail.com"),
    ("yaho.com", "yahoo.com"),
    ("outloo.com", "outlook.com"),
    ("iclou.com", "icloud.com"),
];

const DISPOSABLE_PENALTY: i32 = 30;
const ROLE_ACCOUNT_PENALTY: i32 = 20;
const TYPO_PENALTY: i32 = 25;

/// Scores below this are `risky` even when they clear the job threshold.
pub const RISKY_BELOW: i32 = 80;

/// Outcome recorded for each imported row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum RowStatus {
    Valid,
    Invalid,
    Risky,
    Duplicate,
}

impl RowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            RowStatus::Valid => "valid",
            RowStatus::Invalid => "invalid",
            RowStatus::Risky => "risky",
            RowStatus::Duplicate => "duplicate",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "valid" => Some(RowStatus::Valid),
            "invalid" => Some(RowStatus::Invalid),
            "risky" => Some(RowStatus::Risky),
            "duplicate" => Some(RowStatus::Duplicate),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmailAssessment {
    pub score: i32,
    pub issues: Vec<String>,
    pub suggestion: Option<String>,
}

fn email_regex() -> &'static Regex {
    static EMAIL: OnceLock<Regex> = OnceLock::new();
    EMAIL.get_or_init(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("static email regex"))
}

/// Lower-case and trim an address; `None` when nothing is left.
pub fn normalize_email(raw: &str) -> Option<String> {
    let email = raw.trim().to_lowercase();
    if email.is_empty() { None } else { Some(email) }
}

pub fn is_valid_syntax(email: &str) -> bool {
    email_regex().is_match(email)
}

/// Score an already-normalised address, starting from 100.
pub fn assess_email(email: &str) -> EmailAssessment {
    if !is_valid_syntax(email) {
        return EmailAssessment {
            score: 0,
            issues: vec!["Invalid email syntax".to_string()],
            suggestion: None,
        };
    }

    let mut score = 100;
    let mut issues = Vec::new();
    let mut suggestion = None;

    let (local, domain) = email.rsplit_once('@').unwrap_or((email, ""));

    if DISPOSABLE_DOMAINS.contains(&domain) {
        score -= DISPOSABLE_PENALTY;
        issues.push("Disposable email address".to_string());
    }

    if ROLE_ACCOUNTS.contains(&local) {
        score -= ROLE_ACCOUNT_PENALTY;
        issues.push("Role-based email address".to_string());
    }

    if let Some((_, fixed)) = DOMAIN_TYPOS.iter().find(|(typo, _)| *typo == domain) {
        score -= TYPO_PENALTY;
        issues.push("Possible typo in email address".to_string());
        suggestion = Some(format!("{}@{}", local, fixed));
    }

    EmailAssessment {
        score: score.max(0),
        issues,
        suggestion,
    }
}

/// Map a score onto a row status; duplicates are decided by the caller.
pub fn classify(score: i32, threshold: i32) -> RowStatus {
    if score < threshold {
        RowStatus::Invalid
    } else if score < RISKY_BELOW {
        RowStatus::Risky
    } else {
        RowStatus::Valid
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clean_address_scores_full_marks() {
        let result = assess_email("jane.doe@example.com");
        assert_eq!(result.score, 100);
        assert!(result.issues.is_empty());
        assert_eq!(classify(result.score, 50), RowStatus::Valid);
    }

    #[test]
    fn bad_syntax_is_invalid() {
        for email in ["no-at-sign", "two@@example.com", "a b@example.com", "user@nodot"] {
            let result = assess_email(email);
            assert_eq!(result.score, 0, "{email}");
            assert_eq!(classify(result.score, 50), RowStatus::Invalid);
        }
    }

    #[test]
    fn disposable_domain_is_risky() {
        let result = assess_email("someone@mailinator.com");
        assert_eq!(result.score, 70);
        assert_eq!(classify(result.score, 50), RowStatus::Risky);
    }

    #[test]
    fn role_account_alone_stays_valid() {
        let result = assess_email("info@example.com");
        assert_eq!(result.score, 80);
        assert_eq!(classify(result.score, 50), RowStatus::Valid);
    }

    #[test]
    fn typo_suggests_corrected_domain() {
        let result = assess_email("bob@gmial.com");
        assert_eq!(result.score, 75);
        assert_eq!(result.suggestion.as_deref(), Some("bob@gmail.com"));
        assert_eq!(classify(result.score, 50), RowStatus::Risky);
    }

    #[test]
    fn stacked_penalties_fall_below_threshold() {
        let result = assess_email("admin@mailinator.com");
        assert_eq!(result.score, 50);
        assert_eq!(classify(result.score, 60), RowStatus::Invalid);
        assert_eq!(classify(result.score, 50), RowStatus::Risky);
    }

    #[test]
    fn normalizes_case_and_whitespace() {
        assert_eq!(normalize_email("  Jane@Example.COM "), Some("jane@example.com".into()));
        assert_eq!(normalize_email("   "), None);
    }
}
