//! Shared utility functions for the Keymint application.

use axum::http::HeaderMap;

/// Seconds per day, used for validity window arithmetic.
pub const SECONDS_PER_DAY: i64 = 86400;

/// Current Unix time in seconds.
pub fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Extract a Bearer token from the Authorization header.
///
/// Returns the token string without the "Bearer " prefix, or None if
/// the header is missing, malformed, or empty after the prefix.
pub fn extract_bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.strip_prefix("Bearer "))
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
}

/// Mask an activation code for logging.
///
/// Keeps the brand prefix and the first group so log lines stay
/// correlatable without leaking a redeemable code:
/// `KM-A2C4-N8PQ-R7ST-U2VW` becomes `KM-A2C4-…`.
pub fn mask_code(code: &str) -> String {
    let mut parts = code.splitn(3, '-');
    match (parts.next(), parts.next()) {
        (Some(prefix), Some(first)) => format!("{}-{}-…", prefix, first),
        _ => "…".to_string(),
    }
}

/// Cheap structural email check.
///
/// Full RFC validation is not the goal; this rejects obviously malformed
/// input before it reaches storage or an email provider.
pub fn is_valid_email(email: &str) -> bool {
    if email.is_empty() || email.len() > 254 {
        return false;
    }
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
