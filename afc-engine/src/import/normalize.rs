//! Identity field normalization
//!
//! Matching compares normalized values only, so every value written to a
//! lead's `email` or `phones` goes through here first.

/// Digits only; `+971 (50) 123-4567` becomes `971501234567`
///
/// Idempotent: normalizing an already-normalized number returns it unchanged.
pub fn normalize_phone(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Trimmed and lower-cased; blank becomes None
pub fn normalize_email(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_lowercase())
    }
}

/// Collapse runs of whitespace in a display name
pub fn normalize_name(raw: &str) -> String {
    raw.split_whitespace().collect::<Vec<_>>().join(" ")
}
