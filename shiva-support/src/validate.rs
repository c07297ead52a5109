//! Field-level input sanitizing shared by every service.

use chrono::NaiveDate;
use shiva_core::calendar;
use shiva_core::{ShivaError, ShivaResult};
use validator::{ValidateEmail, ValidateUrl};

pub const NAME_MAX: usize = 200;
pub const EMAIL_MAX: usize = 254;
pub const PHONE_MAX: usize = 40;
pub const ADDRESS_MAX: usize = 500;
pub const DESCRIPTION_MAX: usize = 500;
pub const TEXT_MAX: usize = 2000;
pub const URL_MAX: usize = 1000;

pub const DEFAULT_SERVINGS: i32 = 4;
pub const MAX_SERVINGS: i32 = 50;
pub const MAX_GUEST_COUNT: i32 = 500;

/// Cuts `value` to at most `max` characters without splitting a code point.
pub fn truncate(value: &str, max: usize) -> String {
    match value.char_indices().nth(max) {
        Some((idx, _)) => value[..idx].to_string(),
        None => value.to_string(),
    }
}

/// Trimmed, capped, non-empty text or `None`.
pub fn optional_text(value: Option<&str>, max: usize) -> Option<String> {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| truncate(v, max))
}

pub fn required_text(value: Option<&str>, field: &str, max: usize) -> ShivaResult<String> {
    optional_text(value, max)
        .ok_or_else(|| ShivaError::validation(format!("Missing required field: {}", field)))
}

/// Lowercased, syntactically valid email address.
pub fn required_email(value: Option<&str>, field: &str) -> ShivaResult<String> {
    let email = required_text(value, field, EMAIL_MAX)?.to_lowercase();
    if !email.validate_email() {
        return Err(ShivaError::validation("Please enter a valid email address"));
    }
    Ok(email)
}

/// Empty input clears the link; anything else must be an http(s) URL.
pub fn donation_url(value: Option<&str>) -> ShivaResult<Option<String>> {
    let Some(url) = optional_text(value, URL_MAX) else {
        return Ok(None);
    };
    let lower = url.to_ascii_lowercase();
    if !(lower.starts_with("http://") || lower.starts_with("https://")) || !url.validate_url() {
        return Err(ShivaError::validation("Donation link must be a valid http or https URL"));
    }
    Ok(Some(url))
}

pub fn date(value: Option<&str>, field: &str) -> ShivaResult<NaiveDate> {
    let raw = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ShivaError::validation(format!("Missing required field: {}", field)))?;
    calendar::parse_date(raw).ok_or_else(|| ShivaError::validation("Invalid date format. Use YYYY-MM-DD."))
}

pub fn date_range(start: NaiveDate, end: NaiveDate) -> ShivaResult<()> {
    calendar::validate_range(start, end).map_err(ShivaError::validation)
}

pub fn servings(value: Option<i32>) -> i32 {
    value.unwrap_or(DEFAULT_SERVINGS).clamp(1, MAX_SERVINGS)
}

pub fn guest_count(value: i32) -> i32 {
    value.clamp(0, MAX_GUEST_COUNT)
}

/// Family name reduced for fuzzy comparison: lowercase, the words "the" and
/// "family" dropped, whitespace collapsed.
pub fn normalize_family_name(name: &str) -> String {
    name.to_lowercase()
        .split_whitespace()
        .filter(|w| *w != "the" && *w != "family")
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn family_names_similar(a: &str, b: &str) -> bool {
    let a = normalize_family_name(a);
    let b = normalize_family_name(b);
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a == b || a.contains(&b) || b.contains(&a)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("שלום עולם", 4), "שלום");
        assert_eq!(truncate("short", 100), "short");
    }

    #[test]
    fn blank_optional_text_is_none() {
        assert_eq!(optional_text(Some("   "), 10), None);
        assert_eq!(optional_text(Some("  side door  "), 100).as_deref(), Some("side door"));
        assert_eq!(optional_text(None, 10), None);
    }

    #[test]
    fn emails_are_lowercased_and_checked() {
        assert_eq!(required_email(Some(" Sarah@Example.COM "), "email").unwrap(), "sarah@example.com");
        assert!(matches!(required_email(Some("not-an-email"), "email"), Err(ShivaError::Validation(_))));
        assert!(matches!(required_email(None, "email"), Err(ShivaError::Validation(_))));
    }

    #[test]
    fn donation_url_requires_http_scheme() {
        assert_eq!(donation_url(Some("")).unwrap(), None);
        assert!(donation_url(Some("https://give.example.org/cohen")).unwrap().is_some());
        assert!(donation_url(Some("javascript:alert(1)")).is_err());
        assert!(donation_url(Some("ftp://example.org")).is_err());
    }

    #[test]
    fn servings_default_and_clamp() {
        assert_eq!(servings(None), 4);
        assert_eq!(servings(Some(0)), 1);
        assert_eq!(servings(Some(400)), 50);
        assert_eq!(guest_count(-3), 0);
        assert_eq!(guest_count(9000), 500);
    }

    #[test]
    fn family_name_matching_ignores_filler_words() {
        assert_eq!(normalize_family_name("The  Cohen Family"), "cohen");
        assert!(family_names_similar("The Cohen Family", "cohen"));
        assert!(family_names_similar("Cohen-Levy", "cohen"));
        assert!(!family_names_similar("Katz", "Cohen"));
        assert!(!family_names_similar("The Family", "Cohen"));
    }
}
