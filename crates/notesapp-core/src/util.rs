//! Shared utility functions used across multiple modules.

use std::sync::OnceLock;

use regex::Regex;

const DEFAULT_SITE_URL: &str = "http://localhost:3000/";

/// Normalize optional text by trimming whitespace and removing empties.
///
/// Returns `None` when the input is `None` or the trimmed value is empty.
pub fn normalize_text_option(value: Option<String>) -> Option<String> {
    let value = value?;
    let value = value.trim();
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

/// Check if a string starts with `http://` or `https://`.
pub fn is_http_url(value: &str) -> bool {
    value.starts_with("http://") || value.starts_with("https://")
}

/// Truncate text to at most 180 characters for error messages.
pub fn compact_text(value: &str) -> String {
    value.trim().chars().take(180).collect()
}

/// Current Unix timestamp in seconds.
pub fn unix_timestamp_now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Current Unix timestamp in milliseconds.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Normalize the public site URL used for auth email redirects.
///
/// Missing values fall back to `http://localhost:3000/`. A bare host gets an
/// `https://` scheme and every result ends with a single trailing slash.
pub fn normalize_site_url(value: Option<String>) -> String {
    let url = normalize_text_option(value).unwrap_or_else(|| DEFAULT_SITE_URL.to_string());
    let url = if url.starts_with("http") {
        url
    } else {
        format!("https://{url}")
    };
    if url.ends_with('/') {
        url
    } else {
        format!("{url}/")
    }
}

/// Strip markup tags and collapse whitespace into single spaces.
pub fn strip_markup(value: &str) -> String {
    static TAG_RE: OnceLock<Regex> = OnceLock::new();
    let re = TAG_RE.get_or_init(|| Regex::new(r"<[^>]+>").expect("Invalid regex"));
    re.replace_all(value, " ")
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}
