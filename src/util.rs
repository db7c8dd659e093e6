use regex::Regex;
use std::sync::OnceLock;

/// Truncate to `max` characters (Unicode-safe), marking the cut with "..."
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }

    let char_count = s.chars().count();
    if char_count <= max {
        return s.to_string();
    }

    if max <= 3 {
        return s.chars().take(max).collect();
    }

    let truncated: String = s.chars().take(max - 3).collect();
    format!("{}...", truncated)
}

fn url_credentials_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?P<scheme>[a-zA-Z][a-zA-Z0-9+.-]*://)[^/@\s]+@").ok())
        .as_ref()
}

/// Strip `user:token@` from any URLs in `text` so it can be logged or stored.
pub fn redact_credentials(text: &str) -> String {
    match url_credentials_pattern() {
        Some(pattern) => pattern.replace_all(text, "${scheme}***@").into_owned(),
        None => text.to_string(),
    }
}
