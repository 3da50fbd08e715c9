use std::sync::OnceLock;

use regex::{Captures, Regex};

pub const REDACTION_TOKEN: &str = "[REDACTED]";

/// Masks credentials that transport and service errors like to echo back.
#[must_use]
pub fn redact_secrets(value: &str) -> String {
    let redacted = bearer_token_regex().replace_all(value, format!("Bearer {REDACTION_TOKEN}"));
    let redacted = api_token_regex().replace_all(&redacted, REDACTION_TOKEN);
    secret_assignment_regex()
        .replace_all(&redacted, |captures: &Captures<'_>| {
            format!("{}{}{REDACTION_TOKEN}", &captures[1], &captures[2])
        })
        .to_string()
}

/// Truncates on character boundaries, marking the cut with `...`.
#[must_use]
pub fn truncate_chars(value: &str, max_chars: usize) -> String {
    let total_chars = value.chars().count();
    if total_chars <= max_chars {
        return value.to_string();
    }

    if max_chars <= 3 {
        return ".".repeat(max_chars);
    }

    let prefix = value.chars().take(max_chars - 3).collect::<String>();
    format!("{prefix}...")
}

fn bearer_token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"(?i)\bbearer\s+[A-Za-z0-9._=\-]{8,}")
            .expect("bearer token regex should compile")
    })
}

fn api_token_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r"\b(?:sk-[A-Za-z0-9_\-]{8,}|ghp_[A-Za-z0-9]{8,})")
            .expect("api token regex should compile")
    })
}

fn secret_assignment_regex() -> &'static Regex {
    static REGEX: OnceLock<Regex> = OnceLock::new();
    REGEX.get_or_init(|| {
        Regex::new(r#"(?i)\b(api[_\-]?key|token|secret|password)\b(\s*[:=]\s*)([^\s,;"']+)"#)
            .expect("secret assignment regex should compile")
    })
}
