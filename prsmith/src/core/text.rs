//! Text capping and secret redaction for logs, snapshots, and titles.

use std::sync::LazyLock;

use regex::Regex;

static SECRET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?x)
        ghp_[A-Za-z0-9]{20,}
        | github_pat_[A-Za-z0-9_]{20,}
        | gh[ousr]_[A-Za-z0-9]{20,}
        | sk-[A-Za-z0-9_-]{16,}
        | x-access-token:[^@\s]+@
        ",
    )
    .expect("secret pattern should compile")
});

/// Keep at most `max` chars, marking the cut with an ellipsis.
pub fn cap_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max.saturating_sub(1)).collect();
    out.push('…');
    out
}

/// Keep the last `max` chars, prefixing a truncation notice when cut.
pub fn tail_chars(text: &str, max: usize) -> String {
    let total = text.chars().count();
    if total <= max {
        return text.to_string();
    }
    let skipped = total - max;
    let tail: String = text.chars().skip(skipped).collect();
    format!("[... {skipped} chars truncated]\n{tail}")
}

/// First non-empty line, trimmed.
pub fn first_line(text: &str) -> &str {
    text.lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .unwrap_or("")
}

/// Replace credential-shaped substrings with `[redacted]`.
pub fn redact_secrets(text: &str) -> String {
    SECRET_RE
        .replace_all(text, |caps: &regex::Captures<'_>| {
            if caps[0].starts_with("x-access-token:") {
                "x-access-token:[redacted]@".to_string()
            } else {
                "[redacted]".to_string()
            }
        })
        .into_owned()
}
