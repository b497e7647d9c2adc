//! Names derived from job identity: branches, workspace directories, brain keys.

use sha2::{Digest, Sha256};

/// Branch prefix for every job branch.
pub const BRANCH_PREFIX: &str = "prsmith";

/// Job branch name. `timestamp` is expected as `YYYYmmdd-HHMMSS`.
pub fn branch_name(timestamp: &str, job_id: &str) -> String {
    format!("{BRANCH_PREFIX}/{timestamp}-{job_id}")
}

/// Workspace directory name. Owner and repo are reduced to path-safe
/// characters; the job id keeps the name unique across jobs.
pub fn workspace_dir_name(owner: &str, repo: &str, job_id: &str) -> String {
    format!("{}-{}-{job_id}", path_segment(owner), path_segment(repo))
}

fn path_segment(raw: &str) -> String {
    let cleaned: String = raw
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let trimmed = cleaned.trim_start_matches('.');
    if trimmed.is_empty() {
        "_".to_string()
    } else {
        trimmed.to_string()
    }
}

fn is_safe_key_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ':' | '@' | '-')
}

/// Map a logical brain key onto an object name.
///
/// Characters outside `[A-Za-z0-9._:@-]` become `_`. When that replacement
/// loses information, `~` plus a short SHA-256 digest of the original key is
/// appended. `~` is never produced by a lossless mapping, so distinct keys never
/// share a name. Returns `None` for empty keys.
pub fn sanitize_key(key: &str) -> Option<String> {
    if key.is_empty() {
        return None;
    }
    let mut lossy = false;
    let mut out: String = key
        .chars()
        .map(|c| {
            if is_safe_key_char(c) {
                c
            } else {
                lossy = true;
                '_'
            }
        })
        .collect();
    if out.chars().all(|c| c == '.') {
        lossy = true;
    }
    if lossy {
        let digest = Sha256::digest(key.as_bytes());
        out.push('~');
        out.push_str(&hex::encode(&digest[..6]));
    }
    Some(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_embeds_timestamp_and_job_id() {
        assert_eq!(
            branch_name("20261018-120000", "ab12cd34"),
            "prsmith/20261018-120000-ab12cd34"
        );
    }

    #[test]
    fn workspace_name_is_path_safe() {
        assert_eq!(workspace_dir_name("acme", "web.app", "x1"), "acme-web.app-x1");
        assert_eq!(workspace_dir_name("../..", "r/e", "x1"), "_..-r_e-x1");
    }

    #[test]
    fn safe_keys_map_to_themselves() {
        assert_eq!(
            sanitize_key("slack:C123:1700000000.0001").as_deref(),
            Some("slack:C123:1700000000.0001")
        );
        assert_eq!(sanitize_key("user@host").as_deref(), Some("user@host"));
    }

    #[test]
    fn unsafe_chars_are_replaced_and_disambiguated() {
        let slash = sanitize_key("acme/web").expect("key");
        let underscore = sanitize_key("acme_web").expect("key");
        let space = sanitize_key("acme web").expect("key");
        assert!(slash.starts_with("acme_web~"));
        assert_eq!(underscore, "acme_web");
        assert_ne!(slash, underscore);
        assert_ne!(slash, space);
    }

    #[test]
    fn dot_only_keys_cannot_escape_the_scope_dir() {
        let key = sanitize_key("..").expect("key");
        assert!(key.starts_with("..~"));
    }

    #[test]
    fn empty_key_is_rejected() {
        assert_eq!(sanitize_key(""), None);
    }
}
