//! Virtual path <-> object key mapping.
//!
//! Clients see a rooted tree; the store only has flat keys. `/ledgers` and
//! `/invoices` are virtual aliases that pull the user's own subtrees to the
//! root, so upload targets are addressable without knowing the home prefix.

use crate::error::{GatewayError, Result};

/// Normalize a client-supplied path: backslashes become forward slashes,
/// repeated separators collapse, `.` segments drop, `..` resolves. A `..`
/// that would climb above the root is a policy violation, not a no-op.
pub fn normalize(input: &str) -> Result<String> {
    let cleaned = input.replace('\\', "/");
    let mut segments: Vec<&str> = Vec::new();
    for seg in cleaned.split('/') {
        match seg {
            "" | "." => {}
            ".." => {
                if segments.pop().is_none() {
                    return Err(GatewayError::PolicyViolation(format!(
                        "path escapes root: {input}"
                    )));
                }
            }
            other => segments.push(other),
        }
    }
    if segments.is_empty() {
        Ok("/".to_string())
    } else {
        Ok(format!("/{}", segments.join("/")))
    }
}

/// Forward mapping: virtual path under `home_prefix` -> object key.
/// The alias rewrite runs before anything else can see the path, so
/// `/ledgers/...` always lands in the user's own subtree.
pub fn map_virtual_path(home_prefix: &str, virtual_path: &str) -> Result<String> {
    let normalized = normalize(virtual_path)?;
    if normalized == "/" {
        return Ok(home_prefix.to_string());
    }
    for alias in ["/ledgers", "/invoices"] {
        if normalized == alias || normalized.starts_with(&format!("{alias}/")) {
            return Ok(format!("{home_prefix}{normalized}"));
        }
    }
    Ok(format!("{home_prefix}{normalized}"))
}

/// Display name of `key` relative to a directory prefix.
pub fn display_name<'a>(key: &'a str, prefix: &str) -> &'a str {
    key.strip_prefix(prefix)
        .map(|rel| rel.trim_start_matches('/'))
        .unwrap_or(key)
}

/// Last path segment, if the path names one.
pub fn file_name(virtual_path: &str) -> Option<&str> {
    virtual_path.rsplit('/').next().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_roots() {
        assert_eq!(normalize("").unwrap(), "/");
        assert_eq!(normalize(".").unwrap(), "/");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("a/b").unwrap(), "/a/b");
        assert_eq!(normalize("//a///b/").unwrap(), "/a/b");
        assert_eq!(normalize("/a/./b").unwrap(), "/a/b");
        assert_eq!(normalize("/a/b/../c").unwrap(), "/a/c");
    }

    #[test]
    fn normalize_converts_backslashes() {
        assert_eq!(normalize("\\ledgers\\jan.pdf").unwrap(), "/ledgers/jan.pdf");
    }

    #[test]
    fn normalize_rejects_escape_above_root() {
        assert!(normalize("/..").is_err());
        assert!(normalize("/a/../../b").is_err());
    }

    #[test]
    fn aliases_pull_subtrees_into_home() {
        let home = "users/alice";
        assert_eq!(
            map_virtual_path(home, "/ledgers").unwrap(),
            "users/alice/ledgers"
        );
        assert_eq!(
            map_virtual_path(home, "/ledgers/jan.pdf").unwrap(),
            "users/alice/ledgers/jan.pdf"
        );
        assert_eq!(
            map_virtual_path(home, "/invoices/q1/feb.pdf").unwrap(),
            "users/alice/invoices/q1/feb.pdf"
        );
    }

    #[test]
    fn plain_paths_map_under_home() {
        let home = "users/alice";
        assert_eq!(map_virtual_path(home, "/").unwrap(), "users/alice");
        assert_eq!(
            map_virtual_path(home, "/notes.txt").unwrap(),
            "users/alice/notes.txt"
        );
        assert_eq!(
            map_virtual_path(home, "/alice/other/x").unwrap(),
            "users/alice/alice/other/x"
        );
    }

    #[test]
    fn ledgers_prefix_requires_full_segment() {
        // "/ledgersx" is not the alias.
        assert_eq!(
            map_virtual_path("users/alice", "/ledgersx").unwrap(),
            "users/alice/ledgersx"
        );
    }

    #[test]
    fn display_name_strips_prefix() {
        assert_eq!(display_name("users/alice/ledgers/a.pdf", "users/alice/ledgers"), "a.pdf");
        assert_eq!(display_name("users/alice/x", "users/alice/"), "x");
    }

    #[test]
    fn file_name_picks_last_segment() {
        assert_eq!(file_name("/ledgers/jan.pdf"), Some("jan.pdf"));
        assert_eq!(file_name("/"), None);
    }
}
