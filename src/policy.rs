//! Per-user access policy. Three independent checks gate every request:
//! the path allow-list, the upload file-type rule, and the protected-path
//! rule. All run on normalized virtual paths, before any store call.

/// Virtual directories that only accept PDF uploads and whose layout is
/// system-owned.
const MANAGED_DIRS: [&str; 2] = ["/ledgers", "/invoices"];

#[derive(Debug, Clone)]
pub struct UserPolicy {
    username: String,
    allowed: Vec<String>,
}

impl UserPolicy {
    /// Default allow-list: root plus the managed upload directories.
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            allowed: vec!["/".to_string(), "/ledgers".to_string(), "/invoices".to_string()],
        }
    }

    pub fn with_allowed(username: impl Into<String>, allowed: Vec<String>) -> Self {
        Self {
            username: username.into(),
            allowed,
        }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    /// Whether a normalized virtual path is admitted for this user.
    pub fn admits(&self, path: &str) -> bool {
        for prefix in &self.allowed {
            if path == prefix {
                return true;
            }
            if prefix != "/" && path.starts_with(&format!("{prefix}/")) {
                return true;
            }
        }
        let own = format!("/{}", self.username);
        if path == own || path.starts_with(&format!("{own}/")) {
            return true;
        }
        // Top-level single-segment paths are admitted so root-level drops
        // land inside the user's home.
        path != "/" && path.split('/').count() == 2
    }
}

/// Strip a leading `/<username>` so `/alice/ledgers/x` and `/ledgers/x` are
/// judged by the same rules.
fn strip_user<'a>(path: &'a str, username: &str) -> &'a str {
    let own = format!("/{username}");
    if path == own {
        return "/";
    }
    match path.strip_prefix(&format!("{own}/")) {
        Some(rest) if !rest.is_empty() => {
            // Re-anchor: the remainder is itself a rooted path.
            &path[own.len()..]
        }
        _ => path,
    }
}

/// Whether the path sits inside a managed upload directory (top-level or
/// user-scoped spelling).
pub fn in_managed_dir(path: &str, username: &str) -> bool {
    let p = strip_user(path, username);
    MANAGED_DIRS
        .iter()
        .any(|dir| p.starts_with(&format!("{dir}/")))
}

/// Whether the path *is* a managed directory itself (no filename).
pub fn is_managed_dir(path: &str, username: &str) -> bool {
    let p = strip_user(path, username);
    MANAGED_DIRS.contains(&p)
}

pub fn is_pdf(name: &str) -> bool {
    name.to_ascii_lowercase().ends_with(".pdf")
}

/// Protected paths never move or disappear: the managed directories in both
/// spellings, and their `.directory` markers.
pub fn is_protected(path: &str, username: &str) -> bool {
    let p = strip_user(path, username);
    MANAGED_DIRS
        .iter()
        .any(|dir| p == *dir || p == format!("{dir}/.directory"))
}
