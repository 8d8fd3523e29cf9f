//! Hierarchical view over flat listing results.
//!
//! The store has no directory objects; directories exist as `.directory`
//! marker keys or are inferred from deeper keys. `materialize` is a pure
//! function so the classification rules stay independently testable.

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::storage::ObjectInfo;

/// Marker suffix written for empty directories. The bare `.dir` form is a
/// legacy marker: recognized on read, never written.
pub const DIRECTORY_MARKER: &str = ".directory";
pub const LEGACY_MARKER: &str = ".dir";

/// How long after any PUT listings are considered suspect.
pub const CONSISTENCY_WINDOW: Duration = Duration::from_secs(10);
/// How long to let the store settle before re-listing.
pub const SETTLE_DELAY: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
}

#[derive(Debug, Clone)]
pub struct Entry {
    pub name: String,
    pub kind: EntryKind,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

/// Entries living immediately under `prefix` (no trailing slash), derived
/// from the keys sharing that prefix. Duplicate names collapse to one entry;
/// directory classification wins over file.
pub fn materialize(prefix: &str, keys: &[ObjectInfo]) -> Vec<Entry> {
    let mut entries: BTreeMap<String, Entry> = BTreeMap::new();

    for (idx, obj) in keys.iter().enumerate() {
        let Some(rel) = obj.key.strip_prefix(prefix) else {
            continue;
        };
        // Require a segment boundary: prefix "a/b" must not claim "a/bc".
        let Some(rel) = rel.strip_prefix('/') else {
            continue;
        };
        if rel.is_empty() || rel == LEGACY_MARKER || rel == DIRECTORY_MARKER {
            continue;
        }

        let segments: Vec<&str> = rel.split('/').collect();
        match segments.as_slice() {
            [name] => {
                insert(
                    &mut entries,
                    Entry {
                        name: (*name).to_string(),
                        kind: EntryKind::File,
                        size: obj.size,
                        modified: obj.modified,
                    },
                );
            }
            [name, marker] if *marker == DIRECTORY_MARKER => {
                insert(
                    &mut entries,
                    Entry {
                        name: (*name).to_string(),
                        kind: EntryKind::Directory,
                        size: 0,
                        modified: obj.modified,
                    },
                );
            }
            [top, ..] => {
                let child_prefix = format!("{prefix}/{top}/");
                let seen_elsewhere = keys
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != idx && other.key.starts_with(&child_prefix));
                if seen_elsewhere {
                    insert(
                        &mut entries,
                        Entry {
                            name: (*top).to_string(),
                            kind: EntryKind::Directory,
                            size: 0,
                            modified: obj.modified,
                        },
                    );
                }
            }
            [] => {}
        }
    }

    entries.into_values().collect()
}

fn insert(entries: &mut BTreeMap<String, Entry>, entry: Entry) {
    match entries.get_mut(&entry.name) {
        Some(existing) => {
            if existing.kind == EntryKind::File && entry.kind == EntryKind::Directory {
                *existing = entry;
            }
        }
        None => {
            entries.insert(entry.name.clone(), entry);
        }
    }
}

/// The root of a user's view is synthetic: exactly the home entry plus the
/// two managed upload directories, shadowing whatever a LIST would return.
pub fn virtual_root_entries(username: &str) -> Vec<Entry> {
    let now = Some(Utc::now());
    [username, "ledgers", "invoices"]
        .into_iter()
        .map(|name| Entry {
            name: name.to_string(),
            kind: EntryKind::Directory,
            size: 0,
            modified: now,
        })
        .collect()
}

/// Process-wide record of the most recent completed upload. Any OPENDIR
/// inside the window pays the settle delay, regardless of session or prefix.
pub struct UploadClock {
    started: Instant,
    // Milliseconds since `started`, offset by 1; zero means "never".
    last: AtomicU64,
}

impl UploadClock {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            last: AtomicU64::new(0),
        }
    }

    pub fn mark(&self) {
        let now = self.started.elapsed().as_millis() as u64 + 1;
        self.last.store(now, Ordering::SeqCst);
    }

    pub fn recent(&self, window: Duration) -> bool {
        let last = self.last.load(Ordering::SeqCst);
        if last == 0 {
            return false;
        }
        let now = self.started.elapsed().as_millis() as u64 + 1;
        now.saturating_sub(last) <= window.as_millis() as u64
    }
}

impl Default for UploadClock {
    fn default() -> Self {
        Self::new()
    }
}
