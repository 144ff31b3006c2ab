//! Query & traversal engine.
//!
//! Backends hand over a raw enumeration below the query's start path (a flat key
//! listing or a directory walk). `reconcile` turns that into the directory-aware result
//! the caller asked for: normalized, segment-matched, depth-limited, placeholder-filtered
//! and deduplicated by path. Security filtering is applied by the caller through
//! `retain_readable` since it needs the principal.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use regex::Regex;

use crate::error::{StorageError, StorageResult};

use super::paths;
use super::types::{DriveItem, Query};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RawKind {
    File,
    Directory,
    /// Zero-byte marker emulating an empty directory on a flat backend.
    Placeholder,
}

/// One entry as enumerated by a backend, before normalization.
#[derive(Debug, Clone, PartialEq)]
pub struct RawEntry {
    pub path: String,
    pub kind: RawKind,
    pub size_bytes: u64,
    pub modified_at: Option<DateTime<Utc>>,
    pub storage_class: Option<String>,
    pub is_restoring: bool,
    pub restore_expires_at: Option<DateTime<Utc>>,
}

impl RawEntry {
    pub fn file(path: &str, size_bytes: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        Self {
            path: path.to_string(),
            kind: RawKind::File,
            size_bytes,
            modified_at,
            storage_class: None,
            is_restoring: false,
            restore_expires_at: None,
        }
    }

    pub fn directory(path: &str, modified_at: Option<DateTime<Utc>>) -> Self {
        Self { kind: RawKind::Directory, ..Self::file(path, 0, modified_at) }
    }

    pub fn placeholder(path: &str) -> Self {
        Self { kind: RawKind::Placeholder, ..Self::file(path, 0, None) }
    }

    /// Classify a flat-store key: a key ending in the separator is a placeholder.
    pub fn from_object_key(key: &str, size_bytes: u64, modified_at: Option<DateTime<Utc>>) -> Self {
        if paths::is_directory_path(key) {
            Self::placeholder(&paths::from_object_key(key))
        } else {
            Self::file(&paths::from_object_key(key), size_bytes, modified_at)
        }
    }

    fn canonical_path(&self) -> String {
        match self.kind {
            RawKind::File => paths::to_file(&self.path),
            RawKind::Directory | RawKind::Placeholder => paths::to_directory(&self.path),
        }
    }

    fn into_item(self, path: String) -> DriveItem {
        DriveItem {
            path,
            is_directory: self.kind != RawKind::File,
            size_bytes: if self.kind == RawKind::File { self.size_bytes } else { 0 },
            modified_at: self.modified_at,
            storage_class: self.storage_class,
            is_restoring: self.is_restoring,
            restore_expires_at: self.restore_expires_at,
        }
    }
}

/// Whole-segment matcher for `Query::search_pattern`. Empty pattern matches everything.
#[derive(Debug, Clone)]
pub struct SegmentMatcher {
    rx: Option<Regex>,
}

impl SegmentMatcher {
    pub fn new(pattern: &str) -> StorageResult<Self> {
        if pattern.is_empty() {
            return Ok(Self { rx: None });
        }
        let rx = Regex::new(&format!("^(?:{})$", pattern))
            .map_err(|e| StorageError::invalid(format!("invalid search pattern '{}': {}", pattern, e)))?;
        Ok(Self { rx: Some(rx) })
    }

    pub fn is_match(&self, segment: &str) -> bool {
        match &self.rx {
            Some(rx) => rx.is_match(segment),
            None => true,
        }
    }
}

/// Result set keyed by canonical path. Real entries replace synthesized directories.
#[derive(Default)]
struct ResultSet {
    items: BTreeMap<String, (DriveItem, bool)>,
}

impl ResultSet {
    fn offer_real(&mut self, item: DriveItem) {
        match self.items.get(&item.path) {
            Some((_, false)) => {}
            _ => { self.items.insert(item.path.clone(), (item, false)); }
        }
    }

    fn offer_synthesized(&mut self, dir: String) {
        if !self.items.contains_key(&dir) {
            let item = DriveItem::directory(&dir);
            self.items.insert(dir, (item, true));
        }
    }

    fn into_items(self) -> Vec<DriveItem> {
        self.items.into_values().map(|(item, _)| item).collect()
    }
}

/// Reconcile a raw enumeration against a query.
///
/// Non-recursive queries return only direct children of the start path; deeper entries
/// contribute their first-level directory instead. Recursive queries return every
/// descendant plus each intermediate directory. The start path itself is never part
/// of its own result. Results are ordered by path. A placeholder always yields its
/// directory; `include_placeholders` only decides whether the marker's own metadata
/// is reported for it.
pub fn reconcile<I>(query: &Query, raw: I) -> StorageResult<Vec<DriveItem>>
where
    I: IntoIterator<Item = RawEntry>,
{
    let start = paths::to_directory(&query.start_path);
    let matcher = SegmentMatcher::new(&query.search_pattern)?;
    let mut out = ResultSet::default();
    let mut seen = 0usize;

    for entry in raw {
        seen += 1;
        let path = entry.canonical_path();
        let Some(rel) = paths::relative_to(&start, &path) else { continue };
        let segs: Vec<&str> = paths::remove_trailing(rel).split(paths::SEPARATOR).collect();
        let depth = segs.len();

        // Intermediate directories between start and the entry
        let ancestors = if query.recursive { depth - 1 } else { depth.min(2) - 1 };
        let mut dir = start.clone();
        for seg in segs.iter().take(ancestors) {
            dir.push_str(seg);
            dir.push(paths::SEPARATOR);
            if matcher.is_match(seg) {
                out.offer_synthesized(dir.clone());
            }
        }

        if depth == 1 || query.recursive {
            if matcher.is_match(segs[depth - 1]) {
                crate::tprintln!("query candidate {}", path);
                // A bare marker still stands for its directory
                if entry.kind == RawKind::Placeholder && !query.include_placeholders {
                    out.offer_synthesized(path);
                } else {
                    out.offer_real(entry.into_item(path));
                }
            }
        }
    }

    let items = out.into_items();
    tracing::debug!(
        target: "drivegate::query",
        "reconcile drive={} start={} recursive={} pattern='{}' raw={} result={}",
        query.drive_id, start, query.recursive, query.search_pattern, seen, items.len()
    );
    Ok(items)
}

/// Drop every item the predicate refuses (used with the security evaluator).
pub fn retain_readable<F>(items: Vec<DriveItem>, mut can_read: F) -> Vec<DriveItem>
where
    F: FnMut(&str) -> bool,
{
    items.into_iter().filter(|item| can_read(&item.path)).collect()
}
