// src/store.rs
//! # Entry Store
//! Append-only, deduplicated collection of collected entries.
//!
//! - Identity is `(source, id)`; `contains` sees entries appended in this run.
//! - `dirty` is true iff something was appended since the last successful flush.
//! - The canonical file is JSON; each row carries only the keyword columns it
//!   matched, so "no column" stays distinct from a recorded score of `0.0`.
//! - A CSV mirror with the union of all keyword columns can be rewritten after a flush.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ingest::types::Entry;

const STORE_VERSION: u32 = 1;
const BASE_COLUMNS: [&str; 6] = ["source", "id", "title", "published", "author", "link"];

#[derive(Debug, Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    /// Union of keyword columns, informational for downstream readers.
    keywords: Vec<&'a str>,
    entries: &'a [Entry],
}

#[derive(Debug, Deserialize)]
struct StoreFile {
    version: u32,
    #[serde(default)]
    entries: Vec<Entry>,
}

#[derive(Debug, Default)]
pub struct EntryStore {
    entries: Vec<Entry>,
    /// source → ids seen for that source
    keys: HashMap<String, HashSet<String>>,
    dirty: bool,
}

impl EntryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Read the store at `path`. A missing file yields an empty store; a file
    /// that exists but does not parse is `CorruptStore` and must stop the caller.
    pub fn load(path: &Path) -> Result<Self> {
        let raw = match fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "creating empty entry store");
                return Ok(Self::new());
            }
            Err(e) => return Err(Error::io(path, e)),
        };

        let corrupt = |reason: String| Error::CorruptStore {
            path: path.to_path_buf(),
            reason,
        };

        let file: StoreFile = serde_json::from_slice(&raw).map_err(|e| corrupt(e.to_string()))?;
        if file.version != STORE_VERSION {
            return Err(corrupt(format!("unsupported store version {}", file.version)));
        }

        let mut store = Self::new();
        for entry in file.entries {
            if !store.insert_key(&entry.source, &entry.id) {
                return Err(corrupt(format!(
                    "duplicate entry ({}, {})",
                    entry.source, entry.id
                )));
            }
            store.entries.push(entry);
        }

        tracing::info!(path = %path.display(), entries = store.len(), "entry store loaded");
        Ok(store)
    }

    pub fn contains(&self, source: &str, id: &str) -> bool {
        self.keys.get(source).is_some_and(|ids| ids.contains(id))
    }

    /// Add a new entry and mark the store dirty.
    pub fn append(&mut self, entry: Entry) -> Result<()> {
        if !self.insert_key(&entry.source, &entry.id) {
            return Err(Error::DuplicateKey {
                source_url: entry.source,
                id: entry.id,
            });
        }
        self.entries.push(entry);
        self.dirty = true;
        Ok(())
    }

    /// Persist all entries to `path` if anything was appended since the last
    /// successful flush. Returns whether a write happened. On error the store stays dirty.
    pub fn flush_if_dirty(&mut self, path: &Path) -> Result<bool> {
        if !self.dirty {
            return Ok(false);
        }
        let file = StoreFileRef {
            version: STORE_VERSION,
            keywords: self.keyword_columns().into_iter().collect(),
            entries: &self.entries,
        };
        let bytes = serde_json::to_vec(&file).map_err(|e| {
            Error::io(path, std::io::Error::new(std::io::ErrorKind::InvalidData, e))
        })?;
        write_atomic(path, &bytes)?;
        self.dirty = false;
        tracing::debug!(path = %path.display(), entries = self.len(), "entry store flushed");
        Ok(true)
    }

    /// Rewrite the human-readable CSV mirror at `path`.
    pub fn export_csv(&self, path: &Path) -> Result<()> {
        let keywords: Vec<&str> = self.keyword_columns().into_iter().collect();
        let mut out = String::new();

        let header: Vec<&str> = BASE_COLUMNS.iter().copied().chain(keywords.iter().copied()).collect();
        push_csv_row(&mut out, header.iter().map(|s| s.to_string()));

        for e in &self.entries {
            let base = [
                e.source.clone(),
                e.id.clone(),
                e.title.clone(),
                e.published.to_rfc3339(),
                e.author.clone().unwrap_or_default(),
                e.link.clone().unwrap_or_default(),
            ];
            let tags = keywords
                .iter()
                .map(|k| e.tags.get(*k).map(|v| v.to_string()).unwrap_or_default());
            push_csv_row(&mut out, base.into_iter().chain(tags));
        }

        write_atomic(path, out.as_bytes())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub fn entries(&self) -> &[Entry] {
        &self.entries
    }

    pub fn get(&self, source: &str, id: &str) -> Option<&Entry> {
        if !self.contains(source, id) {
            return None;
        }
        self.entries.iter().find(|e| e.source == source && e.id == id)
    }

    /// Union of every keyword that has a score on at least one entry.
    pub fn keyword_columns(&self) -> BTreeSet<&str> {
        self.entries
            .iter()
            .flat_map(|e| e.tags.keys().map(String::as_str))
            .collect()
    }

    fn insert_key(&mut self, source: &str, id: &str) -> bool {
        self.keys
            .entry(source.to_string())
            .or_default()
            .insert(id.to_string())
    }
}

/// Write to a sibling temp file, then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| Error::io(parent, e))?;
    }
    let tmp = tmp_path(path);
    fs::write(&tmp, bytes).map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_os_string())
        .unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn push_csv_row(out: &mut String, cells: impl Iterator<Item = String>) {
    for (i, cell) in cells.enumerate() {
        if i > 0 {
            out.push(',');
        }
        if cell.contains([',', '"', '\n', '\r']) {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(&cell);
        }
    }
    out.push('\n');
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use std::collections::BTreeMap;

    fn entry(source: &str, id: &str, tags: &[(&str, f64)]) -> Entry {
        Entry {
            source: source.into(),
            id: id.into(),
            title: format!("title {id}"),
            published: Utc.with_ymd_and_hms(2025, 1, 2, 3, 4, 5).unwrap(),
            author: None,
            link: None,
            tags: tags
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    #[test]
    fn append_tracks_keys_and_dirty_flag() {
        let mut store = EntryStore::new();
        assert!(!store.is_dirty());
        store.append(entry("https://a/", "1", &[])).unwrap();
        assert!(store.is_dirty());
        assert!(store.contains("https://a/", "1"));
        assert!(!store.contains("https://b/", "1"));
        assert!(!store.contains("https://a/", "2"));
    }

    #[test]
    fn duplicate_append_is_rejected() {
        let mut store = EntryStore::new();
        store.append(entry("https://a/", "1", &[])).unwrap();
        let err = store.append(entry("https://a/", "1", &[])).unwrap_err();
        assert!(matches!(err, Error::DuplicateKey { .. }));
        assert_eq!(store.len(), 1);
        // same id from another source is a different entry
        store.append(entry("https://b/", "1", &[])).unwrap();
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn flush_only_when_dirty_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        let mut store = EntryStore::new();
        assert!(!store.flush_if_dirty(&path).unwrap());
        assert!(!path.exists());

        store.append(entry("https://a/", "1", &[("Bitcoin", 0.5)])).unwrap();
        assert!(store.flush_if_dirty(&path).unwrap());
        assert!(!store.is_dirty());
        assert!(!store.flush_if_dirty(&path).unwrap());

        let loaded = EntryStore::load(&path).unwrap();
        assert_eq!(loaded.entries(), store.entries());
        assert!(!loaded.is_dirty());
        assert!(loaded.contains("https://a/", "1"));
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().unwrap();
        let store = EntryStore::load(&dir.path().join("nope.json")).unwrap();
        assert!(store.is_empty());
    }

    #[test]
    fn unreadable_store_is_corrupt_not_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");

        fs::write(&path, b"{ this is not json").unwrap();
        assert!(matches!(
            EntryStore::load(&path),
            Err(Error::CorruptStore { .. })
        ));

        fs::write(&path, b"").unwrap();
        assert!(matches!(
            EntryStore::load(&path),
            Err(Error::CorruptStore { .. })
        ));
    }

    #[test]
    fn duplicate_rows_on_disk_are_corrupt() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.json");
        let row = r#"{"source":"s","id":"1","title":"t","published":"2025-01-01T00:00:00Z","tags":{}}"#;
        fs::write(&path, format!(r#"{{"version":1,"entries":[{row},{row}]}}"#)).unwrap();
        assert!(matches!(
            EntryStore::load(&path),
            Err(Error::CorruptStore { .. })
        ));
    }

    #[test]
    fn failed_flush_keeps_dirty() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        fs::write(&blocker, b"x").unwrap();
        let path = blocker.join("db.json");

        let mut store = EntryStore::new();
        store.append(entry("https://a/", "1", &[])).unwrap();
        assert!(matches!(store.flush_if_dirty(&path), Err(Error::Io { .. })));
        assert!(store.is_dirty());
    }

    #[test]
    fn csv_has_union_columns_with_empty_cells() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("db.csv");

        let mut store = EntryStore::new();
        store
            .append(entry("https://a/", "1", &[("A", 0.25), ("B", 0.25)]))
            .unwrap();
        store.append(entry("https://a/", "2", &[("C", 0.0)])).unwrap();
        store.export_csv(&path).unwrap();

        let csv = fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "source,id,title,published,author,link,A,B,C");
        assert!(lines[1].ends_with(",0.25,0.25,"));
        assert!(lines[2].ends_with(",,,0"));
    }

    #[test]
    fn csv_quotes_special_cells() {
        let mut out = String::new();
        push_csv_row(
            &mut out,
            ["plain", "a,b", "say \"hi\""].iter().map(|s| s.to_string()),
        );
        assert_eq!(out, "plain,\"a,b\",\"say \"\"hi\"\"\"\n");
    }
}
