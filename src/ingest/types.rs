// src/ingest/types.rs
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Server-supplied validators that make the next fetch conditional.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheValidator {
    pub etag: Option<String>,
    pub last_modified: Option<String>,
}

impl CacheValidator {
    /// Take any validator the response carried; keep the old value otherwise.
    pub fn update(&mut self, etag: Option<String>, last_modified: Option<String>) {
        if let Some(e) = etag.filter(|s| !s.is_empty()) {
            self.etag = Some(e);
        }
        if let Some(m) = last_modified.filter(|s| !s.is_empty()) {
            self.last_modified = Some(m);
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FetchState {
    #[default]
    Initial,
    Cached,
    Error,
}

/// One configured feed. Only `validator` and `state` change after startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedSource {
    pub url: String,
    pub validator: CacheValidator,
    pub state: FetchState,
}

impl FeedSource {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            validator: CacheValidator::default(),
            state: FetchState::Initial,
        }
    }
}

/// An entry as the feed parser hands it over; any field may be absent.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedEntry {
    pub id: Option<String>,
    pub title: Option<String>,
    pub published: Option<DateTime<Utc>>,
    pub author: Option<String>,
    pub link: Option<String>,
}

/// A stored entry. Unique by `(source, id)`; never modified after creation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entry {
    pub source: String,
    pub id: String,
    pub title: String,
    pub published: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
    /// keyword → compound score; a missing key means "no score recorded".
    #[serde(default)]
    pub tags: BTreeMap<String, f64>,
}
