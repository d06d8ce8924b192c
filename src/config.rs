// src/config.rs
//! Runtime settings (CLI flags, each also readable from the environment)
//! and loading of the feed list.

use clap::Parser;
use std::collections::HashSet;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::ingest::fetcher::{DEFAULT_TIMEOUT, DEFAULT_USER_AGENT};
use crate::ingest::types::FeedSource;

#[derive(Debug, Clone, Parser)]
#[command(version, about = "Poll RSS/Atom feeds and tag new entries with keyword sentiment")]
pub struct Settings {
    /// Canonical entry store (JSON).
    #[arg(long, env = "COLLECTOR_STORE", default_value = "db.json")]
    pub store: PathBuf,

    /// Human-readable CSV mirror, rewritten after every flush.
    #[arg(long, env = "COLLECTOR_EXPORT", default_value = "db.csv")]
    pub export: PathBuf,

    /// Skip writing the CSV mirror.
    #[arg(long, env = "COLLECTOR_NO_EXPORT")]
    pub no_export: bool,

    /// Feed list, one URL per line.
    #[arg(long, env = "COLLECTOR_FEEDS", default_value = "feeds.txt")]
    pub feeds: PathBuf,

    /// Keyword → aliases mapping (JSON or TOML).
    #[arg(long, env = "COLLECTOR_KEYWORDS", default_value = "keywords.json")]
    pub keywords: PathBuf,

    /// Poll interval such as `30s`, `10m`, `1h`, `1d`. Omit to run a single pass.
    #[arg(long, env = "COLLECTOR_INTERVAL", allow_hyphen_values = true)]
    pub interval: Option<String>,

    /// Feeds fetched at the same time.
    #[arg(long, env = "COLLECTOR_CONCURRENCY", default_value_t = 4)]
    pub concurrency: usize,

    /// Per-request timeout in seconds.
    #[arg(long, env = "COLLECTOR_TIMEOUT_SECS", default_value_t = DEFAULT_TIMEOUT.as_secs())]
    pub timeout_secs: u64,

    /// `User-Agent` sent with every feed request.
    #[arg(long, env = "COLLECTOR_USER_AGENT", default_value = DEFAULT_USER_AGENT)]
    pub user_agent: String,

    /// Serve Prometheus metrics on this address.
    #[arg(long, env = "METRICS_ADDR")]
    pub metrics_addr: Option<SocketAddr>,
}

impl Settings {
    pub fn export_path(&self) -> Option<PathBuf> {
        (!self.no_export).then(|| self.export.clone())
    }
}

/// Trailing `/` is appended when missing.
pub fn normalize_feed_url(raw: &str) -> Option<String> {
    let url = raw.trim();
    if url.is_empty() || url.starts_with('#') {
        return None;
    }
    if url.ends_with('/') {
        Some(url.to_string())
    } else {
        Some(format!("{url}/"))
    }
}

/// Parse feed-list text: blank lines and `#` comments are skipped,
/// repeated URLs are kept once in first-seen order.
pub fn parse_feed_list(content: &str) -> Vec<FeedSource> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for line in content.lines() {
        let Some(url) = normalize_feed_url(line) else {
            continue;
        };
        if !seen.insert(url.clone()) {
            tracing::warn!(feed = %url, "duplicate feed url ignored");
            continue;
        }
        out.push(FeedSource::new(url));
    }
    out
}

pub fn load_feeds(path: &Path) -> Result<Vec<FeedSource>> {
    let content = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    Ok(parse_feed_list(&content))
}

/// Like [`load_feeds`], but an unreadable list is logged and yields no feeds.
pub fn load_feeds_or_empty(path: &Path) -> Vec<FeedSource> {
    match load_feeds(path) {
        Ok(feeds) => {
            tracing::info!(path = %path.display(), feeds = feeds.len(), "feeds loaded");
            feeds
        }
        Err(e) => {
            tracing::error!(error = %e, "feed list unusable, no feeds will be polled");
            Vec::new()
        }
    }
}
