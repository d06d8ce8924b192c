// src/ingest/mod.rs
pub mod fetcher;
pub mod parser;
pub mod scheduler;
pub mod types;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};

use crate::error::{Error, Result};
use crate::ingest::fetcher::{FeedFetcher, FetchOutcome};
use crate::ingest::types::{Entry, FeedSource, ParsedEntry};
use crate::sentiment::SentimentTagger;
use crate::store::EntryStore;

/// One-time metrics registration (so series show up on /metrics).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!(
            "collector_entries_added_total",
            "New entries appended to the store."
        );
        describe_counter!(
            "collector_entries_known_total",
            "Fetched entries already present in the store."
        );
        describe_counter!(
            "collector_entries_rejected_total",
            "Fetched entries missing a mandatory field."
        );
        describe_counter!(
            "collector_feed_errors_total",
            "Feed fetch/parse failures."
        );
        describe_counter!(
            "collector_feed_not_modified_total",
            "Fetches answered with 304 Not Modified."
        );
        describe_counter!("collector_flush_total", "Successful store flushes.");
        describe_counter!("collector_passes_total", "Completed ingestion passes.");
        describe_histogram!("collector_fetch_ms", "Feed fetch time in milliseconds.");
        describe_histogram!("collector_parse_ms", "Feed parse time in milliseconds.");
        describe_gauge!(
            "collector_last_pass_ts",
            "Unix ts when the last ingestion pass finished."
        );
    });
}

/// Normalize text: decode entities, strip tags, ASCII quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Where the pipeline persists the store after each feed.
#[derive(Debug, Clone)]
pub struct StorePaths {
    pub store: PathBuf,
    /// Optional CSV mirror rewritten after every successful flush.
    pub export: Option<PathBuf>,
}

/// Counters for one pass over all feeds.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub feeds: usize,
    pub failed_feeds: usize,
    pub not_modified: usize,
    pub fetched: usize,
    pub added: usize,
    pub known: usize,
    pub rejected: usize,
}

/// The mandatory fields of an entry, checked in this order: title, published, id.
struct Mandatory {
    id: String,
    title: String,
    published: chrono::DateTime<chrono::Utc>,
    author: Option<String>,
    link: Option<String>,
}

fn require_fields(parsed: ParsedEntry) -> Result<Mandatory> {
    Ok(Mandatory {
        title: parsed.title.ok_or(Error::MissingField("title"))?,
        published: parsed.published.ok_or(Error::MissingField("published"))?,
        id: parsed.id.ok_or(Error::MissingField("id"))?,
        author: parsed.author,
        link: parsed.link,
    })
}

pub struct Pipeline {
    sources: Vec<FeedSource>,
    fetcher: FeedFetcher,
    tagger: SentimentTagger,
    store: EntryStore,
    paths: StorePaths,
    concurrency: usize,
}

impl Pipeline {
    pub fn new(
        sources: Vec<FeedSource>,
        fetcher: FeedFetcher,
        tagger: SentimentTagger,
        store: EntryStore,
        paths: StorePaths,
    ) -> Self {
        Self {
            sources,
            fetcher,
            tagger,
            store,
            paths,
            concurrency: 4,
        }
    }

    /// Maximum number of feeds fetched at the same time (at least 1).
    pub fn with_concurrency(mut self, n: usize) -> Self {
        self.concurrency = n.max(1);
        self
    }

    pub fn sources(&self) -> &[FeedSource] {
        &self.sources
    }

    pub fn store(&self) -> &EntryStore {
        &self.store
    }

    /// Dedup, tag and append the entries of one feed, in parser order.
    /// Entry-level problems are logged and counted; only a store invariant
    /// violation (`DuplicateKey`) is returned.
    pub fn ingest_entries(
        &mut self,
        source: &str,
        entries: Vec<ParsedEntry>,
        report: &mut PassReport,
    ) -> Result<()> {
        for parsed in entries {
            let fields = match require_fields(parsed) {
                Ok(fields) => fields,
                Err(e) => {
                    tracing::error!(feed = %source, error = %e, "entry rejected");
                    counter!("collector_entries_rejected_total").increment(1);
                    report.rejected += 1;
                    continue;
                }
            };

            if self.store.contains(source, &fields.id) {
                tracing::debug!(feed = %source, id = %fields.id, "entry already in store");
                counter!("collector_entries_known_total").increment(1);
                report.known += 1;
                continue;
            }

            let tags = self.tagger.tag(&fields.title);
            let entry = Entry {
                source: source.to_string(),
                id: fields.id,
                title: fields.title,
                published: fields.published,
                author: fields.author,
                link: fields.link,
                tags,
            };

            tracing::info!(
                feed = %source,
                id = %entry.id,
                title = %entry.title,
                published = %entry.published,
                keywords = ?entry.tags,
                "new entry added"
            );
            self.store.append(entry)?;
            counter!("collector_entries_added_total").increment(1);
            report.added += 1;
        }
        Ok(())
    }

    /// Persist the store if dirty and refresh the CSV mirror.
    /// A failed write leaves the store dirty so the next feed retries it.
    fn flush(&mut self) -> Result<()> {
        if self.store.flush_if_dirty(&self.paths.store)? {
            counter!("collector_flush_total").increment(1);
            if let Some(export) = &self.paths.export {
                if let Err(e) = self.store.export_csv(export) {
                    tracing::warn!(error = %e, "csv export failed");
                }
            }
        }
        Ok(())
    }

    /// One pass over every configured feed.
    ///
    /// Fetches run concurrently (bounded by `concurrency`), but results are
    /// consumed in configured order by this task alone, so the
    /// contains-then-append step and every flush happen with a single writer.
    pub async fn run_pass(&mut self) -> Result<PassReport> {
        ensure_metrics_described();
        let mut report = PassReport {
            feeds: self.sources.len(),
            ..Default::default()
        };

        let permits = Arc::new(Semaphore::new(self.concurrency));
        let mut pending = Vec::with_capacity(self.sources.len());
        for source in &self.sources {
            let (tx, rx) = oneshot::channel();
            let fetcher = self.fetcher.clone();
            let permits = permits.clone();
            let mut source = source.clone();
            tokio::spawn(async move {
                let _permit = permits.acquire_owned().await.ok();
                let outcome = fetcher.fetch_outcome(&mut source).await;
                let _ = tx.send((source, outcome));
            });
            pending.push(rx);
        }

        for (idx, rx) in pending.into_iter().enumerate() {
            let url = self.sources[idx].url.clone();
            let entries = match rx.await {
                Ok((updated, outcome)) => {
                    self.sources[idx] = updated;
                    match outcome {
                        FetchOutcome::Fresh(entries) => entries,
                        FetchOutcome::NotModified => {
                            report.not_modified += 1;
                            Vec::new()
                        }
                        FetchOutcome::Failed(_) => {
                            report.failed_feeds += 1;
                            Vec::new()
                        }
                    }
                }
                Err(_) => {
                    tracing::warn!(feed = %url, "fetch task ended without a result");
                    report.failed_feeds += 1;
                    Vec::new()
                }
            };

            report.fetched += entries.len();
            self.ingest_entries(&url, entries, &mut report)?;

            if let Err(e) = self.flush() {
                tracing::error!(feed = %url, error = %e, "store flush failed, will retry");
            }
        }

        // last chance for anything a failed per-feed flush left behind
        self.flush()?;

        gauge!("collector_last_pass_ts").set(chrono::Utc::now().timestamp() as f64);
        tracing::info!(
            feeds = report.feeds,
            failed = report.failed_feeds,
            not_modified = report.not_modified,
            fetched = report.fetched,
            added = report.added,
            known = report.known,
            rejected = report.rejected,
            total = self.store.len(),
            "ingestion pass finished"
        );
        Ok(report)
    }
}

#[async_trait::async_trait]
impl scheduler::IngestPass for Pipeline {
    async fn run_pass(&mut self) -> Result<PassReport> {
        Pipeline::run_pass(self).await
    }
}
