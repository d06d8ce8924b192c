// src/lib.rs
// Public library surface for the binary and integration tests.

pub mod config;
pub mod error;
pub mod ingest;
pub mod keywords;
pub mod sentiment;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::error::{Error, Result};
pub use crate::ingest::fetcher::{FeedFetcher, FeedTransport, FetchOutcome, FetchResponse};
pub use crate::ingest::scheduler::{IngestPass, Schedule};
pub use crate::ingest::types::{CacheValidator, Entry, FeedSource, FetchState, ParsedEntry};
pub use crate::ingest::{PassReport, Pipeline, StorePaths};
pub use crate::keywords::KeywordIndex;
pub use crate::sentiment::{LexiconScorer, SentimentScorer, SentimentTagger};
pub use crate::store::EntryStore;
