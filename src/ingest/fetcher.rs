// src/ingest/fetcher.rs
//! Conditional feed fetching.
//!
//! Per source: `Initial` → `Cached` on a 200 that parses or on a 304;
//! anything else → `Error`. Validators are never cleared, only replaced by
//! values the server actually sent, so a failed fetch still benefits from
//! caching on the next pass.

use async_trait::async_trait;
use metrics::{counter, histogram};
use reqwest::header::{HeaderName, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
use reqwest::StatusCode;
use std::sync::Arc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::ingest::parser::parse_feed;
use crate::ingest::types::{CacheValidator, FeedSource, FetchState, ParsedEntry};

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_USER_AGENT: &str =
    concat!("feed-sentiment-collector/", env!("CARGO_PKG_VERSION"));

/// What came back from the wire, before any feed parsing.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FetchResponse {
    pub status: u16,
    pub etag: Option<String>,
    pub last_modified: Option<String>,
    pub body: Vec<u8>,
}

#[async_trait]
pub trait FeedTransport: Send + Sync {
    /// Issue a GET carrying whichever validators are present.
    async fn get(&self, url: &str, validator: &CacheValidator) -> Result<FetchResponse>;
}

/// `reqwest`-backed transport with a fixed per-request timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(user_agent)
            .build()
            .map_err(|e| Error::Network {
                url: String::new(),
                reason: format!("building http client: {e}"),
            })?;
        Ok(Self { client })
    }
}

fn map_reqwest_err(url: &str, e: reqwest::Error) -> Error {
    if e.is_timeout() {
        Error::Timeout { url: url.to_string() }
    } else {
        Error::Network {
            url: url.to_string(),
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl FeedTransport for HttpTransport {
    async fn get(&self, url: &str, validator: &CacheValidator) -> Result<FetchResponse> {
        let mut req = self.client.get(url);
        if let Some(etag) = validator.etag.as_deref() {
            req = req.header(IF_NONE_MATCH, etag);
        }
        if let Some(modified) = validator.last_modified.as_deref() {
            req = req.header(IF_MODIFIED_SINCE, modified);
        }

        let resp = req.send().await.map_err(|e| map_reqwest_err(url, e))?;
        let status = resp.status();
        let header = |name: HeaderName| {
            resp.headers()
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };
        let etag = header(ETAG);
        let last_modified = header(LAST_MODIFIED);

        let body = if status == StatusCode::OK {
            resp.bytes()
                .await
                .map_err(|e| map_reqwest_err(url, e))?
                .to_vec()
        } else {
            Vec::new()
        };

        Ok(FetchResponse {
            status: status.as_u16(),
            etag,
            last_modified,
            body,
        })
    }
}

/// Result of one fetch attempt, after the state machine has run.
#[derive(Debug)]
pub enum FetchOutcome {
    Fresh(Vec<ParsedEntry>),
    NotModified,
    Failed(Error),
}

impl FetchOutcome {
    pub fn into_entries(self) -> Vec<ParsedEntry> {
        match self {
            FetchOutcome::Fresh(entries) => entries,
            FetchOutcome::NotModified | FetchOutcome::Failed(_) => Vec::new(),
        }
    }
}

#[derive(Clone)]
pub struct FeedFetcher {
    transport: Arc<dyn FeedTransport>,
}

impl FeedFetcher {
    pub fn new(transport: Arc<dyn FeedTransport>) -> Self {
        Self { transport }
    }

    /// Fetcher over real HTTP.
    pub fn http(timeout: Duration, user_agent: &str) -> Result<Self> {
        Ok(Self::new(Arc::new(HttpTransport::new(timeout, user_agent)?)))
    }

    /// Fetch and parse `source`, updating its validators and state.
    /// Failures are logged and come back as an empty sequence.
    pub async fn fetch(&self, source: &mut FeedSource) -> Vec<ParsedEntry> {
        self.fetch_outcome(source).await.into_entries()
    }

    pub async fn fetch_outcome(&self, source: &mut FeedSource) -> FetchOutcome {
        let t0 = std::time::Instant::now();
        let result = self.transport.get(&source.url, &source.validator).await;
        histogram!("collector_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

        let outcome = match result {
            Ok(resp) if resp.status == StatusCode::NOT_MODIFIED.as_u16() => {
                source.validator.update(resp.etag, resp.last_modified);
                source.state = FetchState::Cached;
                counter!("collector_feed_not_modified_total").increment(1);
                FetchOutcome::NotModified
            }
            Ok(resp) if resp.status == StatusCode::OK.as_u16() => match parse_feed(&resp.body) {
                Ok(entries) => {
                    // commit validators only for a body we could use
                    source.validator.update(resp.etag, resp.last_modified);
                    source.state = FetchState::Cached;
                    FetchOutcome::Fresh(entries)
                }
                Err(e) => FetchOutcome::Failed(e),
            },
            Ok(resp) => FetchOutcome::Failed(Error::HttpStatus {
                url: source.url.clone(),
                status: resp.status,
            }),
            Err(e) => FetchOutcome::Failed(e),
        };

        match &outcome {
            FetchOutcome::Fresh(entries) => {
                tracing::info!(feed = %source.url, entries = entries.len(), "fetched feed");
                tracing::debug!(
                    feed = %source.url,
                    etag = ?source.validator.etag,
                    last_modified = ?source.validator.last_modified,
                    "cache validators"
                );
            }
            FetchOutcome::NotModified => {
                tracing::debug!(feed = %source.url, "feed not modified");
            }
            FetchOutcome::Failed(e) => {
                source.state = FetchState::Error;
                counter!("collector_feed_errors_total").increment(1);
                tracing::warn!(feed = %source.url, error = %e, "feed fetch failed");
            }
        }

        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    const RSS_ONE: &str = r#"<rss version="2.0"><channel>
<item><title>One</title><guid>1</guid><pubDate>Tue, 10 Jun 2025 14:30:00 +0000</pubDate></item>
</channel></rss>"#;

    /// Replays canned responses and records the validators it was sent.
    struct Scripted {
        responses: Mutex<Vec<Result<FetchResponse>>>,
        seen: Mutex<Vec<CacheValidator>>,
    }

    impl Scripted {
        fn new(mut responses: Vec<Result<FetchResponse>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                seen: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl FeedTransport for Scripted {
        async fn get(&self, _url: &str, validator: &CacheValidator) -> Result<FetchResponse> {
            self.seen.lock().unwrap().push(validator.clone());
            self.responses
                .lock()
                .unwrap()
                .pop()
                .expect("no scripted response left")
        }
    }

    fn ok(body: &str, etag: Option<&str>, modified: Option<&str>) -> Result<FetchResponse> {
        Ok(FetchResponse {
            status: 200,
            etag: etag.map(String::from),
            last_modified: modified.map(String::from),
            body: body.as_bytes().to_vec(),
        })
    }

    fn status(code: u16, etag: Option<&str>) -> Result<FetchResponse> {
        Ok(FetchResponse {
            status: code,
            etag: etag.map(String::from),
            ..Default::default()
        })
    }

    #[tokio::test]
    async fn first_fetch_is_unconditional_then_cached() {
        let t = Scripted::new(vec![
            ok(RSS_ONE, Some("\"v1\""), Some("Tue, 10 Jun 2025 14:30:00 GMT")),
            status(304, None),
        ]);
        let fetcher = FeedFetcher::new(t.clone());
        let mut src = FeedSource::new("https://feed.test/");
        assert_eq!(src.state, FetchState::Initial);

        let entries = fetcher.fetch(&mut src).await;
        assert_eq!(entries.len(), 1);
        assert_eq!(src.state, FetchState::Cached);
        assert_eq!(src.validator.etag.as_deref(), Some("\"v1\""));

        let entries = fetcher.fetch(&mut src).await;
        assert!(entries.is_empty());
        assert_eq!(src.state, FetchState::Cached);
        // 304 without headers keeps both validators
        assert_eq!(src.validator.etag.as_deref(), Some("\"v1\""));
        assert_eq!(
            src.validator.last_modified.as_deref(),
            Some("Tue, 10 Jun 2025 14:30:00 GMT")
        );

        let seen = t.seen.lock().unwrap();
        assert_eq!(seen[0], CacheValidator::default());
        assert_eq!(seen[1].etag.as_deref(), Some("\"v1\""));
    }

    #[tokio::test]
    async fn not_modified_updates_only_present_headers() {
        let t = Scripted::new(vec![
            ok(RSS_ONE, Some("\"v1\""), Some("Mon, 09 Jun 2025 00:00:00 GMT")),
            status(304, Some("\"v2\"")),
        ]);
        let fetcher = FeedFetcher::new(t);
        let mut src = FeedSource::new("https://feed.test/");
        fetcher.fetch(&mut src).await;
        let outcome = fetcher.fetch_outcome(&mut src).await;
        assert!(matches!(outcome, FetchOutcome::NotModified));
        assert_eq!(src.validator.etag.as_deref(), Some("\"v2\""));
        assert_eq!(
            src.validator.last_modified.as_deref(),
            Some("Mon, 09 Jun 2025 00:00:00 GMT")
        );
    }

    #[tokio::test]
    async fn failures_keep_validators_and_enter_error() {
        let t = Scripted::new(vec![
            ok(RSS_ONE, Some("\"v1\""), None),
            Err(Error::Timeout {
                url: "https://feed.test/".into(),
            }),
            status(500, Some("\"bogus\"")),
            ok("<html>not a feed</html>", Some("\"broken\""), None),
        ]);
        let fetcher = FeedFetcher::new(t.clone());
        let mut src = FeedSource::new("https://feed.test/");
        fetcher.fetch(&mut src).await;

        for _ in 0..3 {
            let outcome = fetcher.fetch_outcome(&mut src).await;
            assert!(matches!(outcome, FetchOutcome::Failed(_)));
            assert_eq!(src.state, FetchState::Error);
            assert_eq!(src.validator.etag.as_deref(), Some("\"v1\""));
        }

        // every retry went out with the original validator
        let seen = t.seen.lock().unwrap();
        assert!(seen[1..].iter().all(|v| v.etag.as_deref() == Some("\"v1\"")));
    }

    #[tokio::test]
    async fn error_state_recovers_on_success() {
        let t = Scripted::new(vec![status(503, None), ok(RSS_ONE, None, None)]);
        let fetcher = FeedFetcher::new(t);
        let mut src = FeedSource::new("https://feed.test/");
        assert!(fetcher.fetch(&mut src).await.is_empty());
        assert_eq!(src.state, FetchState::Error);
        assert_eq!(fetcher.fetch(&mut src).await.len(), 1);
        assert_eq!(src.state, FetchState::Cached);
        assert_eq!(src.validator, CacheValidator::default());
    }
}
