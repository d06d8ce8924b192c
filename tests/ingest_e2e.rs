// tests/ingest_e2e.rs
//! Fixture feeds → lexicon scorer → store on disk → CSV mirror.

use async_trait::async_trait;
use feed_sentiment_collector::config::parse_feed_list;
use feed_sentiment_collector::{
    CacheValidator, EntryStore, FeedFetcher, FeedTransport, FetchResponse, KeywordIndex,
    Pipeline, Result, SentimentTagger, StorePaths,
};
use std::fs;
use std::sync::Arc;

struct FixtureTransport;

#[async_trait]
impl FeedTransport for FixtureTransport {
    async fn get(&self, url: &str, _validator: &CacheValidator) -> Result<FetchResponse> {
        let body = match url {
            "https://markets.example.test/rss/" => include_str!("fixtures/markets_rss.xml"),
            "https://policy.example.test/atom/" => include_str!("fixtures/policy_atom.xml"),
            _ => {
                return Ok(FetchResponse {
                    status: 404,
                    ..Default::default()
                })
            }
        };
        Ok(FetchResponse {
            status: 200,
            etag: Some(format!("\"{}\"", body.len())),
            last_modified: None,
            body: body.as_bytes().to_vec(),
        })
    }
}

#[tokio::test]
async fn fixtures_are_collected_tagged_and_persisted() {
    let dir = tempfile::tempdir().unwrap();
    let kw_path = dir.path().join("keywords.json");
    fs::write(
        &kw_path,
        r#"{"Bitcoin": ["BTC"], "Ethereum": ["ETH"], "Fed": ["FOMC"], "AI": []}"#,
    )
    .unwrap();

    let feeds = parse_feed_list(
        "https://markets.example.test/rss\nhttps://policy.example.test/atom\nhttps://gone.example.test/\n",
    );
    let store_path = dir.path().join("db.json");
    let csv_path = dir.path().join("db.csv");

    let mut pipeline = Pipeline::new(
        feeds,
        FeedFetcher::new(Arc::new(FixtureTransport)),
        SentimentTagger::with_lexicon(KeywordIndex::load_or_empty(&kw_path)),
        EntryStore::load(&store_path).unwrap(),
        StorePaths {
            store: store_path.clone(),
            export: Some(csv_path.clone()),
        },
    );

    let report = pipeline.run_pass().await.unwrap();
    assert_eq!(report.feeds, 3);
    assert_eq!(report.failed_feeds, 1);
    assert_eq!(report.rejected, 1); // markets item without pubDate
    assert_eq!(report.added, 5);

    let store = EntryStore::load(&store_path).unwrap();
    let btc = store.get("https://markets.example.test/rss/", "mw-1001").unwrap();
    assert!(btc.tags["Bitcoin"] > 0.0);

    let fed = store.get("https://markets.example.test/rss/", "mw-1002").unwrap();
    assert!(fed.tags["Fed"] < 0.0);

    // "said" must not count as "AI"
    let eth = store.get("https://markets.example.test/rss/", "mw-1003").unwrap();
    assert_eq!(eth.tags.keys().collect::<Vec<_>>(), vec!["Ethereum"]);

    let untagged = store
        .get("https://policy.example.test/atom/", "urn:example:policy:2")
        .unwrap();
    assert!(untagged.tags.is_empty());

    let csv = fs::read_to_string(&csv_path).unwrap();
    assert_eq!(csv.lines().count(), 1 + 5);
    assert!(csv
        .lines()
        .next()
        .unwrap()
        .ends_with("link,Bitcoin,Ethereum,Fed"));
}
