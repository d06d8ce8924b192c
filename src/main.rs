//! Feed collector binary entrypoint.
//! Loads the store, feeds and keywords, then runs ingestion passes until
//! done (single pass) or interrupted.

use anyhow::Context;
use clap::Parser;
use std::time::Duration;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use feed_sentiment_collector::config::{load_feeds_or_empty, Settings};
use feed_sentiment_collector::ingest::scheduler;
use feed_sentiment_collector::{
    EntryStore, FeedFetcher, KeywordIndex, Pipeline, Schedule, SentimentTagger, StorePaths,
};

/// `RUST_LOG` filters (default `info`); `LOG_FORMAT=json` switches to JSON lines.
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("LOG_FORMAT")
        .ok()
        .is_some_and(|v| v.eq_ignore_ascii_case("json"));

    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(fmt::layer().json()).init();
    } else {
        registry.with(fmt::layer().compact()).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("ctrl-c handler unavailable: {e:#}");
        std::future::pending::<()>().await;
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    let settings = Settings::parse();
    init_tracing();

    // Bad interval is fatal before anything is fetched.
    let schedule = Schedule::parse(settings.interval.as_deref())?;

    if let Some(addr) = settings.metrics_addr {
        metrics_exporter_prometheus::PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .context("installing prometheus exporter")?;
        tracing::info!(%addr, "metrics exporter listening");
    }

    // A store that exists but can't be read must stop us; starting empty would drop history.
    let store = EntryStore::load(&settings.store)
        .with_context(|| format!("loading entry store {}", settings.store.display()))?;
    let feeds = load_feeds_or_empty(&settings.feeds);
    let keywords = KeywordIndex::load_or_empty(&settings.keywords);

    let fetcher = FeedFetcher::http(
        Duration::from_secs(settings.timeout_secs),
        &settings.user_agent,
    )?;
    let paths = StorePaths {
        store: settings.store.clone(),
        export: settings.export_path(),
    };
    let mut pipeline = Pipeline::new(
        feeds,
        fetcher,
        SentimentTagger::with_lexicon(keywords),
        store,
        paths,
    )
    .with_concurrency(settings.concurrency);

    let passes = scheduler::run(schedule, &mut pipeline, shutdown_signal()).await?;
    tracing::info!(passes, entries = pipeline.store().len(), "collector stopped");
    Ok(())
}
