// src/ingest/scheduler.rs
//! Repeated ingestion passes on a fixed cadence.
//!
//! The target is "a pass starts every interval": the time a pass takes is
//! subtracted from the following sleep, so slow passes don't push the schedule back.

use async_trait::async_trait;
use metrics::counter;
use once_cell::sync::Lazy;
use regex::Regex;
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;

use crate::error::{Error, Result};
use crate::ingest::PassReport;

#[async_trait]
pub trait IngestPass: Send {
    async fn run_pass(&mut self) -> Result<PassReport>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schedule {
    /// Run exactly one pass.
    Once,
    /// Start a pass roughly every `Duration`.
    Every(Duration),
}

impl Schedule {
    /// `None` means run once. Otherwise see [`parse_interval`]; a negative
    /// magnitude also means run once, zero means back-to-back passes.
    pub fn parse(spec: Option<&str>) -> Result<Self> {
        match spec.map(str::trim).filter(|s| !s.is_empty()) {
            None => Ok(Schedule::Once),
            Some(s) => Ok(Self::from_secs(parse_interval(s)?)),
        }
    }

    pub fn from_secs(secs: i64) -> Self {
        match u64::try_from(secs) {
            Ok(s) => Schedule::Every(Duration::from_secs(s)),
            Err(_) => Schedule::Once,
        }
    }
}

/// Parse `"<signed integer><s|m|h|d>"` into whole seconds, e.g. `"10m"` → 600.
pub fn parse_interval(spec: &str) -> Result<i64> {
    static RE: Lazy<Regex> =
        Lazy::new(|| Regex::new(r"^([+-]?\d+)\s*([smhd])$").expect("interval regex"));

    let invalid = || Error::InvalidInterval(spec.to_string());
    let caps = RE.captures(spec.trim()).ok_or_else(invalid)?;
    let magnitude: i64 = caps[1].parse().map_err(|_| invalid())?;
    let unit: i64 = match &caps[2] {
        "s" => 1,
        "m" => 60,
        "h" => 3_600,
        "d" => 86_400,
        _ => return Err(invalid()),
    };
    magnitude.checked_mul(unit).ok_or_else(invalid)
}

/// Sleep before the next pass: whatever is left of `interval` after `elapsed`.
pub fn next_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Local wall-clock time `delay` from now; `None` past the calendar's range.
fn wake_time(delay: Duration) -> Option<chrono::DateTime<chrono::Local>> {
    let delay = chrono::Duration::from_std(delay).ok()?;
    chrono::Local::now().checked_add_signed(delay)
}

/// Drive `pass` according to `schedule` until it is done or `shutdown` resolves.
/// Shutdown is only observed while sleeping, never in the middle of a pass.
/// Returns the number of passes run.
pub async fn run<P, S>(schedule: Schedule, pass: &mut P, shutdown: S) -> Result<u64>
where
    P: IngestPass + ?Sized,
    S: Future<Output = ()>,
{
    tokio::pin!(shutdown);
    let mut passes = 0u64;

    loop {
        let started = Instant::now();
        pass.run_pass().await?;
        passes += 1;
        counter!("collector_passes_total").increment(1);

        let Schedule::Every(interval) = schedule else {
            break;
        };

        let delay = next_delay(interval, started.elapsed());
        match wake_time(delay) {
            Some(next_at) => tracing::info!(
                delay_secs = delay.as_secs(),
                "sleep until {} for next update of feeds",
                next_at.format("%H:%M")
            ),
            None => tracing::info!(delay_secs = delay.as_secs(), "sleeping before next update of feeds"),
        }

        tokio::select! {
            biased;
            _ = &mut shutdown => {
                tracing::info!(passes, "shutdown requested, stopping scheduler");
                break;
            }
            _ = tokio::time::sleep(delay) => {}
        }
    }

    Ok(passes)
}
