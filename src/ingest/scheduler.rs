// src/ingest/scheduler.rs
//! Fetch scheduling: per-call timeout, bounded retry with exponential
//! backoff, lazy pagination and the bounded fan-out across sources.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::stream::{self, BoxStream, StreamExt};
use metrics::{counter, histogram};
use serde::Deserialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::error::{FetchError, RunError};
use crate::ingest::coordinator::CrawlCoordinator;
use crate::ingest::types::{FetchPage, FetchQuery, SourceAdapter};

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Upper bound on sources fetched at once; the effective width is
    /// `min(concurrency, sources in the run)`.
    pub concurrency: usize,
    pub source_timeout_ms: u64,
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub max_pages: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            concurrency: 8,
            source_timeout_ms: 20_000,
            max_retries: 2,
            backoff_base_ms: 500,
            max_pages: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn source_timeout(&self) -> Duration {
        Duration::from_millis(self.source_timeout_ms)
    }

    /// `base * 2^(attempt-1)` for the 1-based retry `attempt`.
    pub fn backoff(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(16);
        Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << shift))
    }
}

/// Outcome of one page request after retries.
#[derive(Debug)]
pub struct PageAttempt {
    pub result: Result<FetchPage, FetchError>,
    pub retries: u32,
}

#[derive(Clone, Debug, Default)]
pub struct FetchScheduler {
    cfg: SchedulerConfig,
}

impl FetchScheduler {
    pub fn new(cfg: SchedulerConfig) -> Self {
        Self { cfg }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.cfg
    }

    /// One adapter call under the per-source timeout, retried while the
    /// failure is retryable and the retry budget lasts.
    pub async fn call_with_retry(
        &self,
        adapter: &dyn SourceAdapter,
        query: &FetchQuery,
        cursor: Option<&str>,
    ) -> PageAttempt {
        let timeout = self.cfg.source_timeout();
        let mut retries = 0u32;
        loop {
            let t0 = Instant::now();
            let result = match tokio::time::timeout(timeout, adapter.fetch_page(query, cursor)).await
            {
                Ok(r) => r,
                Err(_) => Err(FetchError::Timeout(timeout)),
            };
            histogram!("ingest_fetch_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);

            match result {
                Err(e) if e.is_retryable() && retries < self.cfg.max_retries => {
                    retries += 1;
                    let delay = self.cfg.backoff(retries);
                    counter!("ingest_fetch_retries_total").increment(1);
                    tracing::warn!(
                        target: "ingest",
                        provider = adapter.name(),
                        attempt = retries,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "retrying provider call"
                    );
                    tokio::time::sleep(delay).await;
                }
                result => return PageAttempt { result, retries },
            }
        }
    }

    /// Lazy page sequence for one source. Ends after the first failed page,
    /// when the provider returns no cursor, or after `max_pages` pages.
    pub fn pages<'a>(
        &'a self,
        adapter: &'a dyn SourceAdapter,
        query: &'a FetchQuery,
    ) -> BoxStream<'a, PageAttempt> {
        let max_pages = self.cfg.max_pages.max(1);
        stream::unfold(Some((None::<String>, 0usize)), move |state| async move {
            let (cursor, done) = state?;
            if done >= max_pages {
                return None;
            }
            let attempt = self.call_with_retry(adapter, query, cursor.as_deref()).await;
            let next = match &attempt.result {
                Ok(page) => page
                    .next_cursor
                    .clone()
                    .filter(|c| !c.is_empty() && Some(c) != cursor.as_ref())
                    .map(|c| (Some(c), done + 1)),
                Err(_) => None,
            };
            Some((attempt, next))
        })
        .boxed()
    }

    /// Drive `f` over `items` with at most `min(concurrency, n)` in flight.
    pub async fn run_concurrently<T, F, Fut>(&self, items: Vec<T>, f: F)
    where
        F: FnMut(T) -> Fut,
        Fut: Future<Output = ()>,
    {
        let width = self.cfg.concurrency.min(items.len()).max(1);
        stream::iter(items)
            .map(f)
            .buffer_unordered(width)
            .for_each(|_| async {})
            .await;
    }
}

/// Periodic trigger. A tick that lands while a run is still going is skipped.
pub fn spawn_interval_trigger(coordinator: Arc<CrawlCoordinator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match coordinator.start_run(None) {
                Ok(handle) => {
                    tracing::info!(target: "ingest", run_id = %handle.run_id(), "scheduled crawl started");
                }
                Err(RunError::InProgress) => {
                    counter!("crawl_runs_skipped_total").increment(1);
                    tracing::info!(target: "ingest", "scheduled crawl skipped: run in progress");
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_from_base() {
        let cfg = SchedulerConfig {
            backoff_base_ms: 500,
            ..Default::default()
        };
        assert_eq!(cfg.backoff(1), Duration::from_millis(500));
        assert_eq!(cfg.backoff(2), Duration::from_millis(1_000));
        assert_eq!(cfg.backoff(3), Duration::from_millis(2_000));
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let cfg: SchedulerConfig = toml::from_str("max_retries = 4").unwrap();
        assert_eq!(cfg.max_retries, 4);
        assert_eq!(cfg.concurrency, 8);
        assert_eq!(cfg.source_timeout(), Duration::from_secs(20));
    }
}
