// src/ingest/coordinator.rs
//! One crawl run end to end: snapshot the enabled sources, fan out under the
//! scheduler, normalize and dedup each record in provider order, and keep
//! the run report current in the run store.

use std::any::Any;
use std::collections::{BTreeMap, BTreeSet};
use std::panic::AssertUnwindSafe;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::{FutureExt, StreamExt};
use metrics::{counter, gauge, histogram};
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::alert::{OperatorAlert, TracingAlert};
use crate::error::{FetchError, RunError, StoreError};
use crate::ingest::dedup::{dedup_and_store, Classification};
use crate::ingest::normalize::normalize_record;
use crate::ingest::registry::AdapterRegistry;
use crate::ingest::run::{CrawlRun, SourceStatus};
use crate::ingest::scheduler::FetchScheduler;
use crate::ingest::types::{FetchQuery, SourceAdapter, SourceConfig};
use crate::store::{ContentStore, RunStore, SourceRepository};

pub const DEFAULT_RUN_DEADLINE: Duration = Duration::from_secs(300);

/// Live state of the run being executed. Only touched between awaits.
struct RunState {
    run: CrawlRun,
    mentions: BTreeMap<String, u64>,
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("unknown panic")
}

fn lock(state: &Mutex<RunState>) -> MutexGuard<'_, RunState> {
    state.lock().unwrap_or_else(|p| p.into_inner())
}

pub struct CrawlCoordinator {
    sources: Arc<dyn SourceRepository>,
    content: Arc<dyn ContentStore>,
    runs: Arc<dyn RunStore>,
    registry: AdapterRegistry,
    scheduler: FetchScheduler,
    alert: Arc<dyn OperatorAlert>,
    run_deadline: Duration,
    run_lock: Arc<tokio::sync::Mutex<()>>,
}

/// A started run. The id is known immediately; `wait` yields the final report.
pub struct RunHandle {
    run_id: Uuid,
    fallback: CrawlRun,
    join: JoinHandle<CrawlRun>,
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub async fn wait(self) -> CrawlRun {
        match self.join.await {
            Ok(run) => run,
            Err(e) => {
                let mut run = self.fallback;
                run.fail(format!("run task aborted: {e}"));
                tracing::error!(target: "coordinator", run_id = %run.id, error = %e, "crawl run task cancelled");
                run
            }
        }
    }
}

impl CrawlCoordinator {
    pub fn new(
        sources: Arc<dyn SourceRepository>,
        content: Arc<dyn ContentStore>,
        runs: Arc<dyn RunStore>,
        registry: AdapterRegistry,
    ) -> Self {
        Self {
            sources,
            content,
            runs,
            registry,
            scheduler: FetchScheduler::default(),
            alert: Arc::new(TracingAlert),
            run_deadline: DEFAULT_RUN_DEADLINE,
            run_lock: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn with_scheduler(mut self, scheduler: FetchScheduler) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn with_alert(mut self, alert: Arc<dyn OperatorAlert>) -> Self {
        self.alert = alert;
        self
    }

    pub fn with_run_deadline(mut self, deadline: Duration) -> Self {
        self.run_deadline = deadline;
        self
    }

    pub fn content(&self) -> &Arc<dyn ContentStore> {
        &self.content
    }

    pub fn sources(&self) -> &Arc<dyn SourceRepository> {
        &self.sources
    }

    pub fn is_running(&self) -> bool {
        self.run_lock.try_lock().is_err()
    }

    /// Start a run over all enabled sources, or only `requested` ones.
    /// Fails with `InProgress` while another run holds the lock; in that case
    /// no run is created.
    pub fn start_run(
        self: &Arc<Self>,
        requested: Option<BTreeSet<String>>,
    ) -> Result<RunHandle, RunError> {
        let guard = Arc::clone(&self.run_lock)
            .try_lock_owned()
            .map_err(|_| RunError::InProgress)?;

        let run = CrawlRun::new(requested);
        let run_id = run.id;
        let fallback = run.clone();
        let mut panicked = run.clone();
        let this = Arc::clone(self);
        let join = tokio::spawn(async move {
            // Held until the final report is saved, panics included.
            let _guard = guard;
            match AssertUnwindSafe(this.execute(run)).catch_unwind().await {
                Ok(run) => run,
                Err(payload) => {
                    panicked.fail(format!("run task panicked: {}", panic_message(&*payload)));
                    // Replaces the `running` snapshot saved at start.
                    this.finish_failed(panicked).await
                }
            }
        });
        Ok(RunHandle {
            run_id,
            fallback,
            join,
        })
    }

    pub async fn run_now(
        self: &Arc<Self>,
        requested: Option<BTreeSet<String>>,
    ) -> Result<CrawlRun, RunError> {
        Ok(self.start_run(requested)?.wait().await)
    }

    pub async fn last_run_report(&self) -> Result<Option<CrawlRun>, StoreError> {
        self.runs.last_run().await
    }

    async fn execute(&self, mut run: CrawlRun) -> CrawlRun {
        crate::ingest::ensure_metrics_described();
        counter!("crawl_runs_total").increment(1);
        let t0 = Instant::now();
        tracing::info!(target: "coordinator", run_id = %run.id, "crawl run starting");

        let enabled = match self.sources.enabled_sources().await {
            Ok(v) => v,
            Err(e) => {
                run.fail(format!("loading source configs: {e}"));
                return self.finish_failed(run).await;
            }
        };
        let selected: Vec<SourceConfig> = match &run.requested_sources {
            None => enabled,
            Some(req) => enabled.into_iter().filter(|s| req.contains(&s.id)).collect(),
        };

        run.begin(selected.iter().map(|s| s.id.clone()));
        if let Some(req) = run.requested_sources.clone() {
            for id in req.iter().filter(|id| !selected.iter().any(|s| &s.id == *id)) {
                run.skip_source(id, "unknown or disabled source");
            }
        }
        if let Err(e) = self.runs.save_run(&run).await {
            run.fail(format!("recording run start: {e}"));
            return self.finish_failed(run).await;
        }

        let run_id = run.id;
        let state = Arc::new(Mutex::new(RunState {
            run,
            mentions: BTreeMap::new(),
        }));

        let work = self
            .scheduler
            .run_concurrently(selected, |src| self.crawl_source(run_id, src, Arc::clone(&state)));
        if tokio::time::timeout(self.run_deadline, work).await.is_err() {
            let expired = lock(&state).run.expire_pending("run deadline exceeded");
            tracing::warn!(
                target: "coordinator",
                %run_id,
                expired,
                deadline_s = self.run_deadline.as_secs(),
                "run deadline hit; unfinished sources marked timed out"
            );
        }

        let mut run = {
            let mut g = lock(&state);
            let st = &mut *g;
            st.run.set_trending(&st.mentions);
            st.run.clone()
        };
        run.complete();
        self.persist(&run).await;

        let totals = run.totals();
        histogram!("crawl_run_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
        gauge!("crawl_last_run_ts").set(Utc::now().timestamp() as f64);
        tracing::info!(
            target: "coordinator",
            %run_id,
            sources = run.sources.len(),
            fetched = totals.fetched,
            inserted = totals.inserted,
            updated = totals.updated,
            duplicates = totals.duplicates,
            failed_records = totals.failed_records,
            "crawl run completed"
        );
        run
    }

    async fn finish_failed(&self, run: CrawlRun) -> CrawlRun {
        counter!("crawl_runs_failed_total").increment(1);
        tracing::error!(
            target: "coordinator",
            run_id = %run.id,
            error = run.error.as_deref().unwrap_or_default(),
            "crawl run failed"
        );
        self.persist(&run).await;
        run
    }

    async fn persist(&self, run: &CrawlRun) {
        if let Err(e) = self.runs.save_run(run).await {
            tracing::warn!(target: "coordinator", run_id = %run.id, error = %e, "saving run report failed");
        }
    }

    async fn crawl_source(&self, run_id: Uuid, src: SourceConfig, state: Arc<Mutex<RunState>>) {
        let failure = match self.registry.build(&src) {
            Ok(adapter) => {
                let since = match self.runs.last_successful_fetch(&src.id).await {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(target: "coordinator", source_id = %src.id, error = %e, "since lookup failed; full fetch");
                        None
                    }
                };
                let query = FetchQuery {
                    keywords: src.keywords.clone(),
                    since,
                };
                self.consume_pages(&src, adapter.as_ref(), &query, &state).await
            }
            Err(e) => Some(e),
        };

        let (status, error) = match &failure {
            None => (SourceStatus::Succeeded, None),
            Some(e @ FetchError::Timeout(_)) => (SourceStatus::TimedOut, Some(e.to_string())),
            Some(e) => (SourceStatus::Failed, Some(e.to_string())),
        };
        let snapshot = {
            let mut g = lock(&state);
            let r = g.run.sources.entry(src.id.clone()).or_default();
            r.status = status;
            r.error = error;
            tracing::info!(
                target: "coordinator",
                %run_id,
                source_id = %src.id,
                status = ?r.status,
                fetched = r.fetched,
                accepted = r.accepted,
                duplicates = r.duplicates,
                failed_records = r.failed_records,
                retries = r.retries,
                "source finished"
            );
            g.run.clone()
        };
        self.persist(&snapshot).await;

        // Off the source task: a slow webhook must not hold a concurrency
        // slot or race the run deadline.
        if let Some(e @ FetchError::Permanent(_)) = failure {
            let alert = Arc::clone(&self.alert);
            let source_id = src.id.clone();
            tokio::spawn(async move { alert.permanent_failure(run_id, &source_id, &e).await });
        }
    }

    /// Pull pages in order and process each record before the next one.
    /// Returns the error that ended the source, if any.
    async fn consume_pages(
        &self,
        src: &SourceConfig,
        adapter: &dyn SourceAdapter,
        query: &FetchQuery,
        state: &Mutex<RunState>,
    ) -> Option<FetchError> {
        let mut pages = self.scheduler.pages(adapter, query);
        while let Some(attempt) = pages.next().await {
            let page = {
                let mut g = lock(state);
                let r = g.run.sources.entry(src.id.clone()).or_default();
                r.retries += u64::from(attempt.retries);
                match attempt.result {
                    Ok(page) => {
                        r.pages += 1;
                        r.fetched += page.records.len() as u64;
                        page
                    }
                    Err(e) => return Some(e),
                }
            };
            counter!("records_fetched_total").increment(page.records.len() as u64);

            let fetched_at = Utc::now();
            for raw in page.records {
                let outcome = match normalize_record(raw, &src.id, &src.keywords, fetched_at) {
                    Ok(record) => {
                        let tags = record.tags.clone();
                        dedup_and_store(self.content.as_ref(), record)
                            .await
                            .map(|c| (c, tags))
                            .map_err(|e| e.to_string())
                    }
                    Err(e) => Err(e.to_string()),
                };

                let mut g = lock(state);
                let st = &mut *g;
                let r = st.run.sources.entry(src.id.clone()).or_default();
                match outcome {
                    Ok((class, tags)) => {
                        r.record(class);
                        let name = match class {
                            Classification::Inserted => "records_inserted_total",
                            Classification::Updated => "records_updated_total",
                            Classification::Duplicate => "records_duplicate_total",
                        };
                        counter!(name).increment(1);
                        for t in tags {
                            *st.mentions.entry(t).or_default() += 1;
                        }
                    }
                    Err(reason) => {
                        r.failed_records += 1;
                        counter!("records_failed_total").increment(1);
                        tracing::debug!(target: "coordinator", source_id = %src.id, %reason, "record rejected");
                    }
                }
            }
        }
        None
    }
}
