// tests/coordinator_runs.rs
//
// Crawl runs end to end against scripted adapters and the in-memory stores.
// Timeouts, backoff and the run deadline run on tokio's paused clock.

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use uuid::Uuid;

use content_aggregator::alert::OperatorAlert;
use content_aggregator::ingest::normalize::{clean_url, fingerprint};
use content_aggregator::ingest::registry::AdapterRegistry;
use content_aggregator::ingest::scheduler::{spawn_interval_trigger, FetchScheduler, SchedulerConfig};
use content_aggregator::ingest::types::{FetchPage, FetchQuery};
use content_aggregator::store::{
    ContentStore, MemorySourceRepository, MemoryStore, PageRequest, RecordFilter,
    SourceRepository,
};
use content_aggregator::{
    CrawlCoordinator, FetchError, RawRecord, RunError, RunStatus, SourceAdapter, SourceConfig,
    SourceKind, SourceStatus, StoreError,
};

// ---------- scripted adapter ----------

enum Step {
    Page(FetchPage),
    Fail(FetchError),
    /// Sleep, then return the page (or get cut off by a timeout first).
    Slow(Duration, FetchPage),
    /// Block until notified, then return the page.
    Gate(Arc<Notify>, FetchPage),
}

struct Scripted {
    name: String,
    steps: Mutex<VecDeque<Step>>,
    /// Returned once the script runs out.
    repeat: FetchPage,
    calls: AtomicUsize,
    seen_since: Mutex<Vec<Option<DateTime<Utc>>>>,
}

impl Scripted {
    fn new(name: &str, steps: Vec<Step>) -> Arc<Self> {
        Self::repeating(name, steps, FetchPage::default())
    }

    fn repeating(name: &str, steps: Vec<Step>, repeat: FetchPage) -> Arc<Self> {
        Arc::new(Self {
            name: name.to_string(),
            steps: Mutex::new(steps.into()),
            repeat,
            calls: AtomicUsize::new(0),
            seen_since: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl SourceAdapter for Scripted {
    async fn fetch_page(
        &self,
        query: &FetchQuery,
        _cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_since.lock().unwrap().push(query.since);
        let step = self.steps.lock().unwrap().pop_front();
        match step {
            None => Ok(self.repeat.clone()),
            Some(Step::Page(p)) => Ok(p),
            Some(Step::Fail(e)) => Err(e),
            Some(Step::Slow(d, p)) => {
                tokio::time::sleep(d).await;
                Ok(p)
            }
            Some(Step::Gate(n, p)) => {
                n.notified().await;
                Ok(p)
            }
        }
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[derive(Default)]
struct RecordingAlert {
    seen: Mutex<Vec<(Uuid, String)>>,
}

#[async_trait]
impl OperatorAlert for RecordingAlert {
    async fn permanent_failure(&self, run_id: Uuid, source_id: &str, _error: &FetchError) {
        self.seen.lock().unwrap().push((run_id, source_id.to_string()));
    }
}

/// Takes far longer than any run deadline before recording.
#[derive(Default)]
struct SlowAlert {
    seen: Mutex<Vec<String>>,
}

#[async_trait]
impl OperatorAlert for SlowAlert {
    async fn permanent_failure(&self, _run_id: Uuid, source_id: &str, _error: &FetchError) {
        tokio::time::sleep(Duration::from_secs(120)).await;
        self.seen.lock().unwrap().push(source_id.to_string());
    }
}

struct Panicking;

#[async_trait]
impl SourceAdapter for Panicking {
    async fn fetch_page(
        &self,
        _query: &FetchQuery,
        _cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        panic!("adapter bug");
    }

    fn name(&self) -> &str {
        "panicking"
    }
}

struct BrokenSources;

#[async_trait]
impl SourceRepository for BrokenSources {
    async fn list_sources(&self) -> Result<Vec<SourceConfig>, StoreError> {
        Err(StoreError::Unavailable("config db down".into()))
    }
}

// ---------- helpers ----------

fn raw(title: &str, url: &str) -> RawRecord {
    RawRecord {
        title: title.into(),
        url: Some(url.into()),
        published_at: Some("2025-05-01T08:00:00Z".into()),
        ..Default::default()
    }
}

fn page(records: Vec<RawRecord>) -> FetchPage {
    FetchPage::last(records)
}

fn page_with_next(records: Vec<RawRecord>, next: &str) -> FetchPage {
    FetchPage {
        records,
        next_cursor: Some(next.to_string()),
    }
}

fn source(id: &str) -> SourceConfig {
    SourceConfig {
        id: id.into(),
        kind: SourceKind::Rss,
        enabled: true,
        keywords: ["labubu".to_string()].into(),
        settings: serde_json::Value::Null,
    }
}

fn fp(url: &str) -> String {
    fingerprint(clean_url(url).as_ref(), "", None)
}

fn fast_scheduler() -> FetchScheduler {
    FetchScheduler::new(SchedulerConfig {
        concurrency: 4,
        source_timeout_ms: 1_000,
        max_retries: 2,
        backoff_base_ms: 100,
        max_pages: 5,
    })
}

struct Harness {
    coordinator: Arc<CrawlCoordinator>,
    store: Arc<MemoryStore>,
    sources: Arc<MemorySourceRepository>,
    alerts: Arc<RecordingAlert>,
}

fn harness(adapters: Vec<Arc<Scripted>>, sources: Vec<SourceConfig>) -> Harness {
    harness_with(adapters, sources, fast_scheduler(), Duration::from_secs(30))
}

/// Each source id maps to the adapter of the same name.
fn scripted_registry(adapters: Vec<Arc<Scripted>>) -> AdapterRegistry {
    let by_id: HashMap<String, Arc<Scripted>> =
        adapters.into_iter().map(|a| (a.name.clone(), a)).collect();
    let mut registry = AdapterRegistry::new();
    registry.register(SourceKind::Rss, move |cfg: &SourceConfig| {
        by_id
            .get(&cfg.id)
            .cloned()
            .map(|a| a as Arc<dyn SourceAdapter>)
            .ok_or_else(|| FetchError::permanent(format!("no script for {}", cfg.id)))
    });
    registry
}

fn harness_with(
    adapters: Vec<Arc<Scripted>>,
    sources: Vec<SourceConfig>,
    scheduler: FetchScheduler,
    deadline: Duration,
) -> Harness {
    let registry = scripted_registry(adapters);
    let store = Arc::new(MemoryStore::new());
    let sources = Arc::new(MemorySourceRepository::new(sources));
    let alerts = Arc::new(RecordingAlert::default());
    let coordinator = CrawlCoordinator::new(
        sources.clone(),
        store.clone(),
        store.clone(),
        registry,
    )
    .with_scheduler(scheduler)
    .with_alert(alerts.clone())
    .with_run_deadline(deadline);

    Harness {
        coordinator: Arc::new(coordinator),
        store,
        sources,
        alerts,
    }
}

// ---------- tests ----------

#[tokio::test(start_paused = true)]
async fn slow_source_times_out_without_affecting_the_other() {
    let a = Scripted::new(
        "a",
        vec![Step::Page(page(vec![
            raw("Labubu one", "https://toys.example/1"),
            raw("Labubu two", "https://toys.example/2"),
            raw("Labubu three", "https://toys.example/3"),
        ]))],
    );
    let slow = || Step::Slow(Duration::from_secs(60), page(vec![raw("late", "https://late.example")]));
    let b = Scripted::new("b", vec![slow(), slow(), slow()]);
    let h = harness(vec![a, b.clone()], vec![source("a"), source("b")]);

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.sources["a"].status, SourceStatus::Succeeded);
    assert_eq!(run.sources["a"].accepted, 3);
    assert_eq!(run.sources["b"].status, SourceStatus::TimedOut);
    assert_eq!(run.sources["b"].retries, 2);
    assert_eq!(b.calls(), 3, "initial call plus two retries");
    assert_eq!(h.store.len(), 3);
}

#[tokio::test(start_paused = true)]
async fn second_run_over_same_data_only_counts_duplicates() {
    let recs = vec![
        raw("Labubu one", "https://toys.example/1"),
        raw("Labubu two", "https://toys.example/2?utm_source=feed"),
    ];
    let a = Scripted::repeating("a", vec![], page(recs));
    let h = harness(vec![a.clone()], vec![source("a")]);

    let first = h.coordinator.run_now(None).await.unwrap();
    let second = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(first.sources["a"].inserted, 2);
    assert_eq!(second.sources["a"].inserted, 0);
    assert_eq!(second.sources["a"].duplicates, 2);
    assert_eq!(h.store.len(), 2);

    // The second fetch only asks for what is new since the first run.
    let since = a.seen_since.lock().unwrap().clone();
    assert_eq!(since, vec![None, Some(first.started_at)]);
}

#[tokio::test(start_paused = true)]
async fn only_one_run_at_a_time() {
    let gate = Arc::new(Notify::new());
    let a = Scripted::new(
        "a",
        vec![Step::Gate(gate.clone(), page(vec![raw("Labubu", "https://toys.example/g")]))],
    );
    let h = harness(vec![a], vec![source("a")]);

    let handle = h.coordinator.start_run(None).unwrap();
    assert!(h.coordinator.is_running());
    assert_eq!(h.coordinator.start_run(None).err(), Some(RunError::InProgress));

    // The in-flight run is visible before it finishes.
    tokio::task::yield_now().await;
    let live = h.coordinator.last_run_report().await.unwrap().unwrap();
    assert_eq!(live.id, handle.run_id());
    assert_eq!(live.status, RunStatus::Running);

    gate.notify_one();
    let run = handle.wait().await;
    assert_eq!(run.status, RunStatus::Completed);
    assert!(!h.coordinator.is_running());
    assert!(h.coordinator.start_run(None).is_ok(), "lock released after the run");
}

#[tokio::test(start_paused = true)]
async fn permanent_failure_is_not_retried_and_alerts() {
    let a = Scripted::new("a", vec![Step::Fail(FetchError::permanent("HTTP 401"))]);
    let h = harness(vec![a.clone()], vec![source("a")]);

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed, "source errors do not fail the run");
    assert_eq!(run.sources["a"].status, SourceStatus::Failed);
    assert_eq!(run.sources["a"].retries, 0);
    assert_eq!(a.calls(), 1);
    // The alert is sent off the source task.
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert_eq!(*h.alerts.seen.lock().unwrap(), vec![(run.id, "a".to_string())]);
}

#[tokio::test(start_paused = true)]
async fn transient_failure_is_retried_and_recovers() {
    let a = Scripted::new(
        "a",
        vec![
            Step::Fail(FetchError::transient("HTTP 503")),
            Step::Page(page(vec![
                raw("Labubu one", "https://toys.example/1"),
                raw("Labubu two", "https://toys.example/2"),
            ])),
        ],
    );
    let h = harness(vec![a.clone()], vec![source("a")]);

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.sources["a"].status, SourceStatus::Succeeded);
    assert_eq!(run.sources["a"].retries, 1);
    assert_eq!(run.sources["a"].accepted, 2);
    assert_eq!(a.calls(), 2);
    assert!(h.alerts.seen.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn exhausted_transient_retries_mark_the_source_failed() {
    let fail = || Step::Fail(FetchError::transient("HTTP 502"));
    let a = Scripted::new("a", vec![fail(), fail(), fail()]);
    let h = harness(vec![a.clone()], vec![source("a")]);

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.sources["a"].status, SourceStatus::Failed);
    assert_eq!(a.calls(), 3);
    assert!(h.alerts.seen.lock().unwrap().is_empty(), "transient errors need no operator");
}

#[tokio::test(start_paused = true)]
async fn records_of_one_source_are_stored_in_provider_order_across_pages() {
    let a = Scripted::new(
        "a",
        vec![
            Step::Page(page_with_next(
                vec![
                    raw("Labubu r1", "https://toys.example/r1"),
                    raw("Labubu r2", "https://toys.example/r2"),
                ],
                "2",
            )),
            Step::Page(page(vec![raw("Labubu r3", "https://toys.example/r3")])),
        ],
    );
    let h = harness(vec![a], vec![source("a")]);

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.sources["a"].pages, 2);
    assert_eq!(
        h.store.insertion_order(),
        vec![
            fp("https://toys.example/r1"),
            fp("https://toys.example/r2"),
            fp("https://toys.example/r3"),
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn run_deadline_keeps_accepted_records_and_times_out_the_rest() {
    let a = Scripted::new(
        "a",
        vec![
            Step::Page(page_with_next(
                vec![
                    raw("Labubu early one", "https://toys.example/e1"),
                    raw("Labubu early two", "https://toys.example/e2"),
                ],
                "2",
            )),
            Step::Slow(Duration::from_secs(600), page(vec![])),
        ],
    );
    let c = Scripted::new("c", vec![Step::Page(page(vec![raw("Labubu c", "https://toys.example/c")]))]);
    // Per-call timeout far beyond the deadline so only the deadline can stop `a`.
    let scheduler = FetchScheduler::new(SchedulerConfig {
        source_timeout_ms: 3_600_000,
        ..SchedulerConfig::default()
    });
    let h = harness_with(
        vec![a, c],
        vec![source("a"), source("c")],
        scheduler,
        Duration::from_secs(5),
    );

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.sources["a"].status, SourceStatus::TimedOut);
    assert_eq!(run.sources["a"].accepted, 2);
    assert_eq!(run.sources["c"].status, SourceStatus::Succeeded);
    assert_eq!(h.store.len(), 3);

    // A timed-out source does not move the incremental window forward.
    let last = h.coordinator.last_run_report().await.unwrap().unwrap();
    assert!(!last.source_succeeded("a"));
    assert!(last.source_succeeded("c"));
}

#[tokio::test(start_paused = true)]
async fn unreadable_source_table_fails_the_run() {
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(CrawlCoordinator::new(
        Arc::new(BrokenSources),
        store.clone(),
        store.clone(),
        AdapterRegistry::new(),
    ));

    let run = coordinator.run_now(None).await.unwrap();

    assert_eq!(run.status, RunStatus::Failed);
    assert!(run.error.as_deref().unwrap().contains("config db down"));
    assert!(run.sources.is_empty());
    let saved = coordinator.last_run_report().await.unwrap().unwrap();
    assert_eq!(saved.status, RunStatus::Failed);
    assert!(!coordinator.is_running());
}

#[tokio::test(start_paused = true)]
async fn requested_subset_runs_only_those_and_skips_unknown_ids() {
    let a = Scripted::new("a", vec![Step::Page(page(vec![raw("Labubu", "https://toys.example/a")]))]);
    let b = Scripted::new("b", vec![]);
    let mut disabled = source("d");
    disabled.enabled = false;
    let h = harness(vec![a, b.clone()], vec![source("a"), source("b"), disabled]);

    let requested: BTreeSet<String> = ["a", "d", "ghost"].iter().map(|s| s.to_string()).collect();
    let run = h.coordinator.run_now(Some(requested)).await.unwrap();

    assert_eq!(run.status, RunStatus::Completed);
    assert_eq!(run.sources["a"].status, SourceStatus::Succeeded);
    assert_eq!(run.sources["d"].status, SourceStatus::Skipped);
    assert_eq!(run.sources["ghost"].status, SourceStatus::Skipped);
    assert!(!run.sources.contains_key("b"));
    assert_eq!(b.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cross_source_duplicates_update_and_feed_trending() {
    let a = Scripted::new(
        "a",
        vec![Step::Page(page(vec![
            raw("Labubu blind box restock", "https://toys.example/story?utm_source=a"),
            raw("Labubu macaron series", "https://toys.example/macaron"),
        ]))],
    );
    let mut with_image = raw("Labubu blind box restock", "https://www.toys.example/story/");
    with_image.image_urls = vec!["https://img.example/story.jpg".into()];
    let b = Scripted::new("b", vec![Step::Page(page(vec![with_image]))]);

    let mut sa = source("a");
    sa.keywords = ["labubu", "blind box"].iter().map(|s| s.to_string()).collect();
    let mut sb = source("b");
    sb.keywords = sa.keywords.clone();

    // One source at a time so the insert lands before the update.
    let scheduler = FetchScheduler::new(SchedulerConfig {
        concurrency: 1,
        ..SchedulerConfig::default()
    });
    let h = harness_with(vec![a, b], vec![sa, sb], scheduler, Duration::from_secs(30));

    let run = h.coordinator.run_now(None).await.unwrap();

    assert_eq!(run.sources["a"].inserted, 2);
    assert_eq!(run.sources["b"].updated, 1);
    assert_eq!(h.store.len(), 2);

    let story = h
        .store
        .find_by_fingerprint(&fp("https://toys.example/story"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(story.source_id, "a", "first writer keeps ownership");
    assert_eq!(story.image_urls, vec!["https://img.example/story.jpg"]);

    let trending: Vec<(&str, u64)> = run
        .trending
        .iter()
        .map(|k| (k.keyword.as_str(), k.mentions))
        .collect();
    assert_eq!(trending, vec![("labubu", 3), ("blind box", 2)]);

    let hits = h
        .store
        .list_records(
            &RecordFilter {
                keyword: Some("MACARON".into()),
                ..Default::default()
            },
            PageRequest::default(),
        )
        .await
        .unwrap();
    assert_eq!(hits.len(), 1);
}

#[tokio::test(start_paused = true)]
async fn interval_trigger_starts_a_run_each_period() {
    let a = Scripted::repeating("a", vec![], page(vec![raw("Labubu", "https://toys.example/tick")]));
    let h = harness(vec![a.clone()], vec![source("a")]);

    let trigger = spawn_interval_trigger(Arc::clone(&h.coordinator), Duration::from_secs(60));
    tokio::time::sleep(Duration::from_secs(150)).await;
    trigger.abort();

    // Ticks at 0s, 60s and 120s.
    assert_eq!(a.calls(), 3);
    assert_eq!(h.store.len(), 1);
    let last = h.coordinator.last_run_report().await.unwrap().unwrap();
    assert_eq!(last.sources["a"].duplicates, 1);
}

#[tokio::test(start_paused = true)]
async fn slow_alert_does_not_mask_a_permanent_failure() {
    let a = Scripted::new("a", vec![Step::Fail(FetchError::permanent("HTTP 401"))]);
    let b = Scripted::new("b", vec![Step::Page(page(vec![raw("Labubu b", "https://toys.example/b")]))]);
    let store = Arc::new(MemoryStore::new());
    let alert = Arc::new(SlowAlert::default());
    let coordinator = Arc::new(
        CrawlCoordinator::new(
            Arc::new(MemorySourceRepository::new(vec![source("a"), source("b")])),
            store.clone(),
            store.clone(),
            scripted_registry(vec![a, b]),
        )
        .with_scheduler(fast_scheduler())
        .with_alert(alert.clone())
        .with_run_deadline(Duration::from_secs(10)),
    );

    let started = tokio::time::Instant::now();
    let run = coordinator.run_now(None).await.unwrap();

    assert!(started.elapsed() < Duration::from_secs(10), "run waited on the alert");
    assert_eq!(run.sources["a"].status, SourceStatus::Failed);
    assert!(run.sources["a"].error.as_deref().unwrap().contains("401"));
    assert_eq!(run.sources["b"].status, SourceStatus::Succeeded);
    let saved = coordinator.last_run_report().await.unwrap().unwrap();
    assert_eq!(saved.sources["a"].status, SourceStatus::Failed);

    // The alert still goes out once the webhook answers.
    assert!(alert.seen.lock().unwrap().is_empty());
    tokio::time::sleep(Duration::from_secs(121)).await;
    assert_eq!(*alert.seen.lock().unwrap(), vec!["a".to_string()]);
}

#[tokio::test(start_paused = true)]
async fn source_table_edits_mid_run_apply_to_the_next_run() {
    let gate = Arc::new(Notify::new());
    let a = Scripted::new(
        "a",
        vec![Step::Gate(gate.clone(), page(vec![raw("Labubu a", "https://toys.example/a")]))],
    );
    let c = Scripted::new("c", vec![Step::Page(page(vec![raw("Labubu c", "https://toys.example/c")]))]);
    let h = harness(vec![a.clone(), c.clone()], vec![source("a")]);

    let handle = h.coordinator.start_run(None).unwrap();
    while a.calls() == 0 {
        tokio::task::yield_now().await;
    }

    // The running snapshot is fixed; edits land between runs.
    assert!(h.sources.set_enabled("a", false));
    assert!(!h.sources.set_enabled("ghost", false));
    h.sources.upsert(source("c"));
    gate.notify_one();

    let first = handle.wait().await;
    assert_eq!(first.sources["a"].status, SourceStatus::Succeeded);
    assert_eq!(first.sources["a"].inserted, 1);
    assert!(!first.sources.contains_key("c"));

    let second = h.coordinator.run_now(None).await.unwrap();
    assert!(!second.sources.contains_key("a"));
    assert_eq!(second.sources["c"].status, SourceStatus::Succeeded);
    assert_eq!(a.calls(), 1);
    assert_eq!(c.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn panicking_adapter_fails_the_run_and_releases_the_lock() {
    let mut registry = AdapterRegistry::new();
    registry.register(SourceKind::Rss, |_cfg: &SourceConfig| {
        Ok(Arc::new(Panicking) as Arc<dyn SourceAdapter>)
    });
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(CrawlCoordinator::new(
        Arc::new(MemorySourceRepository::new(vec![source("a")])),
        store.clone(),
        store.clone(),
        registry,
    ));

    // Fire and forget, the way the HTTP trigger does.
    let run_id = coordinator.start_run(None).unwrap().run_id();
    for _ in 0..1_000 {
        if !coordinator.is_running() {
            break;
        }
        tokio::task::yield_now().await;
    }
    assert!(!coordinator.is_running(), "lock released after the panic");

    let saved = coordinator.last_run_report().await.unwrap().unwrap();
    assert_eq!(saved.id, run_id);
    assert_eq!(saved.status, RunStatus::Failed);
    assert!(saved.error.as_deref().unwrap().contains("adapter bug"));
    assert!(saved.finished_at.is_some());

    let again = coordinator.run_now(None).await.unwrap();
    assert_eq!(again.status, RunStatus::Failed);
    assert_ne!(again.id, run_id);
}
