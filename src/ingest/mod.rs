// src/ingest/mod.rs
pub mod classify;
pub mod coordinator;
pub mod dedup;
pub mod normalize;
pub mod providers;
pub mod registry;
pub mod run;
pub mod scheduler;
pub mod types;

use metrics::{describe_counter, describe_gauge, describe_histogram};
use once_cell::sync::OnceCell;

/// One-time metrics registration (so series show up on /metrics).
pub(crate) fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("ingest_events_total", "Raw records parsed from providers.");
        describe_counter!(
            "ingest_provider_errors_total",
            "Provider fetch/parse errors."
        );
        describe_counter!(
            "ingest_fetch_retries_total",
            "Adapter calls retried after a transient failure."
        );
        describe_histogram!("ingest_fetch_ms", "Adapter call latency in milliseconds.");
        describe_histogram!("ingest_parse_ms", "Provider parse time in milliseconds.");
        describe_counter!("records_fetched_total", "Raw records handed to the normalizer.");
        describe_counter!("records_inserted_total", "Records stored as new.");
        describe_counter!("records_updated_total", "Stored records updated in place.");
        describe_counter!("records_duplicate_total", "Records discarded as duplicates.");
        describe_counter!(
            "records_failed_total",
            "Records rejected by the normalizer or the store."
        );
        describe_counter!("crawl_runs_total", "Crawl runs started.");
        describe_counter!("crawl_runs_failed_total", "Crawl runs that ended failed.");
        describe_counter!(
            "crawl_runs_skipped_total",
            "Scheduled triggers skipped because a run was in progress."
        );
        describe_histogram!("crawl_run_ms", "Crawl run wall time in milliseconds.");
        describe_gauge!("crawl_last_run_ts", "Unix ts when the last crawl run finished.");
    });
}
