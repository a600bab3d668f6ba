// src/bootstrap.rs
//! Wiring shared by the service binary and `crawl_once`.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::config::AggregatorConfig;
use crate::ingest::coordinator::CrawlCoordinator;
use crate::ingest::registry::AdapterRegistry;
use crate::ingest::scheduler::FetchScheduler;
use crate::store::{ContentStore, FileSourceRepository, MemoryStore, RunStore, SourceRepository};

const DEFAULT_LOG_FILTER: &str = "content_aggregator=info,ingest=info,coordinator=info,api=info,warn";

/// Install the global subscriber. `RUST_LOG` overrides the filter and
/// `LOG_FORMAT=json` switches to JSON lines. A no-op when the host runtime
/// already installed one.
pub fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    let json = std::env::var("LOG_FORMAT").is_ok_and(|v| v.eq_ignore_ascii_case("json"));

    let _ = tracing_subscriber::registry()
        .with(filter)
        .with(json.then(|| fmt::layer().json()))
        .with((!json).then(|| fmt::layer().compact()))
        .try_init();
}

type Stores = (Arc<dyn ContentStore>, Arc<dyn RunStore>);

#[cfg(feature = "postgres")]
async fn postgres_stores() -> Result<Option<Stores>> {
    let Ok(url) = std::env::var("DATABASE_URL") else {
        return Ok(None);
    };
    let pg = Arc::new(
        crate::store::postgres::PgStore::connect(&url)
            .await
            .context("connecting to postgres")?,
    );
    info!(target: "coordinator", "using postgres store");
    let content: Arc<dyn ContentStore> = pg.clone();
    let runs: Arc<dyn RunStore> = pg;
    Ok(Some((content, runs)))
}

#[cfg(not(feature = "postgres"))]
async fn postgres_stores() -> Result<Option<Stores>> {
    Ok(None)
}

/// Content and run stores: Postgres when built with `postgres` and
/// `DATABASE_URL` is set, otherwise in-process memory.
async fn build_stores() -> Result<Stores> {
    if let Some(stores) = postgres_stores().await? {
        return Ok(stores);
    }
    let mem = Arc::new(MemoryStore::new());
    info!(target: "coordinator", "using in-memory store");
    let content: Arc<dyn ContentStore> = mem.clone();
    let runs: Arc<dyn RunStore> = mem;
    Ok((content, runs))
}

pub async fn build_coordinator(cfg: &AggregatorConfig) -> Result<Arc<CrawlCoordinator>> {
    let registry = AdapterRegistry::with_defaults(cfg.http.client()?);
    let sources = FileSourceRepository::from_default_location()
        .context("locating sources file")?;
    info!(target: "coordinator", path = %sources.path().display(), "source table");
    let sources: Arc<dyn SourceRepository> = Arc::new(sources);
    let (content, runs) = build_stores().await?;

    let coordinator = CrawlCoordinator::new(sources, content, runs, registry)
        .with_scheduler(FetchScheduler::new(cfg.scheduler.clone()))
        .with_alert(cfg.alert.build())
        .with_run_deadline(cfg.run.deadline());
    Ok(Arc::new(coordinator))
}
