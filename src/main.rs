//! Content aggregator service: binary entrypoint.
//! Boots the Axum HTTP server, the scheduled crawl trigger and `/metrics`.

use content_aggregator::{
    api::{create_router, AppState},
    bootstrap,
    config::AggregatorConfig,
    ingest::scheduler::spawn_interval_trigger,
    metrics::Metrics,
};
use shuttle_axum::ShuttleAxum;
use tracing::{info, warn};

#[shuttle_runtime::main]
async fn axum() -> ShuttleAxum {
    // Load .env in local/dev; no-op in prod environments.
    let _ = dotenvy::dotenv();
    bootstrap::init_tracing();

    let cfg = AggregatorConfig::load()?;
    let coordinator = bootstrap::build_coordinator(&cfg).await?;

    match cfg.run.interval() {
        Some(every) => {
            info!(target: "coordinator", interval_s = every.as_secs(), "scheduled crawl enabled");
            spawn_interval_trigger(coordinator.clone(), every);
        }
        None => info!(target: "coordinator", "scheduled crawl disabled"),
    }

    let mut router = create_router(AppState::new(coordinator));
    match Metrics::init() {
        Ok(metrics) => router = router.merge(metrics.router()),
        Err(e) => warn!(error = %e, "metrics exporter unavailable"),
    }

    Ok(router.into())
}
