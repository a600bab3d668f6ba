// Run one crawl over the configured sources and print the run report as JSON.
//
// Usage:
//   cargo run --bin crawl_once                  # every enabled source
//   cargo run --bin crawl_once -- gnews-main yt # only these source ids

use std::collections::BTreeSet;

use anyhow::{Context, Result};
use content_aggregator::{bootstrap, config::AggregatorConfig, RunStatus};

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::dotenv();
    bootstrap::init_tracing();

    let cfg = AggregatorConfig::load()?;
    let coordinator = bootstrap::build_coordinator(&cfg).await?;

    let requested: BTreeSet<String> = std::env::args().skip(1).collect();
    let requested = (!requested.is_empty()).then_some(requested);

    let run = coordinator.run_now(requested).await?;
    println!(
        "{}",
        serde_json::to_string_pretty(&run).context("serializing run report")?
    );

    if run.status == RunStatus::Failed {
        anyhow::bail!(
            "crawl run failed: {}",
            run.error.as_deref().unwrap_or("unknown error")
        );
    }
    Ok(())
}
