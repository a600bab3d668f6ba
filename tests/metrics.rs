// tests/metrics.rs
use std::sync::Arc;

use async_trait::async_trait;
use axum::body::{self, Body};
use http::{Request, StatusCode};
use tower::ServiceExt;

use content_aggregator::ingest::registry::AdapterRegistry;
use content_aggregator::ingest::types::{FetchPage, FetchQuery};
use content_aggregator::metrics::Metrics;
use content_aggregator::store::{MemorySourceRepository, MemoryStore};
use content_aggregator::{
    CrawlCoordinator, FetchError, RawRecord, SourceAdapter, SourceConfig, SourceKind,
};

struct OnePage;

#[async_trait]
impl SourceAdapter for OnePage {
    async fn fetch_page(
        &self,
        _query: &FetchQuery,
        _cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        Ok(FetchPage::last(vec![
            RawRecord {
                title: "Labubu restock".into(),
                url: Some("https://toys.example/restock".into()),
                ..Default::default()
            },
            RawRecord {
                title: "  ".into(),
                ..Default::default()
            },
        ]))
    }

    fn name(&self) -> &str {
        "one-page"
    }
}

// Only one recorder per process, so everything lives in one test.
#[tokio::test]
async fn metrics_endpoint_reports_crawl_series() {
    let metrics = Metrics::init().expect("install recorder");
    assert!(Metrics::init().is_err(), "second install must fail");

    let mut registry = AdapterRegistry::new();
    registry.register(SourceKind::Rss, |_cfg: &SourceConfig| {
        Ok(Arc::new(OnePage) as Arc<dyn SourceAdapter>)
    });
    let store = Arc::new(MemoryStore::new());
    let coordinator = Arc::new(CrawlCoordinator::new(
        Arc::new(MemorySourceRepository::new(vec![SourceConfig {
            id: "feed".into(),
            kind: SourceKind::Rss,
            enabled: true,
            keywords: ["labubu".to_string()].into(),
            settings: serde_json::Value::Null,
        }])),
        store.clone(),
        store.clone(),
        registry,
    ));
    let run = coordinator.run_now(None).await.unwrap();
    assert_eq!(run.sources["feed"].failed_records, 1);

    let resp = metrics
        .router()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let body = body::to_bytes(resp.into_body(), 1_048_576).await.unwrap();
    let text = String::from_utf8(body.to_vec()).unwrap();

    for needle in [
        "crawl_runs_total",
        "records_fetched_total",
        "records_inserted_total",
        "records_failed_total",
        "ingest_fetch_ms",
        "crawl_run_ms",
        "crawl_last_run_ts",
    ] {
        assert!(text.contains(needle), "missing series {needle} in:\n{text}");
    }
}
