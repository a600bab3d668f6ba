use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::json;
use shuttle_axum::axum::{
    body::Bytes,
    extract::{Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use crate::error::RunError;
use crate::ingest::classify::Category;
use crate::ingest::coordinator::CrawlCoordinator;
use crate::ingest::normalize::parse_timestamp;
use crate::ingest::types::SourceKind;
use crate::store::{PageRequest, RecordFilter};

#[derive(Clone)]
pub struct AppState {
    coordinator: Arc<CrawlCoordinator>,
}

impl AppState {
    pub fn new(coordinator: Arc<CrawlCoordinator>) -> Self {
        Self { coordinator }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/admin/runs", post(trigger_run))
        .route("/admin/runs/last", get(last_run))
        .route("/admin/sources", get(list_sources))
        .route("/records", get(list_records))
        .layer(CorsLayer::very_permissive())
        .with_state(state)
}

fn error_response(status: StatusCode, msg: impl std::fmt::Display) -> Response {
    (status, Json(json!({ "error": msg.to_string() }))).into_response()
}

#[derive(Debug, Default, Deserialize)]
struct RunRequest {
    #[serde(default)]
    sources: Option<BTreeSet<String>>,
}

/// Empty body: every enabled source. `{"sources": [...]}`: only those.
async fn trigger_run(State(state): State<AppState>, body: Bytes) -> Response {
    let req = if body.iter().all(u8::is_ascii_whitespace) {
        RunRequest::default()
    } else {
        match serde_json::from_slice::<RunRequest>(&body) {
            Ok(r) => r,
            Err(e) => return error_response(StatusCode::BAD_REQUEST, format!("invalid body: {e}")),
        }
    };

    match state.coordinator.start_run(req.sources) {
        Ok(handle) => {
            tracing::info!(target: "api", run_id = %handle.run_id(), "crawl run triggered");
            (
                StatusCode::ACCEPTED,
                Json(json!({ "run_id": handle.run_id(), "status": "started" })),
            )
                .into_response()
        }
        Err(e @ RunError::InProgress) => error_response(StatusCode::CONFLICT, e),
    }
}

async fn last_run(State(state): State<AppState>) -> Response {
    match state.coordinator.last_run_report().await {
        Ok(Some(run)) => Json(run).into_response(),
        Ok(None) => error_response(StatusCode::NOT_FOUND, "no crawl run recorded yet"),
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "run report unavailable");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}

#[derive(Serialize)]
struct SourceView {
    id: String,
    kind: SourceKind,
    enabled: bool,
    keywords: Vec<String>,
}

async fn list_sources(State(state): State<AppState>) -> Response {
    match state.coordinator.sources().list_sources().await {
        Ok(sources) => {
            // settings can carry credentials; never echo them
            let view: Vec<SourceView> = sources
                .into_iter()
                .map(|s| SourceView {
                    id: s.id,
                    kind: s.kind,
                    enabled: s.enabled,
                    keywords: s.keywords.into_iter().collect(),
                })
                .collect();
            Json(view).into_response()
        }
        Err(e) => error_response(StatusCode::SERVICE_UNAVAILABLE, e),
    }
}

#[derive(Debug, Deserialize)]
struct RecordsQuery {
    source_id: Option<String>,
    keyword: Option<String>,
    since: Option<String>,
    category: Option<Category>,
    page: Option<u32>,
    per_page: Option<u32>,
}

async fn list_records(State(state): State<AppState>, Query(q): Query<RecordsQuery>) -> Response {
    let since = match q.since.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
        Some(s) => match parse_timestamp(s) {
            Some(ts) => Some(ts),
            None => return error_response(StatusCode::BAD_REQUEST, format!("invalid since: {s}")),
        },
        None => None,
    };
    let filter = RecordFilter {
        source_id: q.source_id.filter(|s| !s.is_empty()),
        keyword: q.keyword.filter(|s| !s.is_empty()),
        since,
        category: q.category,
    };
    let defaults = PageRequest::default();
    let page = PageRequest::new(
        q.page.unwrap_or(defaults.page),
        q.per_page.unwrap_or(defaults.per_page),
    );

    match state.coordinator.content().list_records(&filter, page).await {
        Ok(items) => Json(json!({
            "page": page.page,
            "per_page": page.per_page,
            "items": items,
        }))
        .into_response(),
        Err(e) => {
            tracing::warn!(target: "api", error = %e, "record query failed");
            error_response(StatusCode::SERVICE_UNAVAILABLE, e)
        }
    }
}
