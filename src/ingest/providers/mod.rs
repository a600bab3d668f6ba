// src/ingest/providers/mod.rs
//! Provider adapters. Each one maps its provider's payload to `RawRecord`s
//! and classifies failures; nothing else.

pub mod gnews;
pub mod mediastack;
pub mod rss;
pub mod x_recent;
pub mod youtube;

use std::collections::BTreeMap;
use std::time::Instant;

use metrics::{counter, histogram};
use serde::de::DeserializeOwned;

use crate::error::FetchError;
use crate::ingest::types::FetchQuery;

/// In-process response bodies keyed by cursor (`""` is the first page).
/// Used by tests and demos in place of the network.
#[derive(Debug, Clone, Default)]
pub struct FixturePages {
    pages: BTreeMap<String, String>,
}

impl FixturePages {
    pub fn single(body: impl Into<String>) -> Self {
        Self::default().with_page("", body)
    }

    pub fn with_page(mut self, cursor: impl Into<String>, body: impl Into<String>) -> Self {
        self.pages.insert(cursor.into(), body.into());
        self
    }

    pub(crate) fn body(&self, cursor: Option<&str>, provider: &str) -> Result<&str, FetchError> {
        let key = cursor.unwrap_or_default();
        self.pages
            .get(key)
            .map(String::as_str)
            .ok_or_else(|| FetchError::permanent(format!("{provider}: no fixture page for cursor {key:?}")))
    }
}

/// Send a request and return the body of a successful response.
pub(crate) async fn get_text(
    req: reqwest::RequestBuilder,
    provider: &str,
) -> Result<String, FetchError> {
    let resp = match req.send().await {
        Ok(r) => r,
        Err(e) => {
            let err = FetchError::from(e);
            provider_error(provider, &err);
            return Err(err);
        }
    };
    let status = resp.status();
    if !status.is_success() {
        let err = FetchError::from_status(status.as_u16(), provider);
        provider_error(provider, &err);
        return Err(err);
    }
    resp.text().await.map_err(FetchError::from)
}

/// Malformed payloads are permanent: retrying returns the same bytes.
pub(crate) fn parse_json<T: DeserializeOwned>(body: &str, provider: &str) -> Result<T, FetchError> {
    serde_json::from_str(body).map_err(|e| {
        let err = FetchError::permanent(format!("{provider}: malformed payload: {e}"));
        provider_error(provider, &err);
        err
    })
}

pub(crate) fn require_keywords(query: &FetchQuery, provider: &str) -> Result<(), FetchError> {
    if query.keywords.is_empty() {
        return Err(FetchError::permanent(format!("{provider}: no keywords configured")));
    }
    Ok(())
}

pub(crate) fn provider_error(provider: &str, err: &FetchError) {
    counter!("ingest_provider_errors_total", "provider" => provider.to_string()).increment(1);
    tracing::warn!(target: "ingest", provider, error = %err, "provider error");
}

pub(crate) fn record_parsed(provider: &str, n: usize, t0: Instant) {
    histogram!("ingest_parse_ms").record(t0.elapsed().as_secs_f64() * 1_000.0);
    counter!("ingest_events_total", "provider" => provider.to_string()).increment(n as u64);
}

/// `k1 OR "two words"`; multi-word keywords are quoted as phrases.
pub(crate) fn or_query<'a, I: IntoIterator<Item = &'a String>>(keywords: I) -> String {
    keywords
        .into_iter()
        .map(|k| {
            if k.contains(char::is_whitespace) {
                format!("\"{k}\"")
            } else {
                k.clone()
            }
        })
        .collect::<Vec<_>>()
        .join(" OR ")
}

/// `RFC 3339` with second precision and a `Z` suffix; what the search APIs accept.
pub(crate) fn api_timestamp(ts: chrono::DateTime<chrono::Utc>) -> String {
    ts.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)
}
