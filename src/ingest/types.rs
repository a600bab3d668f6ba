// src/ingest/types.rs
use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FetchError;
use crate::ingest::classify::Category;

/// Provider record mapped to the canonical pre-normalization shape.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RawRecord {
    pub native_id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub image_urls: Vec<String>,
    /// As the provider wrote it; the normalizer coerces it to UTC.
    pub published_at: Option<String>,
    pub summary: Option<String>,
    pub raw: serde_json::Value,
}

/// Canonical, deduplicated unit of aggregated content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ContentRecord {
    pub fingerprint: String,
    pub source_id: String,
    pub source_native_id: Option<String>,
    pub title: String,
    pub url: Option<String>,
    pub image_urls: Vec<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub fetched_at: DateTime<Utc>,
    pub summary: Option<String>,
    pub tags: Vec<String>,
    pub raw: serde_json::Value,
    #[serde(default)]
    pub category: Category,
    #[serde(default)]
    pub hot_score: f64,
}

impl ContentRecord {
    /// Timestamp used for newest-first ordering.
    pub fn sort_ts(&self) -> DateTime<Utc> {
        self.published_at.unwrap_or(self.fetched_at)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    NewsApi,
    VideoApi,
    SocialApi,
    Rss,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::NewsApi => "news_api",
            SourceKind::VideoApi => "video_api",
            SourceKind::SocialApi => "social_api",
            SourceKind::Rss => "rss",
        }
    }
}

/// A configured provider instance. `settings` is opaque to the engine and
/// interpreted only by the adapter built for it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceConfig {
    pub id: String,
    pub kind: SourceKind,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default)]
    pub keywords: BTreeSet<String>,
    #[serde(default)]
    pub settings: serde_json::Value,
}

fn default_enabled() -> bool {
    true
}

impl SourceConfig {
    pub fn setting_str(&self, key: &str) -> Option<&str> {
        self.settings.get(key).and_then(|v| v.as_str())
    }

    pub fn setting_u64(&self, key: &str) -> Option<u64> {
        self.settings.get(key).and_then(|v| v.as_u64())
    }

    /// Read a credential. `"env:NAME"` (or the legacy `"ENV"` marker with a
    /// fallback variable) is resolved from the process environment.
    pub fn credential(&self, key: &str, env_fallback: &str) -> Result<String, FetchError> {
        let raw = self.setting_str(key).unwrap_or("ENV").trim();
        let var = if let Some(name) = raw.strip_prefix("env:") {
            name
        } else if raw.eq_ignore_ascii_case("env") {
            env_fallback
        } else {
            return Ok(raw.to_string());
        };
        std::env::var(var).map_err(|_| {
            FetchError::permanent(format!("source {}: missing credential env var {var}", self.id))
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchQuery {
    pub keywords: BTreeSet<String>,
    pub since: Option<DateTime<Utc>>,
}

/// One provider response page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FetchPage {
    pub records: Vec<RawRecord>,
    /// Opaque cursor for the next page; `None` ends the sequence.
    pub next_cursor: Option<String>,
}

impl FetchPage {
    pub fn last(records: Vec<RawRecord>) -> Self {
        Self {
            records,
            next_cursor: None,
        }
    }
}

/// One external provider. Implementations only talk to their provider's
/// query and pagination shape; retries, timeouts and dedup live elsewhere.
#[async_trait::async_trait]
pub trait SourceAdapter: Send + Sync {
    async fn fetch_page(
        &self,
        query: &FetchQuery,
        cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError>;

    fn name(&self) -> &str;
}
