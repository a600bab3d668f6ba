// src/ingest/providers/mediastack.rs
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};

use super::{get_text, parse_json, provider_error, record_parsed, require_keywords, FixturePages};
use crate::error::FetchError;
use crate::ingest::types::{FetchPage, FetchQuery, RawRecord, SourceAdapter, SourceConfig};

const PROVIDER: &str = "mediastack";
// The free plan only serves plain http.
const DEFAULT_BASE_URL: &str = "http://api.mediastack.com/v1";
const DEFAULT_LIMIT: u64 = 25;

#[derive(Debug, Deserialize)]
struct NewsResponse {
    pagination: Option<Pagination>,
    #[serde(default)]
    data: Vec<Article>,
    error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    offset: u64,
    limit: u64,
    count: u64,
    total: u64,
}

#[derive(Debug, Deserialize)]
struct ApiError {
    code: String,
    message: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Article {
    title: Option<String>,
    description: Option<String>,
    url: Option<String>,
    image: Option<String>,
    source: Option<String>,
    published_at: Option<String>,
}

enum Mode {
    Fixture(FixturePages),
    Http {
        client: reqwest::Client,
        base_url: String,
        access_key: String,
        languages: String,
    },
}

/// Mediastack `/news`. Cursor is the next `offset`.
pub struct MediastackAdapter {
    mode: Mode,
    limit: u64,
}

impl MediastackAdapter {
    pub fn from_fixture(pages: FixturePages) -> Self {
        Self {
            mode: Mode::Fixture(pages),
            limit: DEFAULT_LIMIT,
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Result<Self, FetchError> {
        let access_key = cfg.credential("api_key", "MEDIASTACK_API_KEY")?;
        Ok(Self {
            mode: Mode::Http {
                client,
                base_url: cfg
                    .setting_str("base_url")
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                access_key,
                languages: cfg.setting_str("languages").unwrap_or("en").to_string(),
            },
            limit: cfg.setting_u64("limit").unwrap_or(DEFAULT_LIMIT).clamp(1, 100),
        })
    }

    fn parse_page(body: &str) -> Result<FetchPage, FetchError> {
        let t0 = Instant::now();
        let resp: NewsResponse = parse_json(body, PROVIDER)?;
        if let Some(e) = resp.error {
            let msg = format!(
                "{PROVIDER}: {} {}",
                e.code,
                e.message.unwrap_or_default()
            );
            // Quota and rate errors clear up on their own.
            let err = match e.code.as_str() {
                "rate_limit_reached" | "usage_limit_reached" => FetchError::transient(msg),
                _ => FetchError::permanent(msg),
            };
            provider_error(PROVIDER, &err);
            return Err(err);
        }

        let next_cursor = resp.pagination.and_then(|p| {
            let next = p.offset + p.count;
            (p.count > 0 && p.count >= p.limit && next < p.total).then(|| next.to_string())
        });

        let records: Vec<RawRecord> = resp
            .data
            .into_iter()
            .map(|a| {
                let raw = serde_json::to_value(&a).unwrap_or_default();
                RawRecord {
                    native_id: None,
                    title: a.title.unwrap_or_default(),
                    url: a.url,
                    image_urls: a.image.into_iter().collect(),
                    published_at: a.published_at,
                    summary: a.description,
                    raw,
                }
            })
            .collect();
        record_parsed(PROVIDER, records.len(), t0);
        Ok(FetchPage {
            records,
            next_cursor,
        })
    }
}

#[async_trait]
impl SourceAdapter for MediastackAdapter {
    async fn fetch_page(
        &self,
        query: &FetchQuery,
        cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        match &self.mode {
            Mode::Fixture(pages) => Self::parse_page(pages.body(cursor, PROVIDER)?),
            Mode::Http {
                client,
                base_url,
                access_key,
                languages,
            } => {
                require_keywords(query, PROVIDER)?;
                let offset = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(0);
                let keywords = query
                    .keywords
                    .iter()
                    .map(String::as_str)
                    .collect::<Vec<_>>()
                    .join(",");
                let mut params: Vec<(&str, String)> = vec![
                    ("access_key", access_key.clone()),
                    ("keywords", keywords),
                    ("languages", languages.clone()),
                    ("sort", "published_desc".to_string()),
                    ("limit", self.limit.to_string()),
                    ("offset", offset.to_string()),
                ];
                if let Some(since) = query.since {
                    params.push((
                        "date",
                        format!(
                            "{},{}",
                            since.format("%Y-%m-%d"),
                            Utc::now().format("%Y-%m-%d")
                        ),
                    ));
                }
                let req = client.get(format!("{base_url}/news")).query(&params);
                let body = get_text(req, PROVIDER).await?;
                Self::parse_page(&body)
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
