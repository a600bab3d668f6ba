// src/ingest/providers/gnews.rs
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{api_timestamp, get_text, or_query, parse_json, record_parsed, require_keywords, FixturePages};
use crate::error::FetchError;
use crate::ingest::types::{FetchPage, FetchQuery, RawRecord, SourceAdapter, SourceConfig};

const PROVIDER: &str = "gnews";
const DEFAULT_BASE_URL: &str = "https://gnews.io/api/v4";
const DEFAULT_PAGE_SIZE: u64 = 10;

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "totalArticles", default)]
    total_articles: u64,
    #[serde(default)]
    articles: Vec<Article>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Article {
    title: Option<String>,
    description: Option<String>,
    content: Option<String>,
    url: Option<String>,
    image: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    source: Option<ArticleSource>,
}

#[derive(Debug, Deserialize, Serialize)]
struct ArticleSource {
    name: Option<String>,
    url: Option<String>,
}

enum Mode {
    Fixture(FixturePages),
    Http {
        client: reqwest::Client,
        base_url: String,
        token: String,
        lang: String,
    },
}

/// GNews `/search`. Cursor is the 1-based page number.
pub struct GNewsAdapter {
    mode: Mode,
    page_size: u64,
}

impl GNewsAdapter {
    pub fn from_fixture(pages: FixturePages) -> Self {
        Self {
            mode: Mode::Fixture(pages),
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Result<Self, FetchError> {
        let token = cfg.credential("api_key", "GNEWS_API_KEY")?;
        Ok(Self {
            mode: Mode::Http {
                client,
                base_url: cfg
                    .setting_str("base_url")
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                token,
                lang: cfg.setting_str("lang").unwrap_or("en").to_string(),
            },
            page_size: cfg.setting_u64("max").unwrap_or(DEFAULT_PAGE_SIZE).clamp(1, 100),
        })
    }

    fn parse_page(&self, body: &str, page: u64) -> Result<FetchPage, FetchError> {
        let t0 = Instant::now();
        let resp: SearchResponse = parse_json(body, PROVIDER)?;
        let full_page = resp.articles.len() as u64 >= self.page_size;
        let more = full_page && page * self.page_size < resp.total_articles;

        let records: Vec<RawRecord> = resp
            .articles
            .into_iter()
            .map(|a| {
                let raw = serde_json::to_value(&a).unwrap_or_default();
                RawRecord {
                    native_id: None,
                    title: a.title.unwrap_or_default(),
                    url: a.url,
                    image_urls: a.image.into_iter().collect(),
                    published_at: a.published_at,
                    summary: a.description.or(a.content),
                    raw,
                }
            })
            .collect();
        record_parsed(PROVIDER, records.len(), t0);

        Ok(FetchPage {
            records,
            next_cursor: more.then(|| (page + 1).to_string()),
        })
    }
}

#[async_trait]
impl SourceAdapter for GNewsAdapter {
    async fn fetch_page(
        &self,
        query: &FetchQuery,
        cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        let page = cursor.and_then(|c| c.parse::<u64>().ok()).unwrap_or(1).max(1);
        match &self.mode {
            Mode::Fixture(pages) => self.parse_page(pages.body(cursor, PROVIDER)?, page),
            Mode::Http {
                client,
                base_url,
                token,
                lang,
            } => {
                require_keywords(query, PROVIDER)?;
                let mut params: Vec<(&str, String)> = vec![
                    ("q", or_query(&query.keywords)),
                    ("lang", lang.clone()),
                    ("max", self.page_size.to_string()),
                    ("page", page.to_string()),
                    ("token", token.clone()),
                ];
                if let Some(since) = query.since {
                    params.push(("from", api_timestamp(since)));
                }
                let req = client.get(format!("{base_url}/search")).query(&params);
                let body = get_text(req, PROVIDER).await?;
                self.parse_page(&body, page)
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
