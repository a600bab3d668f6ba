// src/ingest/providers/youtube.rs
use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use super::{api_timestamp, get_text, or_query, parse_json, record_parsed, require_keywords, FixturePages};
use crate::error::FetchError;
use crate::ingest::types::{FetchPage, FetchQuery, RawRecord, SourceAdapter, SourceConfig};

const PROVIDER: &str = "youtube";
const DEFAULT_BASE_URL: &str = "https://www.googleapis.com/youtube/v3";

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
    #[serde(default)]
    items: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct SearchItem {
    id: ItemId,
    snippet: Snippet,
}

#[derive(Debug, Deserialize)]
struct ItemId {
    #[serde(rename = "videoId")]
    video_id: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Snippet {
    title: Option<String>,
    description: Option<String>,
    #[serde(rename = "publishedAt")]
    published_at: Option<String>,
    #[serde(default)]
    thumbnails: Thumbnails,
}

#[derive(Debug, Default, Deserialize)]
struct Thumbnails {
    maxres: Option<Thumb>,
    standard: Option<Thumb>,
    high: Option<Thumb>,
    medium: Option<Thumb>,
    default: Option<Thumb>,
}

#[derive(Debug, Deserialize)]
struct Thumb {
    url: String,
}

impl Thumbnails {
    fn best(self) -> Option<String> {
        self.maxres
            .or(self.standard)
            .or(self.high)
            .or(self.medium)
            .or(self.default)
            .map(|t| t.url)
    }
}

pub fn watch_url(video_id: &str) -> String {
    format!("https://www.youtube.com/watch?v={video_id}")
}

enum Mode {
    Fixture(FixturePages),
    Http {
        client: reqwest::Client,
        base_url: String,
        key: String,
        order: String,
    },
}

/// YouTube Data API `search` for videos. Cursor is `nextPageToken`.
pub struct YouTubeAdapter {
    mode: Mode,
    max_results: u64,
}

impl YouTubeAdapter {
    pub fn from_fixture(pages: FixturePages) -> Self {
        Self {
            mode: Mode::Fixture(pages),
            max_results: 10,
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Result<Self, FetchError> {
        let key = cfg.credential("api_key", "YOUTUBE_API_KEY")?;
        Ok(Self {
            mode: Mode::Http {
                client,
                base_url: cfg
                    .setting_str("base_url")
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                key,
                order: cfg.setting_str("order").unwrap_or("relevance").to_string(),
            },
            max_results: cfg.setting_u64("max_results").unwrap_or(10).clamp(1, 50),
        })
    }

    fn parse_page(body: &str) -> Result<FetchPage, FetchError> {
        let t0 = Instant::now();
        let resp: SearchResponse = parse_json(body, PROVIDER)?;

        let mut records = Vec::with_capacity(resp.items.len());
        for raw in resp.items {
            let Ok(item) = serde_json::from_value::<SearchItem>(raw.clone()) else {
                continue;
            };
            // Channel and playlist hits carry no videoId.
            let Some(video_id) = item.id.video_id else {
                continue;
            };
            records.push(RawRecord {
                url: Some(watch_url(&video_id)),
                native_id: Some(video_id),
                title: item.snippet.title.unwrap_or_default(),
                image_urls: item.snippet.thumbnails.best().into_iter().collect(),
                published_at: item.snippet.published_at,
                summary: item.snippet.description.filter(|d| !d.trim().is_empty()),
                raw,
            });
        }
        record_parsed(PROVIDER, records.len(), t0);

        Ok(FetchPage {
            records,
            next_cursor: resp.next_page_token.filter(|t| !t.is_empty()),
        })
    }
}

#[async_trait]
impl SourceAdapter for YouTubeAdapter {
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
                key,
                order,
            } => {
                require_keywords(query, PROVIDER)?;
                let mut params: Vec<(&str, String)> = vec![
                    ("part", "snippet".to_string()),
                    ("type", "video".to_string()),
                    ("q", or_query(&query.keywords).replace(" OR ", "|")),
                    ("maxResults", self.max_results.to_string()),
                    ("order", order.clone()),
                    ("key", key.clone()),
                ];
                if let Some(token) = cursor {
                    params.push(("pageToken", token.to_string()));
                }
                if let Some(since) = query.since {
                    params.push(("publishedAfter", api_timestamp(since)));
                }
                let req = client.get(format!("{base_url}/search")).query(&params);
                let body = get_text(req, PROVIDER).await?;
                Self::parse_page(&body)
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
