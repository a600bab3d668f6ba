// src/ingest/providers/x_recent.rs
use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde::Deserialize;

use super::{api_timestamp, get_text, or_query, parse_json, record_parsed, require_keywords, FixturePages};
use crate::error::FetchError;
use crate::ingest::types::{FetchPage, FetchQuery, RawRecord, SourceAdapter, SourceConfig};

const PROVIDER: &str = "x";
const DEFAULT_BASE_URL: &str = "https://api.twitter.com/2";
const DEFAULT_SPAM_TERMS: [&str; 4] = ["buy now", "click here", "discount", "sale"];

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    data: Vec<serde_json::Value>,
    #[serde(default)]
    includes: Includes,
    meta: Option<Meta>,
}

#[derive(Debug, Default, Deserialize)]
struct Includes {
    #[serde(default)]
    media: Vec<Media>,
}

#[derive(Debug, Deserialize)]
struct Media {
    media_key: String,
    url: Option<String>,
    preview_image_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    next_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Tweet {
    id: String,
    text: String,
    created_at: Option<String>,
    attachments: Option<Attachments>,
    public_metrics: Option<PublicMetrics>,
}

#[derive(Debug, Deserialize)]
struct Attachments {
    #[serde(default)]
    media_keys: Vec<String>,
}

#[derive(Debug, Default, Deserialize)]
struct PublicMetrics {
    #[serde(default)]
    like_count: u64,
    #[serde(default)]
    retweet_count: u64,
    #[serde(default)]
    reply_count: u64,
    #[serde(default)]
    quote_count: u64,
}

impl PublicMetrics {
    fn engagement(&self) -> u64 {
        self.like_count + self.retweet_count + self.reply_count + self.quote_count
    }
}

pub fn status_url(id: &str) -> String {
    format!("https://x.com/i/web/status/{id}")
}

#[derive(Debug, Clone)]
struct Filters {
    min_engagement: u64,
    spam_terms: Vec<String>,
}

impl Default for Filters {
    fn default() -> Self {
        Self {
            min_engagement: 0,
            spam_terms: DEFAULT_SPAM_TERMS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

impl Filters {
    fn keep(&self, tweet: &Tweet) -> bool {
        let engagement = tweet
            .public_metrics
            .as_ref()
            .map(PublicMetrics::engagement)
            .unwrap_or(0);
        if engagement < self.min_engagement {
            return false;
        }
        let text = tweet.text.to_lowercase();
        !self.spam_terms.iter().any(|t| text.contains(t.as_str()))
    }
}

enum Mode {
    Fixture(FixturePages),
    Http {
        client: reqwest::Client,
        base_url: String,
        bearer: String,
        lang: Option<String>,
    },
}

/// X API v2 recent search. Cursor is `meta.next_token`.
pub struct XRecentAdapter {
    mode: Mode,
    max_results: u64,
    filters: Filters,
}

impl XRecentAdapter {
    pub fn from_fixture(pages: FixturePages) -> Self {
        Self {
            mode: Mode::Fixture(pages),
            max_results: 100,
            filters: Filters::default(),
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Result<Self, FetchError> {
        let bearer = cfg.credential("bearer_token", "X_BEARER_TOKEN")?;
        let mut filters = Filters::default();
        if let Some(n) = cfg.setting_u64("min_engagement") {
            filters.min_engagement = n;
        }
        if let Some(terms) = cfg.settings.get("spam_terms").and_then(|v| v.as_array()) {
            filters.spam_terms = terms
                .iter()
                .filter_map(|t| t.as_str())
                .map(str::to_lowercase)
                .collect();
        }
        Ok(Self {
            mode: Mode::Http {
                client,
                base_url: cfg
                    .setting_str("base_url")
                    .unwrap_or(DEFAULT_BASE_URL)
                    .trim_end_matches('/')
                    .to_string(),
                bearer,
                lang: cfg.setting_str("lang").map(str::to_string),
            },
            max_results: cfg.setting_u64("max_results").unwrap_or(100).clamp(10, 100),
            filters,
        })
    }

    fn parse_page(&self, body: &str) -> Result<FetchPage, FetchError> {
        let t0 = Instant::now();
        let resp: SearchResponse = parse_json(body, PROVIDER)?;
        let media: HashMap<&str, &str> = resp
            .includes
            .media
            .iter()
            .filter_map(|m| {
                m.url
                    .as_deref()
                    .or(m.preview_image_url.as_deref())
                    .map(|u| (m.media_key.as_str(), u))
            })
            .collect();

        let mut records = Vec::with_capacity(resp.data.len());
        for raw in &resp.data {
            let Ok(tweet) = serde_json::from_value::<Tweet>(raw.clone()) else {
                continue;
            };
            if !self.filters.keep(&tweet) {
                continue;
            }
            let image_urls = tweet
                .attachments
                .as_ref()
                .map(|a| {
                    a.media_keys
                        .iter()
                        .filter_map(|k| media.get(k.as_str()).map(|u| u.to_string()))
                        .collect()
                })
                .unwrap_or_default();
            records.push(RawRecord {
                url: Some(status_url(&tweet.id)),
                native_id: Some(tweet.id),
                title: tweet.text,
                image_urls,
                published_at: tweet.created_at,
                summary: None,
                raw: raw.clone(),
            });
        }
        record_parsed(PROVIDER, records.len(), t0);

        Ok(FetchPage {
            records,
            next_cursor: resp.meta.and_then(|m| m.next_token),
        })
    }
}

#[async_trait]
impl SourceAdapter for XRecentAdapter {
    async fn fetch_page(
        &self,
        query: &FetchQuery,
        cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        match &self.mode {
            Mode::Fixture(pages) => self.parse_page(pages.body(cursor, PROVIDER)?),
            Mode::Http {
                client,
                base_url,
                bearer,
                lang,
            } => {
                require_keywords(query, PROVIDER)?;
                let mut q = format!("({}) -is:retweet -is:reply", or_query(&query.keywords));
                if let Some(lang) = lang {
                    q.push_str(&format!(" lang:{lang}"));
                }
                let mut params: Vec<(&str, String)> = vec![
                    ("query", q),
                    ("max_results", self.max_results.to_string()),
                    ("tweet.fields", "created_at,author_id,public_metrics,attachments".into()),
                    ("expansions", "attachments.media_keys".into()),
                    ("media.fields", "media_key,type,url,preview_image_url".into()),
                    ("sort_order", "recency".into()),
                ];
                if let Some(token) = cursor {
                    params.push(("next_token", token.to_string()));
                }
                if let Some(since) = query.since {
                    // Recent search only reaches back seven days.
                    let floor = Utc::now() - Duration::days(7) + Duration::minutes(1);
                    params.push(("start_time", api_timestamp(since.max(floor))));
                }
                let req = client
                    .get(format!("{base_url}/tweets/search/recent"))
                    .bearer_auth(bearer)
                    .query(&params);
                let body = get_text(req, PROVIDER).await?;
                self.parse_page(&body)
            }
        }
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}
