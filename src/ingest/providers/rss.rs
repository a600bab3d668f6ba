// src/ingest/providers/rss.rs
use std::time::Instant;

use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::{Deserialize, Serialize};

use super::{get_text, provider_error, record_parsed, FixturePages};
use crate::error::FetchError;
use crate::ingest::normalize::{extract_image_urls, matching_keywords, normalize_text, parse_timestamp};
use crate::ingest::types::{FetchPage, FetchQuery, RawRecord, SourceAdapter, SourceConfig};

const PROVIDER: &str = "rss";
const DEFAULT_MAX_ITEMS: usize = 50;

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<Item>,
}

/// Namespaced elements (`content:encoded`, `media:*`) match on their local name.
#[derive(Debug, Deserialize, Serialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
    #[serde(rename = "encoded")]
    content_encoded: Option<String>,
    #[serde(default)]
    enclosure: Vec<MediaRef>,
    #[serde(rename = "thumbnail", default)]
    media_thumbnail: Vec<MediaRef>,
    #[serde(rename = "content", default)]
    media_content: Vec<MediaRef>,
}

#[derive(Debug, Deserialize, Serialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
struct MediaRef {
    #[serde(rename = "@url")]
    url: Option<String>,
    #[serde(rename = "@type")]
    mime: Option<String>,
    #[serde(rename = "@medium")]
    medium: Option<String>,
}

impl MediaRef {
    /// Untyped references count as images; typed ones must say so.
    fn image_url(&self) -> Option<&str> {
        let typed_other = self
            .mime
            .as_deref()
            .is_some_and(|m| !m.starts_with("image/"))
            || self.medium.as_deref().is_some_and(|m| m != "image");
        if typed_other {
            return None;
        }
        self.url.as_deref()
    }
}

impl Item {
    fn images(&self) -> Vec<String> {
        let mut out: Vec<String> = self
            .enclosure
            .iter()
            .chain(&self.media_thumbnail)
            .chain(&self.media_content)
            .filter_map(MediaRef::image_url)
            .map(str::to_string)
            .collect();
        for html in [&self.description, &self.content_encoded].into_iter().flatten() {
            out.extend(extract_image_urls(html));
        }
        out
    }
}

enum Mode {
    Fixture(FixturePages),
    Http { client: reqwest::Client, url: String },
}

/// RSS 2.0 feed. Single page; items must mention at least one keyword
/// unless the source has none configured.
pub struct RssAdapter {
    mode: Mode,
    max_items: usize,
}

impl RssAdapter {
    pub fn from_fixture(xml: impl Into<String>) -> Self {
        Self {
            mode: Mode::Fixture(FixturePages::single(xml)),
            max_items: DEFAULT_MAX_ITEMS,
        }
    }

    pub fn from_config(cfg: &SourceConfig, client: reqwest::Client) -> Result<Self, FetchError> {
        let url = cfg
            .setting_str("url")
            .map(str::to_string)
            .ok_or_else(|| FetchError::permanent(format!("source {}: rss feed url missing", cfg.id)))?;
        Ok(Self {
            mode: Mode::Http { client, url },
            max_items: cfg
                .setting_u64("max_items")
                .map(|n| n as usize)
                .unwrap_or(DEFAULT_MAX_ITEMS),
        })
    }

    pub fn with_max_items(mut self, n: usize) -> Self {
        self.max_items = n;
        self
    }

    fn parse_items(&self, xml: &str, query: &FetchQuery) -> Result<Vec<RawRecord>, FetchError> {
        let t0 = Instant::now();
        let xml_clean = scrub_html_entities_for_xml(xml);
        let rss: Rss = from_str(&xml_clean).map_err(|e| {
            let err = FetchError::permanent(format!("{PROVIDER}: parsing feed xml: {e}"));
            provider_error(PROVIDER, &err);
            err
        })?;

        let mut out = Vec::new();
        for it in rss.channel.items {
            if out.len() >= self.max_items {
                break;
            }
            let title = it.title.clone().unwrap_or_default();
            if !query.keywords.is_empty() {
                let text = format!(
                    "{} {}",
                    title,
                    normalize_text(it.description.as_deref().unwrap_or_default())
                );
                if matching_keywords(&text, &query.keywords).is_empty() {
                    continue;
                }
            }
            if let (Some(since), Some(published)) =
                (query.since, it.pub_date.as_deref().and_then(parse_timestamp))
            {
                if published < since {
                    continue;
                }
            }

            let native_id = it
                .guid
                .as_ref()
                .and_then(|g| g.value.clone())
                .or_else(|| it.link.clone());
            out.push(RawRecord {
                native_id,
                title,
                url: it.link.clone(),
                image_urls: it.images(),
                published_at: it.pub_date.clone(),
                summary: it.description.clone().or_else(|| it.content_encoded.clone()),
                raw: serde_json::to_value(&it).unwrap_or_default(),
            });
        }

        record_parsed(PROVIDER, out.len(), t0);
        Ok(out)
    }
}

#[async_trait]
impl SourceAdapter for RssAdapter {
    async fn fetch_page(
        &self,
        query: &FetchQuery,
        _cursor: Option<&str>,
    ) -> Result<FetchPage, FetchError> {
        let records = match &self.mode {
            Mode::Fixture(pages) => self.parse_items(pages.body(None, PROVIDER)?, query)?,
            Mode::Http { client, url } => {
                let body = get_text(client.get(url.as_str()), PROVIDER).await?;
                self.parse_items(&body, query)?
            }
        };
        Ok(FetchPage::last(records))
    }

    fn name(&self) -> &str {
        PROVIDER
    }
}

/// HTML named entities are not defined in XML; map the common ones first.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
        .replace("&hellip;", "...")
}
