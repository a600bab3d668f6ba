// src/ingest/normalize.rs
//! Field canonicalization and fingerprinting.
//!
//! The fingerprint is the dedup key: `sha256("url|" + host + path [+ query])`
//! over the lower-cased, tracking-free URL, or, when a record has no usable
//! URL, `sha256("title|" + title key + "|" + day)`. The title fallback is a
//! heuristic: titles that differ only in punctuation or case collapse to one
//! record, anything else stays distinct.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use sha2::{Digest, Sha256};
use time::{format_description::well_known::Rfc2822, OffsetDateTime};
use url::Url;

use crate::error::NormalizeError;
use crate::ingest::classify::{classify, Category};
use crate::ingest::types::{ContentRecord, RawRecord};

pub const MAX_IMAGES: usize = 5;
const MAX_TITLE_CHARS: usize = 500;
const SUMMARY_CHARS: usize = 150;

static RE_TAGS: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?is)</?[^>]+>").expect("tag regex"));
static RE_WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace regex"));
static RE_IMG: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<img[^>]+src=["']([^"'>]+)["'][^>]*>"#).expect("img regex")
});
static RE_OG_IMAGE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)<meta[^>]+property=["']og:image["'][^>]+content=["']([^"'>]+)["'][^>]*>"#)
        .expect("og:image regex")
});

/// Decode entities, strip tags, ASCII-fy smart quotes, collapse whitespace.
pub fn normalize_text(s: &str) -> String {
    let decoded = html_escape::decode_html_entities(s);
    let untagged = RE_TAGS.replace_all(&decoded, " ");
    let quoted = untagged
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'")
        .replace('\u{00A0}', " ");
    RE_WS.replace_all(&quoted, " ").trim().to_string()
}

pub fn normalize_title(s: &str) -> String {
    let out = normalize_text(s);
    if out.chars().count() > MAX_TITLE_CHARS {
        return out.chars().take(MAX_TITLE_CHARS).collect();
    }
    out
}

/// Plain-text summary capped at 150 chars with a trailing ellipsis.
pub fn summarize(content: &str) -> Option<String> {
    let text = normalize_text(content);
    if text.is_empty() {
        return None;
    }
    if text.chars().count() > SUMMARY_CHARS {
        let head: String = text.chars().take(SUMMARY_CHARS).collect();
        return Some(format!("{}...", head.trim_end()));
    }
    Some(text)
}

fn is_tracking_param(key: &str) -> bool {
    let k = key.to_ascii_lowercase();
    k.starts_with("utm_")
        || matches!(
            k.as_str(),
            "fbclid"
                | "gclid"
                | "dclid"
                | "msclkid"
                | "mc_cid"
                | "mc_eid"
                | "igshid"
                | "ref"
                | "ref_src"
                | "spm"
                | "si"
                | "_ga"
        )
}

/// Parse an http(s) URL, drop the fragment and tracking parameters, sort the
/// remaining query and trim a trailing `/` from non-root paths. Case is kept
/// so the stored link still resolves; fingerprinting lower-cases separately.
pub fn clean_url(raw: &str) -> Option<Url> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    let candidate = if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    };
    let mut url = Url::parse(&candidate).ok()?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return None;
    }
    url.set_fragment(None);

    let mut kept: Vec<(String, String)> = url
        .query_pairs()
        .filter(|(k, _)| !is_tracking_param(k))
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();
    kept.sort();
    if kept.is_empty() {
        url.set_query(None);
    } else {
        url.query_pairs_mut().clear().extend_pairs(kept.iter());
    }

    let path = url.path().to_string();
    if path.len() > 1 && path.ends_with('/') {
        url.set_path(path.trim_end_matches('/'));
    }
    Some(url)
}

/// Lower-cased `host + path` without `www.`, then `?query` as-is.
/// Query values are ids (`?v=dQw4w9WgXcQ`) and keep their case.
pub fn url_identity(url: &Url) -> String {
    let host = url.host_str().unwrap_or_default().to_lowercase();
    let host = host.strip_prefix("www.").unwrap_or(&host);
    let mut out = format!("{host}{}", url.path().to_lowercase());
    if let Some(q) = url.query() {
        out.push('?');
        out.push_str(q);
    }
    out
}

/// Lower-cased alphanumeric words of a title.
pub fn title_key(title: &str) -> String {
    let lowered: String = normalize_text(title)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();
    RE_WS.replace_all(&lowered, " ").trim().to_string()
}

pub fn fingerprint(url: Option<&Url>, title: &str, published_at: Option<DateTime<Utc>>) -> String {
    let key = match url {
        Some(u) => format!("url|{}", url_identity(u)),
        None => {
            let day = published_at
                .map(|d| d.format("%Y-%m-%d").to_string())
                .unwrap_or_else(|| "undated".to_string());
            format!("title|{}|{}", title_key(title), day)
        }
    };
    sha256_hex(&key)
}

fn sha256_hex(s: &str) -> String {
    use std::fmt::Write as _;
    let digest = Sha256::digest(s.as_bytes());
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

/// Coerce a provider timestamp to UTC. Accepts RFC 3339, RFC 2822,
/// `YYYY-MM-DD[ T]HH:MM:SS` (taken as UTC), a bare date, or unix seconds.
pub fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    let s = s.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    if let Ok(dt) = OffsetDateTime::parse(s, &Rfc2822) {
        return DateTime::from_timestamp(dt.unix_timestamp(), dt.nanosecond());
    }
    for fmt in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(n) = NaiveDateTime::parse_from_str(s, fmt) {
            return Some(n.and_utc());
        }
    }
    if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return d.and_hms_opt(0, 0, 0).map(|n| n.and_utc());
    }
    if let Ok(secs) = s.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0);
    }
    None
}

/// Pull candidate image URLs out of an HTML fragment (`<img src>` and
/// `og:image`), skipping icons, logos and avatars.
pub fn extract_image_urls(html: &str) -> Vec<String> {
    let mut out = Vec::new();
    for caps in RE_IMG.captures_iter(html) {
        let src = &caps[1];
        let lower = src.to_ascii_lowercase();
        if lower.contains("icon") || lower.contains("logo") || lower.contains("avatar") {
            continue;
        }
        if src.len() > 10 && (src.starts_with("http") || src.starts_with("//")) {
            out.push(src.to_string());
        }
    }
    for caps in RE_OG_IMAGE.captures_iter(html) {
        let src = &caps[1];
        if src.starts_with("http") {
            out.push(src.to_string());
        }
    }
    out
}

/// Validate, https-upgrade protocol-relative links, dedup in order, cap.
pub fn normalize_images<I, S>(urls: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for u in urls {
        let Some(url) = clean_image_url(u.as_ref()) else {
            continue;
        };
        if seen.insert(url.clone()) {
            out.push(url);
        }
        if out.len() == MAX_IMAGES {
            break;
        }
    }
    out
}

fn clean_image_url(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    let candidate = if trimmed.starts_with("//") {
        format!("https:{trimmed}")
    } else {
        trimmed.to_string()
    };
    let url = Url::parse(&candidate).ok()?;
    matches!(url.scheme(), "http" | "https").then(|| url.to_string())
}

/// Configured keywords mentioned in `text`, case-insensitively.
pub fn matching_keywords(text: &str, keywords: &BTreeSet<String>) -> Vec<String> {
    let lower = text.to_lowercase();
    keywords
        .iter()
        .filter(|k| !k.trim().is_empty() && lower.contains(&k.trim().to_lowercase()))
        .cloned()
        .collect()
}

/// Turn an adapter record into a canonical `ContentRecord`.
pub fn normalize_record(
    raw: RawRecord,
    source_id: &str,
    keywords: &BTreeSet<String>,
    fetched_at: DateTime<Utc>,
) -> Result<ContentRecord, NormalizeError> {
    let title = normalize_title(&raw.title);
    if title.is_empty() {
        return Err(NormalizeError::EmptyTitle);
    }
    let url = raw.url.as_deref().and_then(clean_url);
    let published_at = raw.published_at.as_deref().and_then(parse_timestamp);
    let summary = raw.summary.as_deref().and_then(summarize);
    let tags = matching_keywords(
        &format!("{} {}", title, summary.as_deref().unwrap_or_default()),
        keywords,
    );

    let mut record = ContentRecord {
        fingerprint: fingerprint(url.as_ref(), &title, published_at),
        source_id: source_id.to_string(),
        source_native_id: raw.native_id.filter(|id| !id.trim().is_empty()),
        title,
        url: url.map(|u| u.to_string()),
        image_urls: normalize_images(&raw.image_urls),
        published_at,
        fetched_at,
        summary,
        tags,
        raw: raw.raw,
        category: Category::default(),
        hot_score: 0.0,
    };
    classify(&mut record);
    Ok(record)
}
