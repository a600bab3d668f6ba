// src/ingest/classify.rs
//! Content category and hot score, derived from a record's text, tags,
//! images and age. Both are recomputed whenever a merge changes the record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ingest::types::ContentRecord;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NewRelease,
    Event,
    Review,
    CollectingGuide,
    Styling,
    Art,
    #[default]
    Trend,
}

// First match wins.
const RULES: &[(Category, &[&str])] = &[
    (
        Category::NewRelease,
        &["新品", "发布", "上市", "new release", "launch", "drop", "restock", "pre-order"],
    ),
    (
        Category::Event,
        &["活动", "展览", "发布会", "event", "exhibition", "pop-up", "popup", "convention"],
    ),
    (
        Category::Review,
        &["开箱", "评测", "测评", "unboxing", "review", "hands-on"],
    ),
    (
        Category::CollectingGuide,
        &["收藏", "攻略", "指南", "guide", "collecting", "checklist", "how to"],
    ),
    (
        Category::Styling,
        &["穿搭", "造型", "搭配", "outfit", "styling", "fashion"],
    ),
    (
        Category::Art,
        &["艺术", "创作", "设计", "artist", "artwork", "design", "illustration"],
    ),
];

impl Category {
    pub fn as_str(&self) -> &'static str {
        match self {
            Category::NewRelease => "new_release",
            Category::Event => "event",
            Category::Review => "review",
            Category::CollectingGuide => "collecting_guide",
            Category::Styling => "styling",
            Category::Art => "art",
            Category::Trend => "trend",
        }
    }

    /// Unknown names fall back to `Trend`.
    pub fn parse(s: &str) -> Self {
        match s {
            "new_release" => Category::NewRelease,
            "event" => Category::Event,
            "review" => Category::Review,
            "collecting_guide" => Category::CollectingGuide,
            "styling" => Category::Styling,
            "art" => Category::Art,
            _ => Category::Trend,
        }
    }
}

pub fn categorize(text: &str) -> Category {
    let lower = text.to_lowercase();
    // "发布会" is a launch event, not a product release.
    if lower.contains("发布会") {
        return Category::Event;
    }
    RULES
        .iter()
        .find(|(_, words)| words.iter().any(|w| lower.contains(w)))
        .map(|(c, _)| *c)
        .unwrap_or_default()
}

pub const BASE_SCORE: f64 = 50.0;

/// 50 base, plus up to 50 for freshness (minus 2 per hour of age at fetch
/// time), 5 per tag, up to 20 for summary length (1 per 100 chars) and 3
/// per image. Rounded to two decimals.
pub fn hot_score(record: &ContentRecord) -> f64 {
    score_at(record, record.fetched_at)
}

fn score_at(record: &ContentRecord, now: DateTime<Utc>) -> f64 {
    let published = record.published_at.unwrap_or(record.fetched_at);
    let hours = (now - published).num_seconds().max(0) as f64 / 3600.0;
    let fresh = (50.0 - hours * 2.0).max(0.0);
    let tags = record.tags.len() as f64 * 5.0;
    let body = record
        .summary
        .as_deref()
        .map(|s| (s.chars().count() as f64 / 100.0).min(20.0))
        .unwrap_or(0.0);
    let images = record.image_urls.len() as f64 * 3.0;
    ((BASE_SCORE + fresh + tags + body + images) * 100.0).round() / 100.0
}

/// Refresh both derived fields from the record's current content.
pub fn classify(record: &mut ContentRecord) {
    record.category = categorize(&format!(
        "{} {}",
        record.title,
        record.summary.as_deref().unwrap_or_default()
    ));
    record.hot_score = hot_score(record);
}
