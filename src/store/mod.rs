// src/store/mod.rs
//! Persistence contracts the engine consumes.
//!
//! The engine needs three things from storage: content rows with an atomic
//! upsert keyed by fingerprint, the source configuration table, and a run log.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod sources;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ingest::classify::Category;
use crate::ingest::run::CrawlRun;
use crate::ingest::types::{ContentRecord, SourceConfig};

pub use memory::{MemorySourceRepository, MemoryStore};
pub use sources::FileSourceRepository;

pub const MAX_PER_PAGE: u32 = 200;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RecordFilter {
    pub source_id: Option<String>,
    /// Case-insensitive match on title or tags.
    pub keyword: Option<String>,
    pub since: Option<DateTime<Utc>>,
    pub category: Option<Category>,
}

impl RecordFilter {
    pub fn matches(&self, r: &ContentRecord) -> bool {
        if let Some(s) = &self.source_id {
            if &r.source_id != s {
                return false;
            }
        }
        if let Some(k) = self.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            let k = k.to_lowercase();
            let in_title = r.title.to_lowercase().contains(&k);
            let in_tags = r.tags.iter().any(|t| t.to_lowercase() == k);
            if !in_title && !in_tags {
                return false;
            }
        }
        if let Some(since) = self.since {
            if r.sort_ts() < since {
                return false;
            }
        }
        if let Some(c) = self.category {
            if r.category != c {
                return false;
            }
        }
        true
    }
}

/// 1-based page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub page: u32,
    pub per_page: u32,
}

impl Default for PageRequest {
    fn default() -> Self {
        Self {
            page: 1,
            per_page: 20,
        }
    }
}

impl PageRequest {
    pub fn new(page: u32, per_page: u32) -> Self {
        Self {
            page: page.max(1),
            per_page: per_page.clamp(1, MAX_PER_PAGE),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page.max(1) as usize - 1) * self.limit()
    }

    pub fn limit(&self) -> usize {
        self.per_page.clamp(1, MAX_PER_PAGE) as usize
    }
}

#[async_trait::async_trait]
pub trait ContentStore: Send + Sync {
    /// Insert, or merge mutable fields into the existing row, atomically per
    /// fingerprint. Never creates a second row for a fingerprint.
    async fn upsert_by_fingerprint(&self, record: ContentRecord)
        -> Result<UpsertOutcome, StoreError>;

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ContentRecord>, StoreError>;

    /// Newest first: `published_at` falling back to `fetched_at`, then
    /// insertion order descending.
    async fn list_records(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<Vec<ContentRecord>, StoreError>;
}

#[async_trait::async_trait]
pub trait SourceRepository: Send + Sync {
    async fn list_sources(&self) -> Result<Vec<SourceConfig>, StoreError>;

    async fn enabled_sources(&self) -> Result<Vec<SourceConfig>, StoreError> {
        Ok(self
            .list_sources()
            .await?
            .into_iter()
            .filter(|s| s.enabled)
            .collect())
    }
}

#[async_trait::async_trait]
pub trait RunStore: Send + Sync {
    /// Insert or replace the run snapshot with the same id.
    async fn save_run(&self, run: &CrawlRun) -> Result<(), StoreError>;

    async fn last_run(&self) -> Result<Option<CrawlRun>, StoreError>;

    /// `started_at` of the latest completed run in which `source_id` succeeded.
    async fn last_successful_fetch(
        &self,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError>;
}
