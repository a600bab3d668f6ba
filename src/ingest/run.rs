// src/ingest/run.rs
//! `CrawlRun` and its per-source report.

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ingest::dedup::Classification;

const TRENDING_TOP: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceStatus {
    Pending,
    Succeeded,
    Failed,
    TimedOut,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceReport {
    pub fetched: u64,
    /// `inserted + updated`
    pub accepted: u64,
    pub inserted: u64,
    pub updated: u64,
    pub duplicates: u64,
    pub failed_records: u64,
    pub pages: u64,
    pub retries: u64,
    pub status: SourceStatus,
    pub error: Option<String>,
}

impl Default for SourceReport {
    fn default() -> Self {
        Self {
            fetched: 0,
            accepted: 0,
            inserted: 0,
            updated: 0,
            duplicates: 0,
            failed_records: 0,
            pages: 0,
            retries: 0,
            status: SourceStatus::Pending,
            error: None,
        }
    }
}

impl SourceReport {
    pub fn record(&mut self, c: Classification) {
        match c {
            Classification::Inserted => {
                self.inserted += 1;
                self.accepted += 1;
            }
            Classification::Updated => {
                self.updated += 1;
                self.accepted += 1;
            }
            Classification::Duplicate => self.duplicates += 1,
        }
    }

    pub fn is_final(&self) -> bool {
        self.status != SourceStatus::Pending
    }

    fn absorb(&mut self, other: &SourceReport) {
        self.fetched += other.fetched;
        self.accepted += other.accepted;
        self.inserted += other.inserted;
        self.updated += other.updated;
        self.duplicates += other.duplicates;
        self.failed_records += other.failed_records;
        self.pages += other.pages;
        self.retries += other.retries;
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeywordCount {
    pub keyword: String,
    pub mentions: u64,
}

/// One execution of the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CrawlRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub requested_sources: Option<BTreeSet<String>>,
    pub sources: BTreeMap<String, SourceReport>,
    #[serde(default)]
    pub trending: Vec<KeywordCount>,
    pub error: Option<String>,
}

impl CrawlRun {
    pub fn new(requested_sources: Option<BTreeSet<String>>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Pending,
            requested_sources,
            sources: BTreeMap::new(),
            trending: Vec::new(),
            error: None,
        }
    }

    /// `pending → running` with one pending entry per dispatched source.
    pub fn begin<I: IntoIterator<Item = String>>(&mut self, source_ids: I) {
        for id in source_ids {
            self.sources.entry(id).or_default();
        }
        self.status = RunStatus::Running;
    }

    pub fn skip_source(&mut self, id: &str, reason: &str) {
        let r = self.sources.entry(id.to_string()).or_default();
        r.status = SourceStatus::Skipped;
        r.error = Some(reason.to_string());
    }

    /// Mark every source still pending as timed out.
    pub fn expire_pending(&mut self, reason: &str) -> usize {
        let mut n = 0;
        for r in self.sources.values_mut().filter(|r| !r.is_final()) {
            r.status = SourceStatus::TimedOut;
            r.error = Some(reason.to_string());
            n += 1;
        }
        n
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.finished_at = Some(Utc::now());
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.error = Some(error.into());
        self.finished_at = Some(Utc::now());
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.status, RunStatus::Completed | RunStatus::Failed)
    }

    pub fn source_succeeded(&self, id: &str) -> bool {
        self.status == RunStatus::Completed
            && self
                .sources
                .get(id)
                .is_some_and(|r| r.status == SourceStatus::Succeeded)
    }

    /// Sum of all per-source counters; status/error are left at defaults.
    pub fn totals(&self) -> SourceReport {
        let mut t = SourceReport::default();
        for r in self.sources.values() {
            t.absorb(r);
        }
        t
    }

    pub fn set_trending(&mut self, mentions: &BTreeMap<String, u64>) {
        let mut v: Vec<KeywordCount> = mentions
            .iter()
            .map(|(k, n)| KeywordCount {
                keyword: k.clone(),
                mentions: *n,
            })
            .collect();
        v.sort_by(|a, b| b.mentions.cmp(&a.mentions).then_with(|| a.keyword.cmp(&b.keyword)));
        v.truncate(TRENDING_TOP);
        self.trending = v;
    }
}
