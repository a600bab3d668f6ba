// src/store/memory.rs
//! In-process store for tests, demos and single-node dev runs.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, RwLock};

use chrono::{DateTime, Utc};

use crate::error::StoreError;
use crate::ingest::dedup::merge_into;
use crate::ingest::run::CrawlRun;
use crate::ingest::types::{ContentRecord, SourceConfig};
use crate::store::{
    ContentStore, PageRequest, RecordFilter, RunStore, SourceRepository, UpsertOutcome,
};

const RUN_HISTORY_CAP: usize = 100;

#[derive(Debug)]
struct Stored {
    seq: u64,
    record: ContentRecord,
}

#[derive(Debug, Default)]
struct Inner {
    records: HashMap<String, Stored>,
    next_seq: u64,
    runs: Vec<CrawlRun>,
}

/// Content rows and the run log behind one mutex. Each upsert holds the lock
/// for its whole read-merge-write, which makes it atomic per fingerprint.
#[derive(Debug, Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, StoreError> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Unavailable("memory store lock poisoned".into()))
    }

    pub fn len(&self) -> usize {
        self.lock().map(|g| g.records.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fingerprints in the order they were first inserted.
    pub fn insertion_order(&self) -> Vec<String> {
        let Ok(g) = self.lock() else {
            return Vec::new();
        };
        let mut v: Vec<(u64, &String)> = g.records.iter().map(|(k, s)| (s.seq, k)).collect();
        v.sort_by_key(|(seq, _)| *seq);
        v.into_iter().map(|(_, k)| k.clone()).collect()
    }
}

#[async_trait::async_trait]
impl ContentStore for MemoryStore {
    async fn upsert_by_fingerprint(
        &self,
        record: ContentRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut g = self.lock()?;
        if let Some(existing) = g.records.get_mut(&record.fingerprint) {
            let changed = merge_into(&mut existing.record, &record);
            return Ok(if changed {
                UpsertOutcome::Updated
            } else {
                UpsertOutcome::Unchanged
            });
        }
        let seq = g.next_seq;
        g.next_seq += 1;
        g.records
            .insert(record.fingerprint.clone(), Stored { seq, record });
        Ok(UpsertOutcome::Inserted)
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        Ok(self.lock()?.records.get(fingerprint).map(|s| s.record.clone()))
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let g = self.lock()?;
        let mut hits: Vec<&Stored> = g
            .records
            .values()
            .filter(|s| filter.matches(&s.record))
            .collect();
        hits.sort_by(|a, b| {
            b.record
                .sort_ts()
                .cmp(&a.record.sort_ts())
                .then_with(|| b.seq.cmp(&a.seq))
        });
        Ok(hits
            .into_iter()
            .skip(page.offset())
            .take(page.limit())
            .map(|s| s.record.clone())
            .collect())
    }
}

#[async_trait::async_trait]
impl RunStore for MemoryStore {
    async fn save_run(&self, run: &CrawlRun) -> Result<(), StoreError> {
        let mut g = self.lock()?;
        if let Some(slot) = g.runs.iter_mut().rev().find(|r| r.id == run.id) {
            *slot = run.clone();
            return Ok(());
        }
        g.runs.push(run.clone());
        if g.runs.len() > RUN_HISTORY_CAP {
            let excess = g.runs.len() - RUN_HISTORY_CAP;
            g.runs.drain(0..excess);
        }
        Ok(())
    }

    async fn last_run(&self) -> Result<Option<CrawlRun>, StoreError> {
        Ok(self.lock()?.runs.last().cloned())
    }

    async fn last_successful_fetch(
        &self,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        Ok(self
            .lock()?
            .runs
            .iter()
            .rev()
            .find(|r| r.source_succeeded(source_id))
            .map(|r| r.started_at))
    }
}

/// Source table held in memory; admin edits go through `upsert`/`set_enabled`.
#[derive(Debug, Default)]
pub struct MemorySourceRepository {
    sources: RwLock<Vec<SourceConfig>>,
}

impl MemorySourceRepository {
    pub fn new(sources: Vec<SourceConfig>) -> Self {
        Self {
            sources: RwLock::new(sources),
        }
    }

    pub fn upsert(&self, source: SourceConfig) {
        let mut g = self.sources.write().unwrap_or_else(|p| p.into_inner());
        match g.iter_mut().find(|s| s.id == source.id) {
            Some(slot) => *slot = source,
            None => g.push(source),
        }
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> bool {
        let mut g = self.sources.write().unwrap_or_else(|p| p.into_inner());
        match g.iter_mut().find(|s| s.id == id) {
            Some(s) => {
                s.enabled = enabled;
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl SourceRepository for MemorySourceRepository {
    async fn list_sources(&self) -> Result<Vec<SourceConfig>, StoreError> {
        self.sources
            .read()
            .map(|g| g.clone())
            .map_err(|_| StoreError::Unavailable("source table lock poisoned".into()))
    }
}
