// src/ingest/dedup.rs
//! New / updated / duplicate classification against stored state.

use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::ingest::classify::classify;
use crate::ingest::normalize::{title_key, MAX_IMAGES};
use crate::ingest::types::ContentRecord;
use crate::store::{ContentStore, UpsertOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Inserted,
    Updated,
    Duplicate,
}

/// True when `incoming` carries something `existing` lacks: an image not
/// stored yet, a revised title, or a summary where none was stored.
pub fn is_material_change(existing: &ContentRecord, incoming: &ContentRecord) -> bool {
    let new_images = incoming
        .image_urls
        .iter()
        .any(|u| !existing.image_urls.contains(u));
    let images_have_room = existing.image_urls.len() < MAX_IMAGES;
    let revised_title = !incoming.title.is_empty() && !same_title(&incoming.title, &existing.title);
    let new_summary = existing.summary.is_none() && incoming.summary.is_some();
    (new_images && images_have_room) || revised_title || new_summary
}

/// Apply the mutable fields of `incoming` to `existing` in place.
/// Identity fields (fingerprint, source, native id, url, fetch time) are kept.
/// Returns whether anything changed.
pub fn merge_into(existing: &mut ContentRecord, incoming: &ContentRecord) -> bool {
    if !is_material_change(existing, incoming) {
        return false;
    }
    for u in &incoming.image_urls {
        if existing.image_urls.len() >= MAX_IMAGES {
            break;
        }
        if !existing.image_urls.contains(u) {
            existing.image_urls.push(u.clone());
        }
    }
    if !incoming.title.is_empty() && !same_title(&incoming.title, &existing.title) {
        existing.title = incoming.title.clone();
    }
    if existing.summary.is_none() {
        existing.summary = incoming.summary.clone();
    }
    for t in &incoming.tags {
        if !existing.tags.contains(t) {
            existing.tags.push(t.clone());
        }
    }
    if existing.published_at.is_none() {
        existing.published_at = incoming.published_at;
    }
    classify(existing);
    true
}

/// Titles that normalize to the same key are not a revision.
pub fn same_title(a: &str, b: &str) -> bool {
    title_key(a) == title_key(b)
}

/// Read-then-write dedup for one record. The read skips the write for plain
/// duplicates; the store's atomic upsert decides the final outcome, so a
/// concurrent writer on the same fingerprint degrades to updated/duplicate
/// instead of a second row or an error.
pub async fn dedup_and_store(
    store: &dyn ContentStore,
    record: ContentRecord,
) -> Result<Classification, StoreError> {
    if let Some(existing) = store.find_by_fingerprint(&record.fingerprint).await? {
        if !is_material_change(&existing, &record) {
            return Ok(Classification::Duplicate);
        }
    }
    let outcome = store.upsert_by_fingerprint(record).await?;
    Ok(match outcome {
        UpsertOutcome::Inserted => Classification::Inserted,
        UpsertOutcome::Updated => Classification::Updated,
        UpsertOutcome::Unchanged => Classification::Duplicate,
    })
}
