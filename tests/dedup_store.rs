// tests/dedup_store.rs
//
// Insert / update / duplicate decisions against the in-memory store,
// including concurrent writers on one fingerprint.

use std::sync::Arc;

use chrono::{TimeZone, Utc};
use content_aggregator::ingest::classify::Category;
use content_aggregator::ingest::dedup::{dedup_and_store, Classification};
use content_aggregator::ingest::normalize::normalize_record;
use content_aggregator::store::{ContentStore, MemoryStore, PageRequest, RecordFilter};
use content_aggregator::{ContentRecord, RawRecord};

fn record(title: &str, url: &str, images: &[&str], summary: Option<&str>) -> ContentRecord {
    let raw = RawRecord {
        title: title.into(),
        url: Some(url.into()),
        image_urls: images.iter().map(|s| s.to_string()).collect(),
        published_at: Some("2025-05-01T08:00:00Z".into()),
        summary: summary.map(str::to_string),
        ..Default::default()
    };
    let fetched = Utc.with_ymd_and_hms(2025, 5, 1, 12, 0, 0).unwrap();
    normalize_record(raw, "gnews", &Default::default(), fetched).unwrap()
}

#[tokio::test]
async fn reprocessing_the_same_record_is_idempotent() {
    let store = MemoryStore::new();
    let r = record("Labubu restock", "https://toys.example/a", &["https://img.example/1.jpg"], None);

    assert_eq!(dedup_and_store(&store, r.clone()).await.unwrap(), Classification::Inserted);
    for _ in 0..3 {
        assert_eq!(dedup_and_store(&store, r.clone()).await.unwrap(), Classification::Duplicate);
    }
    assert_eq!(store.len(), 1);
    let stored = store.find_by_fingerprint(&r.fingerprint).await.unwrap().unwrap();
    assert_eq!(stored, r);
}

#[tokio::test]
async fn new_images_revised_title_or_new_summary_update_in_place() {
    let store = MemoryStore::new();
    let url = "https://toys.example/a";
    let first = record("Labubu restock", url, &["https://img.example/1.jpg"], None);
    dedup_and_store(&store, first.clone()).await.unwrap();

    // Same tracking-free URL, new image: union, existing order first.
    let more = record(
        "Labubu restock",
        "https://toys.example/a?utm_source=x",
        &["https://img.example/2.jpg", "https://img.example/1.jpg"],
        None,
    );
    assert_eq!(dedup_and_store(&store, more).await.unwrap(), Classification::Updated);

    // Punctuation-only title change is not a revision.
    let same = record("Labubu restock!", url, &[], None);
    assert_eq!(dedup_and_store(&store, same).await.unwrap(), Classification::Duplicate);

    let summarized = record("Labubu restock", url, &[], Some("Now in 40 stores."));
    assert_eq!(dedup_and_store(&store, summarized).await.unwrap(), Classification::Updated);

    let revised = record("Labubu restock delayed", url, &[], None);
    assert_eq!(dedup_and_store(&store, revised).await.unwrap(), Classification::Updated);

    let stored = store.find_by_fingerprint(&first.fingerprint).await.unwrap().unwrap();
    assert_eq!(
        stored.image_urls,
        vec!["https://img.example/1.jpg", "https://img.example/2.jpg"]
    );
    assert_eq!(stored.title, "Labubu restock delayed");
    assert_eq!(stored.summary.as_deref(), Some("Now in 40 stores."));
    assert_eq!(store.len(), 1);

    // Score follows the merged content: 50 + 42 fresh + 2 images + 17 summary chars.
    assert_eq!(first.hot_score, 95.0);
    assert_eq!(stored.hot_score, 98.17);
    assert_eq!(stored.category, Category::NewRelease);
}

#[tokio::test]
async fn image_list_never_exceeds_cap_through_updates() {
    let store = MemoryStore::new();
    let url = "https://toys.example/gallery";
    for batch in [[1, 2, 3], [4, 5, 6], [7, 8, 9]] {
        let imgs: Vec<String> = batch.iter().map(|i| format!("https://img.example/{i}.jpg")).collect();
        let refs: Vec<&str> = imgs.iter().map(String::as_str).collect();
        dedup_and_store(&store, record("Gallery", url, &refs, None)).await.unwrap();
    }
    let all = store
        .list_records(&RecordFilter::default(), PageRequest::default())
        .await
        .unwrap();
    assert_eq!(all.len(), 1);
    assert_eq!(all[0].image_urls.len(), 5);
    assert_eq!(all[0].image_urls[0], "https://img.example/1.jpg");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_on_one_fingerprint_leave_one_row() {
    let store = Arc::new(MemoryStore::new());
    let r = record("Labubu restock", "https://toys.example/race", &[], None);

    let mut tasks = Vec::new();
    for _ in 0..16 {
        let store = Arc::clone(&store);
        let r = r.clone();
        tasks.push(tokio::spawn(async move { dedup_and_store(&*store, r).await }));
    }
    let mut inserted = 0;
    for t in tasks {
        match t.await.unwrap().unwrap() {
            Classification::Inserted => inserted += 1,
            Classification::Duplicate => {}
            Classification::Updated => panic!("identical record must not update"),
        }
    }
    assert_eq!(inserted, 1);
    assert_eq!(store.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_writers_with_different_images_merge() {
    let store = Arc::new(MemoryStore::new());
    let url = "https://toys.example/race-images";
    let a = record("Labubu", url, &["https://img.example/a.jpg"], None);
    let b = record("Labubu", url, &["https://img.example/b.jpg"], None);

    let (ra, rb) = tokio::join!(
        tokio::spawn({
            let s = Arc::clone(&store);
            async move { dedup_and_store(&*s, a).await }
        }),
        tokio::spawn({
            let s = Arc::clone(&store);
            async move { dedup_and_store(&*s, b).await }
        }),
    );
    let outcomes = [ra.unwrap().unwrap(), rb.unwrap().unwrap()];
    assert_eq!(
        outcomes.iter().filter(|c| **c == Classification::Inserted).count(),
        1
    );
    assert_eq!(store.len(), 1);

    let all = store
        .list_records(&RecordFilter::default(), PageRequest::default())
        .await
        .unwrap();
    let mut imgs = all[0].image_urls.clone();
    imgs.sort();
    assert_eq!(imgs, vec!["https://img.example/a.jpg", "https://img.example/b.jpg"]);
}
