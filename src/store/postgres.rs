// src/store/postgres.rs
//! Postgres-backed store. Enabled with the `postgres` feature.

use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};

use crate::error::StoreError;
use crate::ingest::classify::Category;
use crate::ingest::dedup::merge_into;
use crate::ingest::run::CrawlRun;
use crate::ingest::types::{ContentRecord, SourceConfig, SourceKind};
use crate::store::{
    ContentStore, PageRequest, RecordFilter, RunStore, SourceRepository, UpsertOutcome,
};

const RECORD_COLUMNS: &str = "fingerprint, source_id, source_native_id, title, url, image_urls, \
     published_at, fetched_at, summary, tags, raw, category, hot_score";

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    /// Wrap an existing pool. The schema must already exist.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await?;
        let store = Self::new(pool);
        store.initialize_schema().await?;
        Ok(store)
    }

    async fn initialize_schema(&self) -> Result<(), StoreError> {
        for stmt in [
            r#"
            CREATE TABLE IF NOT EXISTS content_records (
                seq BIGSERIAL,
                fingerprint TEXT PRIMARY KEY,
                source_id TEXT NOT NULL,
                source_native_id TEXT,
                title TEXT NOT NULL,
                url TEXT,
                image_urls TEXT[] NOT NULL DEFAULT '{}',
                published_at TIMESTAMPTZ,
                fetched_at TIMESTAMPTZ NOT NULL,
                summary TEXT,
                tags TEXT[] NOT NULL DEFAULT '{}',
                raw JSONB NOT NULL DEFAULT 'null',
                category TEXT NOT NULL DEFAULT 'trend',
                hot_score DOUBLE PRECISION NOT NULL DEFAULT 0
            )
            "#,
            "CREATE INDEX IF NOT EXISTS idx_content_sort ON content_records (COALESCE(published_at, fetched_at) DESC, seq DESC)",
            "CREATE INDEX IF NOT EXISTS idx_content_source ON content_records (source_id)",
            // Tables created before category and hot_score existed.
            "ALTER TABLE content_records ADD COLUMN IF NOT EXISTS category TEXT NOT NULL DEFAULT 'trend'",
            "ALTER TABLE content_records ADD COLUMN IF NOT EXISTS hot_score DOUBLE PRECISION NOT NULL DEFAULT 0",
            r#"
            CREATE TABLE IF NOT EXISTS source_configs (
                id TEXT PRIMARY KEY,
                kind TEXT NOT NULL,
                enabled BOOLEAN NOT NULL DEFAULT TRUE,
                keywords TEXT[] NOT NULL DEFAULT '{}',
                settings JSONB NOT NULL DEFAULT '{}'
            )
            "#,
            r#"
            CREATE TABLE IF NOT EXISTS crawl_runs (
                id UUID PRIMARY KEY,
                started_at TIMESTAMPTZ NOT NULL,
                status TEXT NOT NULL,
                report JSONB NOT NULL
            )
            "#,
        ] {
            sqlx::query(stmt).execute(&self.pool).await?;
        }
        Ok(())
    }
}

fn row_to_record(r: &PgRow) -> Result<ContentRecord, StoreError> {
    Ok(ContentRecord {
        fingerprint: r.try_get("fingerprint")?,
        source_id: r.try_get("source_id")?,
        source_native_id: r.try_get("source_native_id")?,
        title: r.try_get("title")?,
        url: r.try_get("url")?,
        image_urls: r.try_get("image_urls")?,
        published_at: r.try_get("published_at")?,
        fetched_at: r.try_get("fetched_at")?,
        summary: r.try_get("summary")?,
        tags: r.try_get("tags")?,
        raw: r.try_get("raw")?,
        category: Category::parse(r.try_get::<&str, _>("category")?),
        hot_score: r.try_get("hot_score")?,
    })
}

#[async_trait::async_trait]
impl ContentStore for PgStore {
    async fn upsert_by_fingerprint(
        &self,
        record: ContentRecord,
    ) -> Result<UpsertOutcome, StoreError> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO content_records
            (fingerprint, source_id, source_native_id, title, url, image_urls,
             published_at, fetched_at, summary, tags, raw, category, hot_score)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (fingerprint) DO NOTHING
            "#,
        )
        .bind(&record.fingerprint)
        .bind(&record.source_id)
        .bind(&record.source_native_id)
        .bind(&record.title)
        .bind(&record.url)
        .bind(&record.image_urls)
        .bind(record.published_at)
        .bind(record.fetched_at)
        .bind(&record.summary)
        .bind(&record.tags)
        .bind(&record.raw)
        .bind(record.category.as_str())
        .bind(record.hot_score)
        .execute(&mut *tx)
        .await?
        .rows_affected()
            == 1;

        if inserted {
            tx.commit().await?;
            return Ok(UpsertOutcome::Inserted);
        }

        // Row lock serializes concurrent merges on the same fingerprint.
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM content_records WHERE fingerprint = $1 FOR UPDATE"
        ))
        .bind(&record.fingerprint)
        .fetch_one(&mut *tx)
        .await?;
        let mut existing = row_to_record(&row)?;

        if !merge_into(&mut existing, &record) {
            tx.commit().await?;
            return Ok(UpsertOutcome::Unchanged);
        }

        sqlx::query(
            r#"
            UPDATE content_records
            SET title = $2, image_urls = $3, summary = $4, tags = $5, published_at = $6,
                category = $7, hot_score = $8
            WHERE fingerprint = $1
            "#,
        )
        .bind(&existing.fingerprint)
        .bind(&existing.title)
        .bind(&existing.image_urls)
        .bind(&existing.summary)
        .bind(&existing.tags)
        .bind(existing.published_at)
        .bind(existing.category.as_str())
        .bind(existing.hot_score)
        .execute(&mut *tx)
        .await?;
        tx.commit().await?;
        Ok(UpsertOutcome::Updated)
    }

    async fn find_by_fingerprint(
        &self,
        fingerprint: &str,
    ) -> Result<Option<ContentRecord>, StoreError> {
        let row = sqlx::query(&format!(
            "SELECT {RECORD_COLUMNS} FROM content_records WHERE fingerprint = $1"
        ))
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list_records(
        &self,
        filter: &RecordFilter,
        page: PageRequest,
    ) -> Result<Vec<ContentRecord>, StoreError> {
        let mut qb: QueryBuilder<Postgres> = QueryBuilder::new(format!(
            "SELECT {RECORD_COLUMNS} FROM content_records WHERE TRUE"
        ));
        if let Some(source_id) = &filter.source_id {
            qb.push(" AND source_id = ").push_bind(source_id.clone());
        }
        if let Some(k) = filter.keyword.as_deref().map(str::trim).filter(|k| !k.is_empty()) {
            qb.push(" AND (title ILIKE ")
                .push_bind(format!("%{k}%"))
                .push(" OR EXISTS (SELECT 1 FROM unnest(tags) t WHERE lower(t) = lower(")
                .push_bind(k.to_string())
                .push(")))");
        }
        if let Some(since) = filter.since {
            qb.push(" AND COALESCE(published_at, fetched_at) >= ")
                .push_bind(since);
        }
        if let Some(category) = filter.category {
            qb.push(" AND category = ").push_bind(category.as_str());
        }
        qb.push(" ORDER BY COALESCE(published_at, fetched_at) DESC, seq DESC LIMIT ")
            .push_bind(page.limit() as i64)
            .push(" OFFSET ")
            .push_bind(page.offset() as i64);

        let rows = qb.build().fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }
}

#[async_trait::async_trait]
impl SourceRepository for PgStore {
    async fn list_sources(&self) -> Result<Vec<SourceConfig>, StoreError> {
        let rows = sqlx::query(
            "SELECT id, kind, enabled, keywords, settings FROM source_configs ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.iter()
            .map(|r| {
                let kind: String = r.try_get("kind")?;
                let kind: SourceKind = serde_json::from_value(serde_json::Value::String(kind))?;
                let keywords: Vec<String> = r.try_get("keywords")?;
                Ok(SourceConfig {
                    id: r.try_get("id")?,
                    kind,
                    enabled: r.try_get("enabled")?,
                    keywords: keywords.into_iter().collect(),
                    settings: r.try_get("settings")?,
                })
            })
            .collect()
    }
}

#[async_trait::async_trait]
impl RunStore for PgStore {
    async fn save_run(&self, run: &CrawlRun) -> Result<(), StoreError> {
        let report = serde_json::to_value(run)?;
        let status = serde_json::to_value(run.status)?;
        sqlx::query(
            r#"
            INSERT INTO crawl_runs (id, started_at, status, report)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (id) DO UPDATE SET status = EXCLUDED.status, report = EXCLUDED.report
            "#,
        )
        .bind(run.id)
        .bind(run.started_at)
        .bind(status.as_str().unwrap_or_default())
        .bind(report)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn last_run(&self) -> Result<Option<CrawlRun>, StoreError> {
        let row = sqlx::query("SELECT report FROM crawl_runs ORDER BY started_at DESC LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        match row {
            Some(r) => {
                let report: serde_json::Value = r.try_get("report")?;
                Ok(Some(serde_json::from_value(report)?))
            }
            None => Ok(None),
        }
    }

    async fn last_successful_fetch(
        &self,
        source_id: &str,
    ) -> Result<Option<DateTime<Utc>>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT started_at FROM crawl_runs
            WHERE status = 'completed'
              AND report -> 'sources' -> $1 ->> 'status' = 'succeeded'
            ORDER BY started_at DESC
            LIMIT 1
            "#,
        )
        .bind(source_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| r.try_get("started_at"))
            .transpose()
            .map_err(StoreError::from)
    }
}
