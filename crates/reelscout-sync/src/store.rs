//! Recommendation persistence with a monotonic merge on the title key.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reelscout_core::{normalize_title_key, Recommendation, RunMetadata};
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::Mutex;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("stored row is invalid: {0}")]
    InvalidRow(String),
}

#[async_trait]
pub trait RecommendationStore: Send + Sync {
    async fn run_metadata(&self, run_kind: &str) -> Result<Option<RunMetadata>, StoreError>;

    /// Insert, or merge into the row with the same normalized title.
    async fn upsert_recommendation(&self, rec: &Recommendation) -> Result<(), StoreError>;

    async fn record_run_metadata(
        &self,
        run_kind: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError>;
}

/// Conflict resolution shared by every store: the first known catalog id is kept,
/// counts and scores never decrease, sentiment and genres follow the latest run.
pub fn merge_recommendation(existing: &Recommendation, incoming: &Recommendation) -> Recommendation {
    let catalog_id = existing.catalog_id.or(incoming.catalog_id);
    let media_kind = if existing.catalog_id.is_some() {
        existing.media_kind
    } else {
        incoming.media_kind
    };
    Recommendation {
        id: existing.id,
        title: existing.title.clone(),
        catalog_id,
        media_kind,
        community: existing.community.clone(),
        thread_id: existing.thread_id.clone(),
        thread_title: existing.thread_title.clone(),
        mention_count: existing.mention_count.max(incoming.mention_count),
        total_score: existing.total_score.max(incoming.total_score),
        sentiment: incoming.sentiment,
        genres: incoming.genres.clone(),
        scraped_at: existing.scraped_at,
        updated_at: incoming.updated_at,
    }
}

pub struct PgRecommendationStore {
    pool: PgPool,
}

impl PgRecommendationStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("../../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl RecommendationStore for PgRecommendationStore {
    async fn run_metadata(&self, run_kind: &str) -> Result<Option<RunMetadata>, StoreError> {
        let row = sqlx::query(
            r#"
            SELECT run_kind, last_run_at, fingerprint
              FROM run_metadata
             WHERE run_kind = $1
            "#,
        )
        .bind(run_kind)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };
        Ok(Some(RunMetadata {
            run_kind: row.try_get("run_kind")?,
            last_run_at: row.try_get("last_run_at")?,
            fingerprint: row.try_get("fingerprint")?,
        }))
    }

    async fn upsert_recommendation(&self, rec: &Recommendation) -> Result<(), StoreError> {
        let title_key = normalize_title_key(&rec.title);
        if title_key.is_empty() {
            return Err(StoreError::InvalidRow("blank title".to_string()));
        }

        sqlx::query(
            r#"
            INSERT INTO recommendations (
                id, title, title_key, catalog_id, media_kind, community, thread_id, thread_title,
                mention_count, total_score, sentiment, genres, scraped_at, updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            ON CONFLICT (title_key) DO UPDATE SET
                catalog_id = COALESCE(recommendations.catalog_id, EXCLUDED.catalog_id),
                media_kind = CASE WHEN recommendations.catalog_id IS NULL
                                  THEN EXCLUDED.media_kind
                                  ELSE recommendations.media_kind END,
                mention_count = GREATEST(recommendations.mention_count, EXCLUDED.mention_count),
                total_score = GREATEST(recommendations.total_score, EXCLUDED.total_score),
                sentiment = EXCLUDED.sentiment,
                genres = EXCLUDED.genres,
                updated_at = EXCLUDED.updated_at
            "#,
        )
        .bind(rec.id)
        .bind(rec.title.trim())
        .bind(&title_key)
        .bind(rec.catalog_id)
        .bind(rec.media_kind.as_str())
        .bind(&rec.community)
        .bind(&rec.thread_id)
        .bind(&rec.thread_title)
        .bind(rec.mention_count)
        .bind(rec.total_score)
        .bind(rec.sentiment.as_str())
        .bind(&rec.genres)
        .bind(rec.scraped_at)
        .bind(rec.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_run_metadata(
        &self,
        run_kind: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO run_metadata (run_kind, last_run_at, fingerprint)
            VALUES ($1, $2, $3)
            ON CONFLICT (run_kind) DO UPDATE SET
                last_run_at = EXCLUDED.last_run_at,
                fingerprint = EXCLUDED.fingerprint
            "#,
        )
        .bind(run_kind)
        .bind(now)
        .bind(fingerprint)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

/// Process-local store used by dry runs and tests.
#[derive(Debug, Default)]
pub struct MemoryRecommendationStore {
    recommendations: Mutex<HashMap<String, Recommendation>>,
    runs: Mutex<HashMap<String, RunMetadata>>,
}

impl MemoryRecommendationStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_run_metadata(meta: RunMetadata) -> Self {
        let mut runs = HashMap::new();
        runs.insert(meta.run_kind.clone(), meta);
        Self {
            recommendations: Mutex::default(),
            runs: Mutex::new(runs),
        }
    }

    pub async fn get(&self, title: &str) -> Option<Recommendation> {
        self.recommendations
            .lock()
            .await
            .get(&normalize_title_key(title))
            .cloned()
    }

    pub async fn len(&self) -> usize {
        self.recommendations.lock().await.len()
    }

    pub async fn all(&self) -> Vec<Recommendation> {
        let mut rows = self
            .recommendations
            .lock()
            .await
            .values()
            .cloned()
            .collect::<Vec<_>>();
        rows.sort_by(|a, b| a.title.cmp(&b.title));
        rows
    }
}

#[async_trait]
impl RecommendationStore for MemoryRecommendationStore {
    async fn run_metadata(&self, run_kind: &str) -> Result<Option<RunMetadata>, StoreError> {
        Ok(self.runs.lock().await.get(run_kind).cloned())
    }

    async fn upsert_recommendation(&self, rec: &Recommendation) -> Result<(), StoreError> {
        let key = normalize_title_key(&rec.title);
        if key.is_empty() {
            return Err(StoreError::InvalidRow("blank title".to_string()));
        }
        let mut rows = self.recommendations.lock().await;
        let merged = match rows.get(&key) {
            Some(existing) => merge_recommendation(existing, rec),
            None => rec.clone(),
        };
        rows.insert(key, merged);
        Ok(())
    }

    async fn record_run_metadata(
        &self,
        run_kind: &str,
        fingerprint: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.runs.lock().await.insert(
            run_kind.to_string(),
            RunMetadata {
                run_kind: run_kind.to_string(),
                last_run_at: now,
                fingerprint: fingerprint.to_string(),
            },
        );
        Ok(())
    }
}
