//! Analysis result store implementation.
//!
//! Results are addressed by content hash so byte-identical files at different
//! paths share one analysis. Tag relations are written in the same
//! transaction as the record itself.

use std::collections::HashMap;

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use sqlx::{Pool, Postgres, Row};

use sift_core::{AnalysisRecord, AnalysisStore, Error, Result, Unit};

/// PostgreSQL implementation of [`AnalysisStore`].
pub struct PgAnalysisStore {
    pool: Pool<Postgres>,
}

impl PgAnalysisStore {
    /// Create a new store backed by the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_dimensions(value: JsonValue) -> HashMap<String, f32> {
        serde_json::from_value(value).unwrap_or_default()
    }
}

#[async_trait]
impl AnalysisStore for PgAnalysisStore {
    async fn lookup_by_hash(&self, content_hash: &str) -> Result<Option<AnalysisRecord>> {
        let row = sqlx::query(
            "SELECT id, content_hash, path, quality_score, dimensions, summary, model, created_at
             FROM analyses
             WHERE content_hash = $1
             ORDER BY created_at DESC
             LIMIT 1",
        )
        .bind(content_hash)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        let Some(row) = row else {
            return Ok(None);
        };

        let id: uuid::Uuid = row.get("id");

        let tag_rows = sqlx::query(
            "SELECT tag FROM analysis_tags WHERE analysis_id = $1 ORDER BY position ASC",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Some(AnalysisRecord {
            id,
            content_hash: row.get("content_hash"),
            path: row.get("path"),
            quality_score: row.get("quality_score"),
            dimensions: Self::parse_dimensions(row.get("dimensions")),
            tags: tag_rows.into_iter().map(|r| r.get("tag")).collect(),
            summary: row.get("summary"),
            model: row.get("model"),
            created_at: row.get("created_at"),
        }))
    }

    async fn is_path_analyzed(&self, path: &str) -> Result<bool> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM analyses WHERE path = $1")
            .bind(path)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(count > 0)
    }

    async fn persist(&self, record: &AnalysisRecord) -> Result<()> {
        let dimensions = serde_json::to_value(&record.dimensions)?;

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        sqlx::query(
            "INSERT INTO analyses
                 (id, content_hash, path, quality_score, dimensions, summary, model, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
        )
        .bind(record.id)
        .bind(&record.content_hash)
        .bind(&record.path)
        .bind(record.quality_score)
        .bind(&dimensions)
        .bind(&record.summary)
        .bind(&record.model)
        .bind(record.created_at)
        .execute(&mut *tx)
        .await
        .map_err(Error::Database)?;

        for (position, tag) in record.tags.iter().enumerate() {
            sqlx::query(
                "INSERT INTO analysis_tags (analysis_id, tag, position)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (analysis_id, tag) DO NOTHING",
            )
            .bind(record.id)
            .bind(tag)
            .bind(position as i32)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn persist_unit(&self, unit: &Unit) -> Result<()> {
        sqlx::query(
            "INSERT INTO units (id, path, name, kind_label, member_count, workspace_id, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (path) DO UPDATE
                 SET kind_label = $4, member_count = $5, workspace_id = $6",
        )
        .bind(unit.id)
        .bind(&unit.path)
        .bind(&unit.name)
        .bind(&unit.kind_label)
        .bind(unit.member_count)
        .bind(unit.workspace_id)
        .bind(unit.created_at)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}
