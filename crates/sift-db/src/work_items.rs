//! Work-item store implementation.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{Pool, Postgres, Row};
use uuid::Uuid;

use sift_core::{Error, Result, WorkItem, WorkItemKind, WorkItemStore, WorkStatus};

/// PostgreSQL implementation of [`WorkItemStore`].
pub struct PgWorkItemStore {
    pool: Pool<Postgres>,
}

const SELECT_COLUMNS: &str = "id, path, name, kind, extension, size, status, progress, \
     error_message, retry_count, added_at, updated_at";

impl PgWorkItemStore {
    /// Create a new store backed by the given connection pool.
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Parse a work-item row into a WorkItem struct.
    fn parse_row(row: sqlx::postgres::PgRow) -> WorkItem {
        let status: String = row.get("status");
        let kind: String = row.get("kind");
        WorkItem {
            id: row.get("id"),
            path: row.get("path"),
            name: row.get("name"),
            kind: WorkItemKind::from_str_or_file(&kind),
            extension: row.get("extension"),
            size: row.get("size"),
            status: WorkStatus::from_str_or_pending(&status),
            progress: row.get("progress"),
            error_message: row.get("error_message"),
            retry_count: row.get("retry_count"),
            added_at: row.get("added_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl WorkItemStore for PgWorkItemStore {
    async fn load_all(&self) -> Result<Vec<WorkItem>> {
        // UUIDv7 ids are time-ordered, so this is enqueue order.
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items ORDER BY id ASC"
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.into_iter().map(Self::parse_row).collect())
    }

    async fn get(&self, id: Uuid) -> Result<Option<WorkItem>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn get_by_path(&self, path: &str) -> Result<Option<WorkItem>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM work_items WHERE path = $1"
        ))
        .bind(path)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.map(Self::parse_row))
    }

    async fn apply_enqueue(&self, inserts: &[WorkItem], resets: &[Uuid]) -> Result<()> {
        if inserts.is_empty() && resets.is_empty() {
            return Ok(());
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(Error::Database)?;

        for item in inserts {
            sqlx::query(
                "INSERT INTO work_items
                     (id, path, name, kind, extension, size, status, progress,
                      error_message, retry_count, added_at, updated_at)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)",
            )
            .bind(item.id)
            .bind(&item.path)
            .bind(&item.name)
            .bind(item.kind.as_str())
            .bind(&item.extension)
            .bind(item.size)
            .bind(item.status.as_str())
            .bind(item.progress)
            .bind(&item.error_message)
            .bind(item.retry_count)
            .bind(item.added_at)
            .bind(item.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        for id in resets {
            sqlx::query(
                "UPDATE work_items
                 SET status = 'pending', progress = 0, error_message = NULL, updated_at = $1
                 WHERE id = $2",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn set_status(&self, id: Uuid, status: WorkStatus, error: Option<&str>) -> Result<()> {
        sqlx::query(
            "UPDATE work_items
             SET status = $1, error_message = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(status.as_str())
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn set_progress(&self, id: Uuid, progress: i32) -> Result<()> {
        sqlx::query("UPDATE work_items SET progress = $1, updated_at = $2 WHERE id = $3")
            .bind(progress)
            .bind(Utc::now())
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn mark_retry(&self, id: Uuid, retry_count: i32, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE work_items
             SET status = 'pending', progress = 0, retry_count = $1,
                 error_message = $2, updated_at = $3
             WHERE id = $4",
        )
        .bind(retry_count)
        .bind(error)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }

    async fn reset_to_pending(&self, ids: &[Uuid]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(Error::Database)?;
        let now = Utc::now();

        for id in ids {
            sqlx::query(
                "UPDATE work_items
                 SET status = 'pending', progress = 0, updated_at = $1
                 WHERE id = $2",
            )
            .bind(now)
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(Error::Database)?;
        }

        tx.commit().await.map_err(Error::Database)?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM work_items WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;
        Ok(())
    }

    async fn delete_not_completed(&self) -> Result<i64> {
        let result = sqlx::query("DELETE FROM work_items WHERE status <> 'completed'")
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }

    async fn reset_orphaned_analyzing(&self) -> Result<i64> {
        let result = sqlx::query(
            "UPDATE work_items
             SET status = 'pending', progress = 0, updated_at = $1
             WHERE status = 'analyzing'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(result.rows_affected() as i64)
    }
}
