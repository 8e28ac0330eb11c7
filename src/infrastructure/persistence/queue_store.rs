use anyhow::{Context, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::ports::QueueStore;

/// Durable ordered-set store over the `queue_entries` table.
///
/// `pop_due` runs select-then-delete inside one transaction so concurrent
/// drainers never receive the same entry twice.
pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert(&self, queue: &str, member: &str, score: i64) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO queue_entries (queue, member, score)
            VALUES (?, ?, ?)
            ON CONFLICT(queue, member) DO UPDATE SET score = excluded.score
            "#,
        )
        .bind(queue)
        .bind(member)
        .bind(score)
        .execute(&self.pool)
        .await
        .context("Failed to insert queue entry")?;
        Ok(())
    }

    async fn pop_due(&self, queue: &str, max_score: i64, limit: usize) -> Result<Vec<String>> {
        let mut tx = self
            .pool
            .begin()
            .await
            .context("Failed to begin queue transaction")?;

        let rows = sqlx::query(
            "SELECT member FROM queue_entries WHERE queue = ? AND score <= ? \
             ORDER BY score ASC, member ASC LIMIT ?",
        )
        .bind(queue)
        .bind(max_score)
        .bind(limit as i64)
        .fetch_all(&mut *tx)
        .await
        .context("Failed to select due queue entries")?;

        let mut members = Vec::with_capacity(rows.len());
        for row in rows {
            let member: String = row.try_get("member")?;
            sqlx::query("DELETE FROM queue_entries WHERE queue = ? AND member = ?")
                .bind(queue)
                .bind(&member)
                .execute(&mut *tx)
                .await
                .context("Failed to remove popped queue entry")?;
            members.push(member);
        }

        tx.commit().await.context("Failed to commit queue pop")?;
        Ok(members)
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        let row = sqlx::query("SELECT COUNT(*) as count FROM queue_entries WHERE queue = ?")
            .bind(queue)
            .fetch_one(&self.pool)
            .await
            .context("Failed to count queue entries")?;
        let count: i64 = row.try_get("count")?;
        Ok(count as usize)
    }

    async fn remove_by_score_range(&self, queue: &str, min: i64, max: i64) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM queue_entries WHERE queue = ? AND score >= ? AND score <= ?",
        )
        .bind(queue)
        .bind(min)
        .bind(max)
        .execute(&self.pool)
        .await
        .context("Failed to remove queue entries by score")?;
        Ok(result.rows_affected())
    }
}
