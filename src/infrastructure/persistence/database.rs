use anyhow::{Context, Result};

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use tokio::fs;
use tracing::info;

/// Shared handle to the SQLite pool; cloned into every repository.
#[derive(Clone)]
pub struct Database {
    pub pool: SqlitePool,
}

impl Database {
    /// Opens (creating if necessary) the database at `db_url` and applies the
    /// schema. WAL mode keeps the evaluation workers and the notification
    /// processor from serializing on each other's writes.
    pub async fn new(db_url: &str) -> Result<Self> {
        Self::prepare_parent_dir(db_url).await?;

        let options = SqliteConnectOptions::from_str(db_url)
            .with_context(|| format!("Invalid database URL: {}", db_url))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        // A small pool is plenty: the engine batches its reads and the
        // queue/repository writers are short transactions.
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .with_context(|| format!("Failed to open database at {}", db_url))?;

        let db = Self { pool };
        db.init().await?;
        info!("Database ready: {}", db_url);

        Ok(db)
    }

    /// A `sqlite://path/to/file.db` URL needs its directory to exist before
    /// the driver can create the file.
    async fn prepare_parent_dir(db_url: &str) -> Result<()> {
        let Some(file_path) = db_url.strip_prefix("sqlite://") else {
            return Ok(());
        };
        match Path::new(file_path).parent() {
            Some(parent) if !parent.exists() => fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create {}", parent.display())),
            _ => Ok(()),
        }
    }

    /// Initialize database schema
    async fn init(&self) -> Result<()> {
        let mut conn = self.pool.acquire().await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS alerts (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                alert_type TEXT NOT NULL,
                condition_type TEXT NOT NULL,
                target_value TEXT NOT NULL,
                timeframe TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                notify_via TEXT NOT NULL,
                last_triggered_at INTEGER,
                created_at INTEGER NOT NULL,
                updated_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create alerts table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_alerts_enabled ON alerts(enabled)")
            .execute(&mut *conn)
            .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS notifications (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                alert_id TEXT,
                title TEXT NOT NULL,
                message TEXT NOT NULL,
                notification_type TEXT NOT NULL,
                read_at INTEGER,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create notifications table")?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_notifications_user ON notifications(user_id, created_at DESC)",
        )
        .execute(&mut *conn)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id TEXT PRIMARY KEY,
                email TEXT NOT NULL,
                phone TEXT,
                created_at INTEGER NOT NULL
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create users table")?;

        // Ordered-set store backing the notification queue and DLQ
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS queue_entries (
                queue TEXT NOT NULL,
                member TEXT NOT NULL,
                score INTEGER NOT NULL,
                PRIMARY KEY (queue, member)
            );
            "#,
        )
        .execute(&mut *conn)
        .await
        .context("Failed to create queue_entries table")?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_queue_score ON queue_entries(queue, score)")
            .execute(&mut *conn)
            .await?;

        info!("Database schema initialized");
        Ok(())
    }
}
