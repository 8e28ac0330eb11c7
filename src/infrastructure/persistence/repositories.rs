use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::{Row, SqlitePool};
use std::str::FromStr;
use uuid::Uuid;

use crate::domain::alert::{Alert, AlertType, ConditionType, NotificationChannel};
use crate::domain::market::Timeframe;
use crate::domain::notification::{Notification, User};
use crate::domain::repositories::{AlertRepository, NotificationRepository, UserRepository};

fn ts_to_datetime(ts: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(ts, 0).with_context(|| format!("Timestamp out of range: {}", ts))
}

fn parse_alert_type(s: &str) -> Result<AlertType> {
    Ok(match s {
        "price" => AlertType::Price,
        "percentage" => AlertType::Percentage,
        "rsi" => AlertType::Rsi,
        "ema_cross" => AlertType::EmaCross,
        "sma_cross" => AlertType::SmaCross,
        _ => bail!("Unknown alert type in storage: {}", s),
    })
}

fn parse_condition_type(s: &str) -> Result<ConditionType> {
    Ok(match s {
        "above" => ConditionType::Above,
        "below" => ConditionType::Below,
        "up" => ConditionType::Up,
        "down" => ConditionType::Down,
        "crosses_up" => ConditionType::CrossesUp,
        "crosses_down" => ConditionType::CrossesDown,
        _ => bail!("Unknown condition type in storage: {}", s),
    })
}

pub struct SqliteAlertRepository {
    pool: SqlitePool,
}

impl SqliteAlertRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Alert> {
        let id: String = row.try_get("id")?;
        let user_id: String = row.try_get("user_id")?;
        let alert_type: String = row.try_get("alert_type")?;
        let condition_type: String = row.try_get("condition_type")?;
        let target_value: String = row.try_get("target_value")?;
        let timeframe: String = row.try_get("timeframe")?;
        let notify_via: String = row.try_get("notify_via")?;
        let last_triggered_at: Option<i64> = row.try_get("last_triggered_at")?;
        let created_at: i64 = row.try_get("created_at")?;
        let updated_at: i64 = row.try_get("updated_at")?;

        Ok(Alert {
            id: Uuid::parse_str(&id).context("Invalid alert id in storage")?,
            user_id: Uuid::parse_str(&user_id).context("Invalid user id in storage")?,
            symbol: row.try_get("symbol")?,
            alert_type: parse_alert_type(&alert_type)?,
            condition_type: parse_condition_type(&condition_type)?,
            target_value: Decimal::from_str(&target_value)
                .context("Invalid target value in storage")?,
            timeframe: Timeframe::from_str(&timeframe)?,
            enabled: row.try_get::<i64, _>("enabled")? != 0,
            notify_via: serde_json::from_str::<Vec<NotificationChannel>>(&notify_via)
                .context("Invalid notify_via in storage")?,
            last_triggered_at: last_triggered_at.map(ts_to_datetime).transpose()?,
            created_at: ts_to_datetime(created_at)?,
            updated_at: ts_to_datetime(updated_at)?,
        })
    }

    fn map_rows(rows: Vec<sqlx::sqlite::SqliteRow>) -> Result<Vec<Alert>> {
        rows.iter().map(Self::map_row).collect()
    }
}

#[async_trait]
impl AlertRepository for SqliteAlertRepository {
    async fn create(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO alerts
                (id, user_id, symbol, alert_type, condition_type, target_value,
                 timeframe, enabled, notify_via, last_triggered_at, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(alert.id.to_string())
        .bind(alert.user_id.to_string())
        .bind(&alert.symbol)
        .bind(alert.alert_type.as_str())
        .bind(alert.condition_type.as_str())
        .bind(alert.target_value.to_string())
        .bind(alert.timeframe.as_str())
        .bind(alert.enabled as i64)
        .bind(serde_json::to_string(&alert.notify_via)?)
        .bind(alert.last_triggered_at.map(|t| t.timestamp()))
        .bind(alert.created_at.timestamp())
        .bind(alert.updated_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create alert")?;
        Ok(())
    }

    async fn get_enabled(&self) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE enabled = 1")
            .fetch_all(&self.pool)
            .await
            .context("Failed to load enabled alerts")?;
        Self::map_rows(rows)
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Alert>> {
        let row = sqlx::query("SELECT * FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load alert")?;
        row.as_ref().map(Self::map_row).transpose()
    }

    async fn get_by_user(&self, user_id: Uuid) -> Result<Vec<Alert>> {
        let rows = sqlx::query("SELECT * FROM alerts WHERE user_id = ? ORDER BY created_at DESC")
            .bind(user_id.to_string())
            .fetch_all(&self.pool)
            .await
            .context("Failed to load user alerts")?;
        Self::map_rows(rows)
    }

    async fn update(&self, alert: &Alert) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE alerts SET
                symbol = ?, alert_type = ?, condition_type = ?, target_value = ?,
                timeframe = ?, enabled = ?, notify_via = ?, last_triggered_at = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&alert.symbol)
        .bind(alert.alert_type.as_str())
        .bind(alert.condition_type.as_str())
        .bind(alert.target_value.to_string())
        .bind(alert.timeframe.as_str())
        .bind(alert.enabled as i64)
        .bind(serde_json::to_string(&alert.notify_via)?)
        .bind(alert.last_triggered_at.map(|t| t.timestamp()))
        .bind(Utc::now().timestamp())
        .bind(alert.id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to update alert")?;
        Ok(())
    }

    async fn mark_triggered(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        sqlx::query("UPDATE alerts SET last_triggered_at = ?, updated_at = ? WHERE id = ?")
            .bind(at.timestamp())
            .bind(at.timestamp())
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to mark alert triggered")?;
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM alerts WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete alert")?;
        Ok(())
    }
}

pub struct SqliteNotificationRepository {
    pool: SqlitePool,
}

impl SqliteNotificationRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn map_row(row: &sqlx::sqlite::SqliteRow) -> Result<Notification> {
        let id: String = row.try_get("id")?;
        let user_id: String = row.try_get("user_id")?;
        let alert_id: Option<String> = row.try_get("alert_id")?;
        let read_at: Option<i64> = row.try_get("read_at")?;
        let created_at: i64 = row.try_get("created_at")?;

        Ok(Notification {
            id: Uuid::parse_str(&id).context("Invalid notification id in storage")?,
            user_id: Uuid::parse_str(&user_id).context("Invalid user id in storage")?,
            alert_id: alert_id
                .map(|s| Uuid::parse_str(&s).context("Invalid alert id in storage"))
                .transpose()?,
            title: row.try_get("title")?,
            message: row.try_get("message")?,
            notification_type: row.try_get("notification_type")?,
            read_at: read_at.map(ts_to_datetime).transpose()?,
            created_at: ts_to_datetime(created_at)?,
        })
    }
}

#[async_trait]
impl NotificationRepository for SqliteNotificationRepository {
    async fn create(&self, notification: &Notification) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO notifications
                (id, user_id, alert_id, title, message, notification_type, read_at, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(notification.id.to_string())
        .bind(notification.user_id.to_string())
        .bind(notification.alert_id.map(|id| id.to_string()))
        .bind(&notification.title)
        .bind(&notification.message)
        .bind(&notification.notification_type)
        .bind(notification.read_at.map(|t| t.timestamp()))
        .bind(notification.created_at.timestamp())
        .execute(&self.pool)
        .await
        .context("Failed to create notification")?;
        Ok(())
    }

    async fn get_by_user(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ? ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load notifications")?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn get_unread(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        let rows = sqlx::query(
            "SELECT * FROM notifications WHERE user_id = ? AND read_at IS NULL \
             ORDER BY created_at DESC LIMIT ? OFFSET ?",
        )
        .bind(user_id.to_string())
        .bind(limit as i64)
        .bind(offset as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to load unread notifications")?;
        rows.iter().map(Self::map_row).collect()
    }

    async fn mark_as_read(&self, ids: &[Uuid], user_id: Uuid) -> Result<()> {
        let now = Utc::now().timestamp();
        for id in ids {
            sqlx::query(
                "UPDATE notifications SET read_at = ? WHERE id = ? AND user_id = ? AND read_at IS NULL",
            )
            .bind(now)
            .bind(id.to_string())
            .bind(user_id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to mark notification read")?;
        }
        Ok(())
    }

    async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET read_at = ? WHERE user_id = ? AND read_at IS NULL",
        )
        .bind(Utc::now().timestamp())
        .bind(user_id.to_string())
        .execute(&self.pool)
        .await
        .context("Failed to mark notifications read")?;
        Ok(result.rows_affected())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        sqlx::query("DELETE FROM notifications WHERE id = ?")
            .bind(id.to_string())
            .execute(&self.pool)
            .await
            .context("Failed to delete notification")?;
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query("DELETE FROM notifications WHERE created_at < ?")
            .bind(cutoff.timestamp())
            .execute(&self.pool)
            .await
            .context("Failed to purge old notifications")?;
        Ok(result.rows_affected())
    }
}

pub struct SqliteUserRepository {
    pool: SqlitePool,
}

impl SqliteUserRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for SqliteUserRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        let row = sqlx::query("SELECT * FROM users WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await
            .context("Failed to load user")?;

        row.map(|row| {
            let id: String = row.try_get("id")?;
            let created_at: i64 = row.try_get("created_at")?;
            Ok(User {
                id: Uuid::parse_str(&id).context("Invalid user id in storage")?,
                email: row.try_get("email")?,
                phone: row.try_get("phone")?,
                created_at: ts_to_datetime(created_at)?,
            })
        })
        .transpose()
    }
}
