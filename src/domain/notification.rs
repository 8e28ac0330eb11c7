use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::alert::NotificationChannel;

/// Notification type for records produced by the alert engine.
pub const NOTIFICATION_TYPE_ALERT_TRIGGERED: &str = "alert_triggered";

/// Notification type for operator/system messages.
pub const NOTIFICATION_TYPE_SYSTEM: &str = "system";

/// DLQ reason for payloads that could not be decoded.
pub const DLQ_REASON_PARSE_ERROR: &str = "parse_error";

/// DLQ reason for jobs that exhausted their retry budget.
pub const DLQ_REASON_MAX_RETRIES: &str = "max_retries_exceeded";

/// A persisted, user-facing in-app message.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Notification {
    pub id: Uuid,
    pub user_id: Uuid,
    pub alert_id: Option<Uuid>,
    pub title: String,
    pub message: String,
    pub notification_type: String,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn new(
        user_id: Uuid,
        alert_id: Option<Uuid>,
        title: impl Into<String>,
        message: impl Into<String>,
        notification_type: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id,
            alert_id,
            title: title.into(),
            message: message.into(),
            notification_type: notification_type.into(),
            read_at: None,
            created_at: Utc::now(),
        }
    }
}

/// Delivery priority. Encoded into the queue score rather than a separate
/// queue: higher priorities get a score bonus that advances them in the
/// time-ordered drain.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NotificationPriority {
    Low,
    #[default]
    Normal,
    High,
    Urgent,
}

impl NotificationPriority {
    /// Seconds subtracted from the scheduled time when scoring a queue entry.
    pub fn score_bonus(&self) -> i64 {
        match self {
            NotificationPriority::Urgent => 86_400,
            NotificationPriority::High => 3_600,
            NotificationPriority::Normal | NotificationPriority::Low => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationPriority::Low => "low",
            NotificationPriority::Normal => "normal",
            NotificationPriority::High => "high",
            NotificationPriority::Urgent => "urgent",
        }
    }
}

/// A scheduled multi-channel delivery job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedNotification {
    pub id: Uuid,
    pub user_id: Uuid,
    #[serde(rename = "type")]
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub channels: Vec<NotificationChannel>,
    #[serde(default)]
    pub priority: NotificationPriority,
    #[serde(default)]
    pub data: HashMap<String, Value>,
    pub scheduled_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub retries: u32,
    pub max_retries: u32,
}

impl QueuedNotification {
    pub fn new(
        user_id: Uuid,
        notification_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
        channels: Vec<NotificationChannel>,
        priority: NotificationPriority,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            channels,
            priority,
            data: HashMap::new(),
            scheduled_at: now,
            created_at: now,
            retries: 0,
            max_retries: 3,
        }
    }

    /// Queue score: scheduled time in unix seconds minus the priority bonus.
    /// Smaller scores drain first.
    pub fn effective_score(&self) -> i64 {
        self.scheduled_at.timestamp() - self.priority.score_bonus()
    }

    /// Pushes the job back by the exponential backoff for its current retry
    /// count (`retries` squared, in minutes).
    pub fn apply_backoff(&mut self) {
        let minutes = i64::from(self.retries) * i64::from(self.retries);
        self.scheduled_at += Duration::minutes(minutes);
    }
}

/// A permanently failed job, wrapped with the failure reason and the time it
/// was dead-lettered. `notification` holds the original serialized payload so
/// operators can inspect or replay it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterEntry {
    pub notification: String,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

impl DeadLetterEntry {
    pub fn new(notification: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            notification: notification.into(),
            reason: reason.into(),
            timestamp: Utc::now(),
        }
    }
}

/// A thin owner record: who a delivery job addresses.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}
