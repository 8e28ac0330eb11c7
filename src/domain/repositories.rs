//! Repository traits for persisted entities.
//!
//! Business logic depends only on these abstractions; SQLite and in-memory
//! implementations live in `infrastructure`.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::domain::alert::Alert;
use crate::domain::notification::{Notification, User};

/// Repository for persisted alert definitions.
#[async_trait]
pub trait AlertRepository: Send + Sync {
    /// Persist a new alert.
    async fn create(&self, alert: &Alert) -> Result<()>;

    /// All alerts with the enabled flag set.
    async fn get_enabled(&self) -> Result<Vec<Alert>>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Alert>>;

    async fn get_by_user(&self, user_id: Uuid) -> Result<Vec<Alert>>;

    /// Replace a stored alert with the given state.
    async fn update(&self, alert: &Alert) -> Result<()>;

    /// Record that the alert fired at `at` (sets `last_triggered_at` and
    /// bumps `updated_at`).
    async fn mark_triggered(&self, id: Uuid, at: DateTime<Utc>) -> Result<()>;

    async fn delete(&self, id: Uuid) -> Result<()>;
}

/// Repository for persisted in-app notifications.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    async fn create(&self, notification: &Notification) -> Result<()>;

    async fn get_by_user(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>>;

    async fn get_unread(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>>;

    /// Marks the given notifications read, scoped to the owning user.
    async fn mark_as_read(&self, ids: &[Uuid], user_id: Uuid) -> Result<()>;

    /// Marks everything unread as read; returns the number of rows updated.
    async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64>;

    async fn delete(&self, id: Uuid) -> Result<()>;

    /// Purges notifications created before `cutoff`; returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

/// Owner lookups for delivery jobs.
#[async_trait]
pub trait UserRepository: Send + Sync {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>>;
}
