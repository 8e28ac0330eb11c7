//! In-Memory Repository Implementations
//!
//! Thread-safe, in-memory implementations of the repository traits and the
//! ordered-set queue store. Suitable for tests and single-instance
//! deployments; data is lost on restart.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::domain::alert::Alert;
use crate::domain::notification::{Notification, User};
use crate::domain::ports::QueueStore;
use crate::domain::repositories::{AlertRepository, NotificationRepository, UserRepository};

/// In-memory implementation of AlertRepository
pub struct InMemoryAlertRepository {
    alerts: Arc<RwLock<HashMap<Uuid, Alert>>>,
}

impl InMemoryAlertRepository {
    pub fn new() -> Self {
        Self {
            alerts: Arc::new(RwLock::new(HashMap::new())),
        }
    }
}

impl Default for InMemoryAlertRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AlertRepository for InMemoryAlertRepository {
    async fn create(&self, alert: &Alert) -> Result<()> {
        self.alerts.write().await.insert(alert.id, alert.clone());
        Ok(())
    }

    async fn get_enabled(&self) -> Result<Vec<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.enabled)
            .cloned()
            .collect())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<Alert>> {
        Ok(self.alerts.read().await.get(&id).cloned())
    }

    async fn get_by_user(&self, user_id: Uuid) -> Result<Vec<Alert>> {
        Ok(self
            .alerts
            .read()
            .await
            .values()
            .filter(|a| a.user_id == user_id)
            .cloned()
            .collect())
    }

    async fn update(&self, alert: &Alert) -> Result<()> {
        let mut updated = alert.clone();
        updated.updated_at = Utc::now();
        self.alerts.write().await.insert(alert.id, updated);
        Ok(())
    }

    async fn mark_triggered(&self, id: Uuid, at: DateTime<Utc>) -> Result<()> {
        let mut alerts = self.alerts.write().await;
        if let Some(alert) = alerts.get_mut(&id) {
            alert.last_triggered_at = Some(at);
            alert.updated_at = at;
        }
        Ok(())
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.alerts.write().await.remove(&id);
        Ok(())
    }
}

/// In-memory implementation of NotificationRepository
pub struct InMemoryNotificationRepository {
    notifications: Arc<RwLock<Vec<Notification>>>,
}

impl InMemoryNotificationRepository {
    pub fn new() -> Self {
        Self {
            notifications: Arc::new(RwLock::new(Vec::new())),
        }
    }

    /// Snapshot of everything stored, newest first (test helper).
    pub async fn all(&self) -> Vec<Notification> {
        let mut all = self.notifications.read().await.clone();
        all.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        all
    }
}

impl Default for InMemoryNotificationRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationRepository for InMemoryNotificationRepository {
    async fn create(&self, notification: &Notification) -> Result<()> {
        self.notifications.write().await.push(notification.clone());
        Ok(())
    }

    async fn get_by_user(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        let mut matching: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id)
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn get_unread(
        &self,
        user_id: Uuid,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<Notification>> {
        let mut matching: Vec<Notification> = self
            .notifications
            .read()
            .await
            .iter()
            .filter(|n| n.user_id == user_id && n.read_at.is_none())
            .cloned()
            .collect();
        matching.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(matching
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    async fn mark_as_read(&self, ids: &[Uuid], user_id: Uuid) -> Result<()> {
        let now = Utc::now();
        let mut notifications = self.notifications.write().await;
        for n in notifications.iter_mut() {
            if n.user_id == user_id && ids.contains(&n.id) && n.read_at.is_none() {
                n.read_at = Some(now);
            }
        }
        Ok(())
    }

    async fn mark_all_as_read(&self, user_id: Uuid) -> Result<u64> {
        let now = Utc::now();
        let mut notifications = self.notifications.write().await;
        let mut updated = 0;
        for n in notifications.iter_mut() {
            if n.user_id == user_id && n.read_at.is_none() {
                n.read_at = Some(now);
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn delete(&self, id: Uuid) -> Result<()> {
        self.notifications.write().await.retain(|n| n.id != id);
        Ok(())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let mut notifications = self.notifications.write().await;
        let before = notifications.len();
        notifications.retain(|n| n.created_at >= cutoff);
        Ok((before - notifications.len()) as u64)
    }
}

/// In-memory implementation of UserRepository
pub struct InMemoryUserRepository {
    users: Arc<RwLock<HashMap<Uuid, User>>>,
}

impl InMemoryUserRepository {
    pub fn new() -> Self {
        Self {
            users: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    pub async fn insert(&self, user: User) {
        self.users.write().await.insert(user.id, user);
    }
}

impl Default for InMemoryUserRepository {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl UserRepository for InMemoryUserRepository {
    async fn get_by_id(&self, id: Uuid) -> Result<Option<User>> {
        Ok(self.users.read().await.get(&id).cloned())
    }
}

/// In-memory ordered-set store. All mutation happens under one write lock so
/// `pop_due` is atomic for a single instance.
pub struct InMemoryQueueStore {
    queues: Arc<RwLock<HashMap<String, HashMap<String, i64>>>>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Members and scores of a queue, ordered by score (test helper).
    pub async fn entries(&self, queue: &str) -> Vec<(String, i64)> {
        let queues = self.queues.read().await;
        let mut entries: Vec<(String, i64)> = queues
            .get(queue)
            .map(|members| {
                members
                    .iter()
                    .map(|(member, score)| (member.clone(), *score))
                    .collect()
            })
            .unwrap_or_default();
        entries.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        entries
    }
}

impl Default for InMemoryQueueStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn insert(&self, queue: &str, member: &str, score: i64) -> Result<()> {
        self.queues
            .write()
            .await
            .entry(queue.to_string())
            .or_default()
            .insert(member.to_string(), score);
        Ok(())
    }

    async fn pop_due(&self, queue: &str, max_score: i64, limit: usize) -> Result<Vec<String>> {
        let mut queues = self.queues.write().await;
        let Some(members) = queues.get_mut(queue) else {
            return Ok(Vec::new());
        };

        let mut due: Vec<(String, i64)> = members
            .iter()
            .filter(|(_, score)| **score <= max_score)
            .map(|(member, score)| (member.clone(), *score))
            .collect();
        due.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));
        due.truncate(limit);

        let popped: Vec<String> = due.into_iter().map(|(member, _)| member).collect();
        for member in &popped {
            members.remove(member);
        }
        Ok(popped)
    }

    async fn len(&self, queue: &str) -> Result<usize> {
        Ok(self
            .queues
            .read()
            .await
            .get(queue)
            .map(|members| members.len())
            .unwrap_or(0))
    }

    async fn remove_by_score_range(&self, queue: &str, min: i64, max: i64) -> Result<u64> {
        let mut queues = self.queues.write().await;
        let Some(members) = queues.get_mut(queue) else {
            return Ok(0);
        };
        let before = members.len();
        members.retain(|_, score| *score < min || *score > max);
        Ok((before - members.len()) as u64)
    }
}
