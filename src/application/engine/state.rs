//! Engine-owned cross-cycle state: throttle windows and the last observed
//! moving-average pair per alert.
//!
//! Both maps sit behind a read/write lock with narrow accessors; callers
//! never hold the lock across I/O.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Alert id -> instant at which the alert may trigger again.
pub struct ThrottleStore {
    entries: RwLock<HashMap<Uuid, DateTime<Utc>>>,
}

impl ThrottleStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    pub async fn is_throttled(&self, alert_id: Uuid, now: DateTime<Utc>) -> bool {
        self.entries
            .read()
            .await
            .get(&alert_id)
            .is_some_and(|until| *until > now)
    }

    pub async fn install(&self, alert_id: Uuid, until: DateTime<Utc>) {
        self.entries.write().await.insert(alert_id, until);
    }

    /// Drops entries whose window has passed. Idempotent; returns how many
    /// were removed.
    pub async fn cleanup(&self, now: DateTime<Utc>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, until| *until > now);
        before - entries.len()
    }

    /// Number of alerts currently inside their throttle window.
    pub async fn active_count(&self, now: DateTime<Utc>) -> usize {
        self.entries
            .read()
            .await
            .values()
            .filter(|until| **until > now)
            .count()
    }

    pub async fn remove(&self, alert_id: Uuid) {
        self.entries.write().await.remove(&alert_id);
    }
}

impl Default for ThrottleStore {
    fn default() -> Self {
        Self::new()
    }
}

/// Last observed short/long moving-average pair for one MA-cross alert.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CrossoverState {
    pub short_ma: Decimal,
    pub long_ma: Decimal,
    pub observed_at: DateTime<Utc>,
}

/// Alert id -> last observation, consulted on the next cycle to detect a
/// sign change of (short - long).
pub struct CrossoverStateStore {
    entries: RwLock<HashMap<Uuid, CrossoverState>>,
}

impl CrossoverStateStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Records the current observation and returns the previous one, if any.
    pub async fn observe(
        &self,
        alert_id: Uuid,
        short_ma: Decimal,
        long_ma: Decimal,
        observed_at: DateTime<Utc>,
    ) -> Option<CrossoverState> {
        self.entries.write().await.insert(
            alert_id,
            CrossoverState {
                short_ma,
                long_ma,
                observed_at,
            },
        )
    }

    /// Evicts state for alerts no longer in the enabled set; returns how many
    /// entries were dropped.
    pub async fn retain_ids(&self, enabled: &HashSet<Uuid>) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|id, _| enabled.contains(id));
        before - entries.len()
    }

    pub async fn remove(&self, alert_id: Uuid) {
        self.entries.write().await.remove(&alert_id);
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }
}

impl Default for CrossoverStateStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use rust_decimal_macros::dec;

    #[tokio::test]
    async fn test_throttle_window() {
        let store = ThrottleStore::new();
        let now = Utc::now();
        let id = Uuid::new_v4();

        assert!(!store.is_throttled(id, now).await);

        store.install(id, now + Duration::minutes(5)).await;
        assert!(store.is_throttled(id, now).await);
        assert!(store.is_throttled(id, now + Duration::minutes(4)).await);
        assert!(!store.is_throttled(id, now + Duration::minutes(6)).await);
    }

    #[tokio::test]
    async fn test_cleanup_removes_only_expired() {
        let store = ThrottleStore::new();
        let now = Utc::now();
        let expired = Uuid::new_v4();
        let live = Uuid::new_v4();

        store.install(expired, now - Duration::seconds(1)).await;
        store.install(live, now + Duration::minutes(5)).await;

        assert_eq!(store.cleanup(now).await, 1);
        assert_eq!(store.cleanup(now).await, 0); // idempotent
        assert!(store.is_throttled(live, now).await);
        assert_eq!(store.active_count(now).await, 1);
    }

    #[tokio::test]
    async fn test_crossover_first_observation_has_no_previous() {
        let store = CrossoverStateStore::new();
        let id = Uuid::new_v4();
        let now = Utc::now();

        let prev = store.observe(id, dec!(0.50), dec!(0.52), now).await;
        assert!(prev.is_none());

        let prev = store.observe(id, dec!(0.53), dec!(0.52), now).await;
        let prev = prev.unwrap();
        assert_eq!(prev.short_ma, dec!(0.50));
        assert_eq!(prev.long_ma, dec!(0.52));
    }

    #[tokio::test]
    async fn test_retain_ids_evicts_disabled() {
        let store = CrossoverStateStore::new();
        let keep = Uuid::new_v4();
        let drop = Uuid::new_v4();
        let now = Utc::now();

        store.observe(keep, dec!(1), dec!(2), now).await;
        store.observe(drop, dec!(1), dec!(2), now).await;

        let enabled: HashSet<Uuid> = [keep].into_iter().collect();
        assert_eq!(store.retain_ids(&enabled).await, 1);
        assert_eq!(store.len().await, 1);
    }
}
