//! Notification Service: priority-ordered, multi-channel delivery with
//! bounded retries and a dead-letter path.
//!
//! The pending queue and the DLQ are two ordered sets in an external store;
//! priority is folded into the score (scheduled time minus a priority bonus)
//! so the drain stays a plain "pop everything due".

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::future::join_all;
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::domain::alert::{Alert, NotificationChannel};
use crate::domain::errors::NotificationError;
use crate::domain::notification::{
    DLQ_REASON_MAX_RETRIES, DLQ_REASON_PARSE_ERROR, DeadLetterEntry,
    NOTIFICATION_TYPE_ALERT_TRIGGERED, Notification, NotificationPriority, QueuedNotification,
};
use crate::domain::ports::{ChannelAdapter, QueueStore};
use crate::domain::repositories::{NotificationRepository, UserRepository};

/// Ordered-set keys in the external store.
pub const QUEUE_KEY: &str = "notification_queue";
pub const DLQ_KEY: &str = "notification_dlq";

#[derive(Debug, Clone)]
pub struct NotificationServiceConfig {
    pub batch_size: usize,
    pub batch_tick: Duration,
    pub max_retries: u32,
    pub delivery_timeout: Duration,
    pub priority_bonus_urgent_secs: i64,
    pub priority_bonus_high_secs: i64,
}

impl Default for NotificationServiceConfig {
    fn default() -> Self {
        Self {
            batch_size: 10,
            batch_tick: Duration::from_secs(5),
            max_retries: 3,
            delivery_timeout: Duration::from_secs(5),
            priority_bonus_urgent_secs: 86_400,
            priority_bonus_high_secs: 3_600,
        }
    }
}

/// Point-in-time service counters.
#[derive(Debug, Clone, Serialize)]
pub struct NotificationStats {
    pub queue_size: usize,
    pub dlq_size: usize,
    pub is_processing: bool,
    pub last_update: DateTime<Utc>,
}

struct ProcessingLifecycle {
    stop: Option<CancellationToken>,
    worker: Option<JoinHandle<()>>,
}

pub struct NotificationService {
    repo: Arc<dyn NotificationRepository>,
    users: Arc<dyn UserRepository>,
    store: Arc<dyn QueueStore>,
    adapters: HashMap<NotificationChannel, Arc<dyn ChannelAdapter>>,
    config: NotificationServiceConfig,
    lifecycle: Mutex<ProcessingLifecycle>,
    is_processing: AtomicBool,
    last_update: RwLock<DateTime<Utc>>,
}

impl NotificationService {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        users: Arc<dyn UserRepository>,
        store: Arc<dyn QueueStore>,
        adapters: HashMap<NotificationChannel, Arc<dyn ChannelAdapter>>,
        config: NotificationServiceConfig,
    ) -> Self {
        Self {
            repo,
            users,
            store,
            adapters,
            config,
            lifecycle: Mutex::new(ProcessingLifecycle {
                stop: None,
                worker: None,
            }),
            is_processing: AtomicBool::new(false),
            last_update: RwLock::new(Utc::now()),
        }
    }

    // ── Producer API ────────────────────────────────────────────────────

    /// Creates and persists the in-app artifact only; nothing is enqueued.
    pub async fn create_notification(
        &self,
        user_id: Uuid,
        notification_type: &str,
        title: &str,
        message: &str,
        alert_id: Option<Uuid>,
    ) -> Result<Notification, NotificationError> {
        let notification = Notification::new(user_id, alert_id, title, message, notification_type);
        self.repo
            .create(&notification)
            .await
            .map_err(NotificationError::Persistence)?;
        debug!(notification_id = %notification.id, user_id = %user_id, "in-app notification created");
        Ok(notification)
    }

    /// Fills job defaults and inserts it into the pending queue with its
    /// priority-adjusted score.
    pub async fn queue_notification(
        &self,
        mut job: QueuedNotification,
    ) -> Result<(), NotificationError> {
        let now = Utc::now();
        if job.id.is_nil() {
            job.id = Uuid::new_v4();
        }
        if job.created_at.timestamp() == 0 {
            job.created_at = now;
        }
        if job.scheduled_at.timestamp() == 0 {
            job.scheduled_at = now;
        }
        if job.max_retries == 0 {
            job.max_retries = self.config.max_retries;
        }

        let score = self.score_for(&job);
        let payload = serde_json::to_string(&job)
            .map_err(|e| NotificationError::QueueWriteFailed(e.into()))?;

        self.store
            .insert(QUEUE_KEY, &payload, score)
            .await
            .map_err(NotificationError::QueueWriteFailed)?;

        debug!(
            job_id = %job.id,
            priority = job.priority.as_str(),
            score,
            "notification job queued"
        );
        Ok(())
    }

    /// Convenience for a triggered alert: the in-app record is written
    /// synchronously when `app` is requested, the remaining channels go
    /// through the queue at `high` priority.
    pub async fn queue_alert_notification(
        &self,
        alert: &Alert,
        current_value: Decimal,
        channels: &[NotificationChannel],
    ) -> Result<(), NotificationError> {
        let user = self
            .users
            .get_by_id(alert.user_id)
            .await
            .map_err(NotificationError::Persistence)?
            .ok_or(NotificationError::UserNotFound {
                user_id: alert.user_id,
            })?;

        let title = format!("{} alert", alert.symbol);
        let message = format!(
            "{} {} {} (current: {})",
            alert.symbol, alert.alert_type, alert.target_value, current_value
        );

        if channels.contains(&NotificationChannel::App) {
            self.create_notification(
                alert.user_id,
                NOTIFICATION_TYPE_ALERT_TRIGGERED,
                &title,
                &message,
                Some(alert.id),
            )
            .await?;
        }

        let mut remaining: Vec<NotificationChannel> = Vec::new();
        for channel in channels {
            if *channel != NotificationChannel::App && !remaining.contains(channel) {
                remaining.push(*channel);
            }
        }
        if remaining.is_empty() {
            return Ok(());
        }

        let mut job = QueuedNotification::new(
            user.id,
            NOTIFICATION_TYPE_ALERT_TRIGGERED,
            &title,
            &message,
            remaining,
            NotificationPriority::High,
        );
        job.max_retries = self.config.max_retries;
        job.data.insert("alert_id".to_string(), json!(alert.id));
        job.data.insert("symbol".to_string(), json!(alert.symbol));
        job.data
            .insert("current_value".to_string(), json!(current_value));
        job.data
            .insert("target_value".to_string(), json!(alert.target_value));

        self.queue_notification(job).await
    }

    // ── Processing lifecycle ────────────────────────────────────────────

    /// Starts the single processing worker. A second call while running is a
    /// logged no-op.
    pub async fn start_processing(self: &Arc<Self>, cancel: CancellationToken) {
        let mut lifecycle = self.lifecycle.lock().await;
        if lifecycle.worker.is_some() {
            warn!("notification processing already running; ignoring start");
            return;
        }

        let stop = CancellationToken::new();
        let service = Arc::clone(self);
        let worker_stop = stop.clone();
        let handle = tokio::spawn(async move {
            service.run_processing_loop(cancel, worker_stop).await;
        });

        lifecycle.stop = Some(stop);
        lifecycle.worker = Some(handle);
        self.is_processing.store(true, Ordering::SeqCst);
        info!(tick = ?self.config.batch_tick, batch_size = self.config.batch_size, "notification processing started");
    }

    /// Stops the worker and waits for it to exit. Idempotent.
    pub async fn stop_processing(&self) {
        let (stop, worker) = {
            let mut lifecycle = self.lifecycle.lock().await;
            (lifecycle.stop.take(), lifecycle.worker.take())
        };

        let Some(stop) = stop else {
            debug!("notification processing not running; stop is a no-op");
            return;
        };
        stop.cancel();

        if let Some(worker) = worker
            && let Err(e) = worker.await
        {
            error!(error = %e, "notification worker join failed");
        }

        self.is_processing.store(false, Ordering::SeqCst);
        info!("notification processing stopped");
    }

    pub fn is_processing(&self) -> bool {
        self.is_processing.load(Ordering::SeqCst)
    }

    async fn run_processing_loop(&self, cancel: CancellationToken, stop: CancellationToken) {
        let mut tick = tokio::time::interval(self.config.batch_tick);
        tick.tick().await; // the immediate first tick

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("notification worker cancelled");
                    break;
                }
                _ = stop.cancelled() => {
                    debug!("notification worker stopping");
                    break;
                }
                _ = tick.tick() => {
                    self.process_batch().await;
                }
            }
        }
    }

    /// Drains up to `batch_size` due entries and settles each one.
    pub async fn process_batch(&self) {
        let now = Utc::now();
        let due = match self
            .store
            .pop_due(QUEUE_KEY, now.timestamp(), self.config.batch_size)
            .await
        {
            Ok(entries) => entries,
            Err(e) => {
                error!(correlation_id = %Uuid::new_v4(), error = %e, "failed to pop due notification jobs");
                return;
            }
        };

        for raw in due {
            match serde_json::from_str::<QueuedNotification>(&raw) {
                Ok(job) => self.settle(job).await,
                Err(e) => {
                    warn!(
                        correlation_id = %Uuid::new_v4(),
                        error = %e,
                        "unparseable queue entry moved to DLQ"
                    );
                    self.dead_letter(&raw, DLQ_REASON_PARSE_ERROR).await;
                }
            }
        }

        *self.last_update.write().await = now;
    }

    /// Delivers a parsed job to every requested channel and either finishes,
    /// reschedules with backoff, or dead-letters it.
    async fn settle(&self, mut job: QueuedNotification) {
        let success = self.deliver_all(&job).await;
        if success {
            info!(job_id = %job.id, channels = job.channels.len(), "notification delivered");
            return;
        }

        if job.retries >= job.max_retries {
            warn!(
                job_id = %job.id,
                retries = job.retries,
                "retry budget exhausted; moving job to DLQ"
            );
            match serde_json::to_string(&job) {
                Ok(payload) => self.dead_letter(&payload, DLQ_REASON_MAX_RETRIES).await,
                Err(e) => {
                    error!(job_id = %job.id, error = %e, "failed to serialize job for DLQ");
                }
            }
            return;
        }

        job.retries += 1;
        job.apply_backoff();
        let score = self.score_for(&job);
        match serde_json::to_string(&job) {
            Ok(payload) => {
                if let Err(e) = self.store.insert(QUEUE_KEY, &payload, score).await {
                    error!(
                        job_id = %job.id,
                        correlation_id = %Uuid::new_v4(),
                        error = %e,
                        "failed to reschedule job"
                    );
                } else {
                    debug!(
                        job_id = %job.id,
                        retries = job.retries,
                        rescheduled_at = %job.scheduled_at,
                        "job rescheduled with backoff"
                    );
                }
            }
            Err(e) => error!(job_id = %job.id, error = %e, "failed to serialize rescheduled job"),
        }
    }

    /// Per-channel delivery; channels run in parallel and overall success is
    /// their conjunction. `app` is a no-op: the in-app record was persisted
    /// when the job was produced.
    async fn deliver_all(&self, job: &QueuedNotification) -> bool {
        let attempts = job.channels.iter().map(|channel| async move {
            match channel {
                NotificationChannel::App => true,
                other => self.deliver_one(*other, job).await,
            }
        });
        join_all(attempts).await.into_iter().all(|ok| ok)
    }

    async fn deliver_one(&self, channel: NotificationChannel, job: &QueuedNotification) -> bool {
        let Some(adapter) = self.adapters.get(&channel) else {
            warn!(job_id = %job.id, channel = %channel, "no adapter configured for channel");
            return false;
        };

        match tokio::time::timeout(self.config.delivery_timeout, adapter.deliver(job)).await {
            Ok(Ok(())) => true,
            Ok(Err(e)) => {
                warn!(
                    job_id = %job.id,
                    channel = %channel,
                    correlation_id = %Uuid::new_v4(),
                    error = %e,
                    "channel delivery failed"
                );
                false
            }
            Err(_) => {
                warn!(
                    job_id = %job.id,
                    channel = %channel,
                    correlation_id = %Uuid::new_v4(),
                    timeout = ?self.config.delivery_timeout,
                    "channel delivery timed out"
                );
                false
            }
        }
    }

    /// Queue score for a job under the configured priority bonuses: the
    /// scheduled time in unix seconds minus the bonus for its priority.
    fn score_for(&self, job: &QueuedNotification) -> i64 {
        let bonus = match job.priority {
            NotificationPriority::Urgent => self.config.priority_bonus_urgent_secs,
            NotificationPriority::High => self.config.priority_bonus_high_secs,
            NotificationPriority::Normal | NotificationPriority::Low => 0,
        };
        job.scheduled_at.timestamp() - bonus
    }

    async fn dead_letter(&self, payload: &str, reason: &str) {
        let entry = DeadLetterEntry::new(payload, reason);
        let score = entry.timestamp.timestamp();
        match serde_json::to_string(&entry) {
            Ok(encoded) => {
                if let Err(e) = self.store.insert(DLQ_KEY, &encoded, score).await {
                    error!(
                        correlation_id = %Uuid::new_v4(),
                        reason,
                        error = %e,
                        "failed to write DLQ entry"
                    );
                }
            }
            Err(e) => error!(reason, error = %e, "failed to encode DLQ entry"),
        }
    }

    // ── Maintenance ─────────────────────────────────────────────────────

    /// Removes DLQ entries older than the given horizon; returns how many
    /// were purged.
    pub async fn cleanup_old_notifications(&self, older_than: ChronoDuration) -> anyhow::Result<u64> {
        let cutoff = (Utc::now() - older_than).timestamp();
        let removed = self
            .store
            .remove_by_score_range(DLQ_KEY, i64::MIN, cutoff)
            .await?;
        if removed > 0 {
            info!(removed, "purged old DLQ entries");
        }
        Ok(removed)
    }

    pub async fn stats(&self) -> NotificationStats {
        let queue_size = self.store.len(QUEUE_KEY).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read queue size");
            0
        });
        let dlq_size = self.store.len(DLQ_KEY).await.unwrap_or_else(|e| {
            warn!(error = %e, "failed to read DLQ size");
            0
        });
        NotificationStats {
            queue_size,
            dlq_size,
            is_processing: self.is_processing(),
            last_update: *self.last_update.read().await,
        }
    }
}
