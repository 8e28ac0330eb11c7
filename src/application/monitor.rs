//! Alert Monitor: owns the periodic evaluation and cleanup workers and
//! exposes an idempotent start/stop lifecycle.

use chrono::{Duration as ChronoDuration, Utc};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::sync::{Mutex, mpsc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::engine::{AlertEngine, EngineStats, EvaluationResult};
use crate::application::notifications::{NotificationService, NotificationStats};
use crate::domain::errors::MonitorError;
use crate::domain::notification::{
    NOTIFICATION_TYPE_ALERT_TRIGGERED, NotificationPriority, QueuedNotification,
};
use crate::domain::repositories::{AlertRepository, NotificationRepository};

#[derive(Debug, Clone)]
pub struct MonitorConfig {
    pub evaluation_interval: Duration,
    pub cleanup_interval: Duration,
    pub notification_retention: ChronoDuration,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            evaluation_interval: Duration::from_secs(30),
            cleanup_interval: Duration::from_secs(300),
            notification_retention: ChronoDuration::days(30),
        }
    }
}

/// Aggregated stats across the engine and notification service.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStats {
    pub is_running: bool,
    pub evaluation_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub engine: EngineStats,
    pub notifications: NotificationStats,
}

struct MonitorLifecycle {
    stop: Option<CancellationToken>,
    workers: Vec<JoinHandle<()>>,
    immediate_tx: Option<mpsc::Sender<()>>,
}

pub struct AlertMonitor {
    engine: Arc<AlertEngine>,
    notifications: Arc<NotificationService>,
    alerts: Arc<dyn AlertRepository>,
    notification_repo: Arc<dyn NotificationRepository>,
    config: MonitorConfig,
    lifecycle: Mutex<MonitorLifecycle>,
    running: AtomicBool,
}

impl AlertMonitor {
    pub fn new(
        engine: Arc<AlertEngine>,
        notifications: Arc<NotificationService>,
        alerts: Arc<dyn AlertRepository>,
        notification_repo: Arc<dyn NotificationRepository>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            engine,
            notifications,
            alerts,
            notification_repo,
            config,
            lifecycle: Mutex::new(MonitorLifecycle {
                stop: None,
                workers: Vec::new(),
                immediate_tx: None,
            }),
            running: AtomicBool::new(false),
        }
    }

    /// Launches the evaluation and cleanup workers. A second call while
    /// running is a logged no-op.
    pub async fn start(&self, cancel: CancellationToken) {
        let mut lifecycle = self.lifecycle.lock().await;
        if !lifecycle.workers.is_empty() {
            warn!("alert monitor already running; ignoring start");
            return;
        }

        let stop = CancellationToken::new();
        let (immediate_tx, immediate_rx) = mpsc::channel(4);

        let evaluation = tokio::spawn(evaluation_worker(
            Arc::clone(&self.engine),
            Arc::clone(&self.notifications),
            Arc::clone(&self.alerts),
            self.config.evaluation_interval,
            cancel.clone(),
            stop.clone(),
            immediate_rx,
        ));

        let cleanup = tokio::spawn(cleanup_worker(
            Arc::clone(&self.engine),
            Arc::clone(&self.notifications),
            Arc::clone(&self.notification_repo),
            self.config.cleanup_interval,
            self.config.notification_retention,
            cancel,
            stop.clone(),
        ));

        lifecycle.stop = Some(stop);
        lifecycle.workers = vec![evaluation, cleanup];
        lifecycle.immediate_tx = Some(immediate_tx);
        self.running.store(true, Ordering::SeqCst);
        info!(
            evaluation_interval = ?self.config.evaluation_interval,
            cleanup_interval = ?self.config.cleanup_interval,
            "alert monitor started"
        );
    }

    /// Signals both workers and waits until they have exited. Idempotent and
    /// safe against a concurrent `start`.
    pub async fn stop(&self) {
        let (stop, workers) = {
            let mut lifecycle = self.lifecycle.lock().await;
            lifecycle.immediate_tx = None;
            (
                lifecycle.stop.take(),
                std::mem::take(&mut lifecycle.workers),
            )
        };

        let Some(stop) = stop else {
            debug!("alert monitor not running; stop is a no-op");
            return;
        };
        stop.cancel();

        for worker in workers {
            if let Err(e) = worker.await {
                error!(error = %e, "monitor worker join failed");
            }
        }

        self.running.store(false, Ordering::SeqCst);
        info!("alert monitor stopped");
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Schedules one out-of-band evaluation without disturbing the periodic
    /// cadence.
    pub async fn trigger_immediate_evaluation(&self) -> Result<(), MonitorError> {
        let lifecycle = self.lifecycle.lock().await;
        let tx = lifecycle
            .immediate_tx
            .as_ref()
            .ok_or(MonitorError::NotRunning)?;
        // A full lane already carries a pending request; collapsing them is fine.
        if let Err(mpsc::error::TrySendError::Closed(_)) = tx.try_send(()) {
            return Err(MonitorError::NotRunning);
        }
        Ok(())
    }

    pub async fn stats(&self) -> MonitorStats {
        MonitorStats {
            is_running: self.is_running(),
            evaluation_interval_secs: self.config.evaluation_interval.as_secs(),
            cleanup_interval_secs: self.config.cleanup_interval.as_secs(),
            engine: self.engine.stats().await,
            notifications: self.notifications.stats().await,
        }
    }
}

async fn evaluation_worker(
    engine: Arc<AlertEngine>,
    notifications: Arc<NotificationService>,
    alerts: Arc<dyn AlertRepository>,
    interval: Duration,
    cancel: CancellationToken,
    stop: CancellationToken,
    mut immediate_rx: mpsc::Receiver<()>,
) {
    let mut tick = tokio::time::interval(interval);
    tick.tick().await; // the immediate first tick

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("evaluation worker cancelled");
                break;
            }
            _ = stop.cancelled() => {
                debug!("evaluation worker stopping");
                break;
            }
            _ = tick.tick() => {
                run_evaluation_cycle(&engine, &notifications, &alerts).await;
            }
            Some(()) = immediate_rx.recv() => {
                debug!("running out-of-band evaluation");
                run_evaluation_cycle(&engine, &notifications, &alerts).await;
            }
        }
    }
}

async fn run_evaluation_cycle(
    engine: &AlertEngine,
    notifications: &NotificationService,
    alerts: &Arc<dyn AlertRepository>,
) {
    let results = engine.evaluate_all().await;
    let triggered: Vec<&EvaluationResult> =
        results.iter().filter(|r| r.should_trigger).collect();
    if triggered.is_empty() {
        debug!(evaluated = results.len(), "evaluation cycle complete; no triggers");
        return;
    }

    info!(
        evaluated = results.len(),
        triggered = triggered.len(),
        "evaluation cycle complete"
    );

    for result in triggered {
        let alert = match alerts.get_by_id(result.alert_id).await {
            Ok(Some(alert)) => alert,
            Ok(None) => {
                warn!(alert_id = %result.alert_id, "triggered alert vanished before dispatch");
                continue;
            }
            Err(e) => {
                error!(
                    alert_id = %result.alert_id,
                    correlation_id = %Uuid::new_v4(),
                    error = %e,
                    "failed to load triggered alert"
                );
                continue;
            }
        };

        let mut job = QueuedNotification::new(
            alert.user_id,
            NOTIFICATION_TYPE_ALERT_TRIGGERED,
            format!("{} alert", alert.symbol),
            result.message.clone(),
            alert.notify_via.clone(),
            NotificationPriority::High,
        );
        job.data.insert("alert_id".to_string(), json!(alert.id));
        job.data.insert("symbol".to_string(), json!(alert.symbol));
        job.data
            .insert("current_value".to_string(), json!(result.current_value));
        job.data
            .insert("target_value".to_string(), json!(result.target_value));

        if let Err(e) = notifications.queue_notification(job).await {
            error!(
                alert_id = %alert.id,
                correlation_id = %Uuid::new_v4(),
                error = %e,
                "failed to queue triggered-alert delivery"
            );
        }
    }
}

async fn cleanup_worker(
    engine: Arc<AlertEngine>,
    notifications: Arc<NotificationService>,
    notification_repo: Arc<dyn NotificationRepository>,
    interval: Duration,
    retention: ChronoDuration,
    cancel: CancellationToken,
    stop: CancellationToken,
) {
    let mut tick = tokio::time::interval(interval);
    tick.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                info!("cleanup worker cancelled");
                break;
            }
            _ = stop.cancelled() => {
                debug!("cleanup worker stopping");
                break;
            }
            _ = tick.tick() => {
                run_cleanup_cycle(&engine, &notifications, &notification_repo, retention).await;
            }
        }
    }
}

async fn run_cleanup_cycle(
    engine: &AlertEngine,
    notifications: &NotificationService,
    notification_repo: &Arc<dyn NotificationRepository>,
    retention: ChronoDuration,
) {
    engine.cleanup_throttles().await;

    let cutoff = Utc::now() - retention;
    match notification_repo.delete_older_than(cutoff).await {
        Ok(0) => {}
        Ok(removed) => info!(removed, cutoff = %cutoff, "purged old notifications"),
        Err(e) => {
            error!(correlation_id = %Uuid::new_v4(), error = %e, "failed to purge old notifications");
        }
    }

    if let Err(e) = notifications.cleanup_old_notifications(retention).await {
        error!(correlation_id = %Uuid::new_v4(), error = %e, "failed to purge old DLQ entries");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_intervals() {
        let config = MonitorConfig::default();
        assert_eq!(config.evaluation_interval, Duration::from_secs(30));
        assert_eq!(config.cleanup_interval, Duration::from_secs(300));
        assert_eq!(config.notification_retention, ChronoDuration::days(30));
    }
}
