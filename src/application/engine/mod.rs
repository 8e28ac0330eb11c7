//! Alert Engine: decides whether an alert should trigger against the current
//! market snapshot, applies the throttle window, and runs the post-trigger
//! pipeline (mark -> persist notification -> throttle -> broadcast).

pub mod conditions;
pub mod state;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures_util::stream::{self, StreamExt};
use rust_decimal::Decimal;
use serde::Serialize;
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::application::broadcast::BroadcastHub;
use crate::application::engine::conditions::ConditionOutcome;
use crate::application::engine::state::{CrossoverStateStore, ThrottleStore};
use crate::domain::alert::{Alert, AlertType};
use crate::domain::errors::EngineError;
use crate::domain::events::{
    MSG_ALERT_TRIGGERED, MSG_NOTIFICATION_UPDATE, alert_triggered_payload,
    notification_update_payload,
};
use crate::domain::market::PricePoint;
use crate::domain::market::types::{RSI_INDICATOR_KEY, ma_indicator_key};
use crate::domain::notification::{NOTIFICATION_TYPE_ALERT_TRIGGERED, Notification};
use crate::domain::ports::MarketStore;
use crate::domain::repositories::{AlertRepository, NotificationRepository};

/// Tunables for evaluation; see `Config` for the env-driven defaults.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub throttle_window: ChronoDuration,
    pub store_timeout: Duration,
    pub evaluation_parallelism: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            throttle_window: ChronoDuration::minutes(5),
            store_timeout: Duration::from_secs(5),
            evaluation_parallelism: 2 * num_cpus(),
        }
    }
}

pub(crate) fn num_cpus() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// The outcome of evaluating one alert.
#[derive(Debug, Clone, Serialize)]
pub struct EvaluationResult {
    pub alert_id: Uuid,
    pub should_trigger: bool,
    pub current_value: Decimal,
    pub target_value: Decimal,
    pub message: String,
    pub context: HashMap<String, Value>,
}

/// Point-in-time engine counters.
#[derive(Debug, Clone, Serialize)]
pub struct EngineStats {
    pub enabled_count: usize,
    pub throttled_count: usize,
    pub cached_state_count: usize,
    pub last_update: DateTime<Utc>,
}

pub struct AlertEngine {
    alerts: Arc<dyn AlertRepository>,
    notifications: Arc<dyn NotificationRepository>,
    market: Arc<dyn MarketStore>,
    hub: RwLock<Option<Arc<BroadcastHub>>>,
    throttles: ThrottleStore,
    crossovers: CrossoverStateStore,
    enabled_count: RwLock<usize>,
    last_update: RwLock<DateTime<Utc>>,
    config: EngineConfig,
}

impl AlertEngine {
    pub fn new(
        alerts: Arc<dyn AlertRepository>,
        notifications: Arc<dyn NotificationRepository>,
        market: Arc<dyn MarketStore>,
        config: EngineConfig,
    ) -> Self {
        Self {
            alerts,
            notifications,
            market,
            hub: RwLock::new(None),
            throttles: ThrottleStore::new(),
            crossovers: CrossoverStateStore::new(),
            enabled_count: RwLock::new(0),
            last_update: RwLock::new(Utc::now()),
            config,
        }
    }

    /// Late-binds the fan-out collaborator. Passing `None` detaches it;
    /// evaluation works either way.
    pub async fn set_broadcast_hub(&self, hub: Option<Arc<BroadcastHub>>) {
        *self.hub.write().await = hub;
    }

    /// Evaluates one alert against the current market snapshot.
    ///
    /// Returns `None` while the alert sits inside its throttle window; in
    /// that case nothing is persisted or broadcast.
    pub async fn evaluate_alert(
        &self,
        alert: &Alert,
    ) -> Result<Option<EvaluationResult>, EngineError> {
        let now = Utc::now();
        if self.throttles.is_throttled(alert.id, now).await {
            debug!(alert_id = %alert.id, "alert throttled; skipping evaluation");
            return Ok(None);
        }

        if !alert.is_supported_pair() {
            return Err(EngineError::UnsupportedCondition {
                alert_type: alert.alert_type,
                condition_type: alert.condition_type,
            });
        }

        let outcome = match alert.alert_type {
            AlertType::Price => self.evaluate_price(alert).await?,
            AlertType::Percentage => self.evaluate_percentage(alert, now).await?,
            AlertType::Rsi => self.evaluate_rsi(alert).await?,
            AlertType::EmaCross | AlertType::SmaCross => self.evaluate_cross(alert, now).await?,
        };

        if outcome.should_trigger {
            self.handle_trigger(alert, &outcome, now).await?;
        }

        Ok(Some(EvaluationResult {
            alert_id: alert.id,
            should_trigger: outcome.should_trigger,
            current_value: outcome.current_value,
            target_value: alert.target_value,
            message: outcome.message,
            context: outcome.context,
        }))
    }

    /// Evaluates every enabled alert with bounded parallelism. Per-alert
    /// failures are logged and omitted; the batch always completes.
    pub async fn evaluate_all(&self) -> Vec<EvaluationResult> {
        let enabled = match self
            .store_call(self.alerts.get_enabled(), "alert repository")
            .await
        {
            Ok(alerts) => alerts,
            Err(e) => {
                error!(correlation_id = %Uuid::new_v4(), error = %e, "failed to load enabled alerts");
                return Vec::new();
            }
        };

        let enabled_ids: HashSet<Uuid> = enabled.iter().map(|a| a.id).collect();
        let evicted = self.crossovers.retain_ids(&enabled_ids).await;
        if evicted > 0 {
            debug!(evicted, "evicted crossover state for disabled alerts");
        }

        *self.enabled_count.write().await = enabled.len();
        *self.last_update.write().await = Utc::now();

        let parallelism = self.config.evaluation_parallelism.max(1);
        let results: Vec<Option<EvaluationResult>> = stream::iter(enabled)
            .map(|alert| async move {
                match self.evaluate_alert(&alert).await {
                    Ok(result) => result,
                    Err(e) => {
                        warn!(
                            alert_id = %alert.id,
                            correlation_id = %Uuid::new_v4(),
                            error = %e,
                            "alert evaluation failed"
                        );
                        None
                    }
                }
            })
            .buffer_unordered(parallelism)
            .collect()
            .await;

        results.into_iter().flatten().collect()
    }

    /// Drops expired throttle entries. Idempotent.
    pub async fn cleanup_throttles(&self) {
        let removed = self.throttles.cleanup(Utc::now()).await;
        if removed > 0 {
            info!(removed, "cleaned up expired alert throttles");
        }
    }

    pub async fn stats(&self) -> EngineStats {
        let now = Utc::now();
        EngineStats {
            enabled_count: *self.enabled_count.read().await,
            throttled_count: self.throttles.active_count(now).await,
            cached_state_count: self.crossovers.len().await,
            last_update: *self.last_update.read().await,
        }
    }

    // ── Per-type evaluation ─────────────────────────────────────────────

    async fn evaluate_price(&self, alert: &Alert) -> Result<ConditionOutcome, EngineError> {
        let latest = self.latest_price_point(alert).await?;
        Ok(conditions::price_outcome(alert, &latest))
    }

    async fn evaluate_percentage(
        &self,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<ConditionOutcome, EngineError> {
        let latest = self.latest_price_point(alert).await?;

        // Enough candles to span the 24h comparison window.
        let span = 86_400 / alert.timeframe.to_seconds().max(1);
        let count = usize::try_from(span).unwrap_or(usize::MAX).clamp(2, 2_000);

        let history = self
            .store_call(
                self.market.get_price_history(&alert.symbol, alert.timeframe, count),
                "market store",
            )
            .await
            .map_err(|e| self.market_unavailable(alert, e))?;

        let base = nearest_to_window_start(&history, now, latest.timestamp).ok_or_else(|| {
            EngineError::MarketDataUnavailable {
                symbol: alert.symbol.clone(),
                timeframe: alert.timeframe,
            }
        })?;

        Ok(conditions::percentage_outcome(alert, &latest, &base))
    }

    async fn evaluate_rsi(&self, alert: &Alert) -> Result<ConditionOutcome, EngineError> {
        let value = self.indicator_value(alert, RSI_INDICATOR_KEY).await?;
        Ok(conditions::rsi_outcome(alert, value))
    }

    async fn evaluate_cross(
        &self,
        alert: &Alert,
        now: DateTime<Utc>,
    ) -> Result<ConditionOutcome, EngineError> {
        let short_period = alert.ma_short_period().ok_or(EngineError::UnsupportedCondition {
            alert_type: alert.alert_type,
            condition_type: alert.condition_type,
        })?;
        let long_period = short_period * 2;

        // ma_kind is Some for every cross alert type.
        let kind = alert.alert_type.ma_kind().unwrap_or("ema");
        let short_ma = self
            .indicator_value(alert, &ma_indicator_key(kind, short_period))
            .await?;
        let long_ma = self
            .indicator_value(alert, &ma_indicator_key(kind, long_period))
            .await?;

        let previous = self.crossovers.observe(alert.id, short_ma, long_ma, now).await;
        Ok(conditions::cross_outcome(
            alert,
            previous.as_ref(),
            short_ma,
            long_ma,
            short_period,
            long_period,
        ))
    }

    // ── Market store access ─────────────────────────────────────────────

    async fn latest_price_point(&self, alert: &Alert) -> Result<PricePoint, EngineError> {
        self.store_call(
            self.market.get_latest_price_point(&alert.symbol, alert.timeframe),
            "market store",
        )
        .await
        .map_err(|e| self.market_unavailable(alert, e))?
        .ok_or_else(|| EngineError::MarketDataUnavailable {
            symbol: alert.symbol.clone(),
            timeframe: alert.timeframe,
        })
    }

    async fn indicator_value(
        &self,
        alert: &Alert,
        indicator: &str,
    ) -> Result<Decimal, EngineError> {
        let missing = || EngineError::IndicatorMissing {
            symbol: alert.symbol.clone(),
            timeframe: alert.timeframe,
            indicator: indicator.to_string(),
        };

        let point = self
            .store_call(
                self.market
                    .get_latest_indicator(&alert.symbol, alert.timeframe, indicator),
                "market store",
            )
            .await
            .map_err(|e| self.market_unavailable(alert, e))?
            .ok_or_else(missing)?;

        point.value.ok_or_else(missing)
    }

    /// Bounds a collaborator call with the configured store timeout.
    async fn store_call<T>(
        &self,
        fut: impl Future<Output = anyhow::Result<T>>,
        what: &str,
    ) -> anyhow::Result<T> {
        match tokio::time::timeout(self.config.store_timeout, fut).await {
            Ok(result) => result,
            Err(_) => anyhow::bail!("{} call timed out after {:?}", what, self.config.store_timeout),
        }
    }

    fn market_unavailable(&self, alert: &Alert, error: anyhow::Error) -> EngineError {
        warn!(
            alert_id = %alert.id,
            symbol = %alert.symbol,
            error = %error,
            "market store unavailable"
        );
        EngineError::MarketDataUnavailable {
            symbol: alert.symbol.clone(),
            timeframe: alert.timeframe,
        }
    }

    // ── Post-trigger pipeline ───────────────────────────────────────────

    /// Side effects of a trigger, in order: mark-triggered, persist the
    /// in-app notification, install the throttle, broadcast. Each step is
    /// best-effort; a persistence failure is surfaced after the remaining
    /// steps so the throttle still guards against notification storms.
    async fn handle_trigger(
        &self,
        alert: &Alert,
        outcome: &ConditionOutcome,
        now: DateTime<Utc>,
    ) -> Result<(), EngineError> {
        info!(
            alert_id = %alert.id,
            symbol = %alert.symbol,
            alert_type = %alert.alert_type,
            current_value = %outcome.current_value,
            "alert triggered"
        );

        let mut persistence_error: Option<anyhow::Error> = None;

        if let Err(e) = self.alerts.mark_triggered(alert.id, now).await {
            error!(alert_id = %alert.id, correlation_id = %Uuid::new_v4(), error = %e, "failed to mark alert triggered");
            persistence_error = Some(e);
        }

        let mut notification = Notification::new(
            alert.user_id,
            Some(alert.id),
            format!("{} alert", alert.symbol),
            outcome.message.clone(),
            NOTIFICATION_TYPE_ALERT_TRIGGERED,
        );
        notification.created_at = now;

        let created = match self.notifications.create(&notification).await {
            Ok(()) => Some(notification),
            Err(e) => {
                error!(alert_id = %alert.id, correlation_id = %Uuid::new_v4(), error = %e, "failed to persist notification");
                if persistence_error.is_none() {
                    persistence_error = Some(e);
                }
                None
            }
        };

        self.throttles
            .install(alert.id, now + self.config.throttle_window)
            .await;

        if let Some(hub) = self.hub.read().await.clone() {
            hub.broadcast_to_user(
                alert.user_id,
                MSG_ALERT_TRIGGERED,
                alert_triggered_payload(alert, outcome.current_value, &outcome.message, &outcome.context, now),
            )
            .await;

            if let Some(n) = &created {
                hub.broadcast_to_user(
                    alert.user_id,
                    MSG_NOTIFICATION_UPDATE,
                    notification_update_payload(n),
                )
                .await;
            }
        }

        match persistence_error {
            Some(e) => Err(EngineError::Persistence(e)),
            None => Ok(()),
        }
    }
}

/// Picks the base candle for the 24h percentage comparison: the point inside
/// `[now - 24h, latest)` whose timestamp is closest to the window start.
fn nearest_to_window_start(
    history: &[PricePoint],
    now: DateTime<Utc>,
    latest_ts: DateTime<Utc>,
) -> Option<PricePoint> {
    let window_start = now - ChronoDuration::hours(24);
    history
        .iter()
        .filter(|p| p.timestamp >= window_start && p.timestamp < latest_ts)
        .min_by_key(|p| (p.timestamp - window_start).abs())
        .cloned()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Timeframe;
    use rust_decimal_macros::dec;

    fn point(hours_ago: i64, close: Decimal, now: DateTime<Utc>) -> PricePoint {
        PricePoint {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneHour,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            timestamp: now - ChronoDuration::hours(hours_ago),
        }
    }

    #[test]
    fn test_nearest_to_window_start_picks_oldest_in_window() {
        let now = Utc::now();
        let history = vec![
            point(30, dec!(2900), now), // outside the window
            point(23, dec!(3000), now), // closest to now - 24h
            point(10, dec!(3100), now),
            point(0, dec!(2850), now), // the latest itself
        ];

        let base = nearest_to_window_start(&history, now, now).unwrap();
        assert_eq!(base.close, dec!(3000));
    }

    #[test]
    fn test_nearest_to_window_start_empty_window() {
        let now = Utc::now();
        // Only points older than 24h
        let history = vec![point(30, dec!(2900), now), point(48, dec!(2800), now)];
        assert!(nearest_to_window_start(&history, now, now).is_none());
    }

    #[test]
    fn test_nearest_excludes_latest_candle() {
        let now = Utc::now();
        let latest_ts = now - ChronoDuration::hours(1);
        let history = vec![point(1, dec!(2850), now)];
        // The only in-window candle is the latest one; no base exists.
        assert!(nearest_to_window_start(&history, now, latest_ts).is_none());
    }
}
