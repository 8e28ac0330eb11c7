use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use priceguard::application::engine::{AlertEngine, EngineConfig};
use priceguard::domain::alert::{Alert, AlertType, ConditionType};
use priceguard::domain::errors::EngineError;
use priceguard::domain::market::{IndicatorPoint, PricePoint, Timeframe};
use priceguard::domain::notification::{NOTIFICATION_TYPE_ALERT_TRIGGERED, Notification};
use priceguard::domain::repositories::{AlertRepository, NotificationRepository};
use priceguard::infrastructure::{
    InMemoryAlertRepository, InMemoryMarketStore, InMemoryNotificationRepository,
};

fn candle(symbol: &str, timeframe: Timeframe, close: Decimal, at: DateTime<Utc>) -> PricePoint {
    PricePoint {
        symbol: symbol.to_string(),
        timeframe,
        open: close,
        high: close,
        low: close,
        close,
        volume: dec!(100),
        timestamp: at,
    }
}

struct Harness {
    engine: AlertEngine,
    alerts: Arc<InMemoryAlertRepository>,
    notifications: Arc<InMemoryNotificationRepository>,
    market: Arc<InMemoryMarketStore>,
}

/// Engine over in-memory collaborators with a sub-second throttle window so
/// re-trigger behavior is observable without wall-clock waits.
fn harness(throttle_ms: i64) -> Harness {
    let alerts = Arc::new(InMemoryAlertRepository::new());
    let notifications = Arc::new(InMemoryNotificationRepository::new());
    let market = Arc::new(InMemoryMarketStore::new());
    let engine = AlertEngine::new(
        alerts.clone(),
        notifications.clone(),
        market.clone(),
        EngineConfig {
            throttle_window: ChronoDuration::milliseconds(throttle_ms),
            store_timeout: Duration::from_secs(5),
            evaluation_parallelism: 4,
        },
    );
    Harness {
        engine,
        alerts,
        notifications,
        market,
    }
}

// ── S1: price above triggers once, throttles, re-triggers ───────────────

#[tokio::test]
async fn price_above_triggers_once_then_throttles() {
    let h = harness(300);
    let alert = Alert::new(
        Uuid::new_v4(),
        "BTCUSDT",
        AlertType::Price,
        ConditionType::Above,
        dec!(50000),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();
    h.market
        .push_price_point(candle("BTCUSDT", Timeframe::OneHour, dec!(51000), Utc::now()))
        .await;

    // Cycle 1: triggers and persists exactly one notification.
    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(result.should_trigger);
    assert_eq!(result.current_value, dec!(51000));

    let stored = h.notifications.all().await;
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].alert_id, Some(alert.id));
    assert_eq!(stored[0].notification_type, NOTIFICATION_TYPE_ALERT_TRIGGERED);

    // last_triggered_at matches the notification's created_at.
    let marked = h.alerts.get_by_id(alert.id).await.unwrap().unwrap();
    assert_eq!(marked.last_triggered_at, Some(stored[0].created_at));

    // Cycle 2, inside the window and still satisfied: throttled, no new
    // notification.
    h.market
        .push_price_point(candle("BTCUSDT", Timeframe::OneHour, dec!(51500), Utc::now()))
        .await;
    assert!(h.engine.evaluate_alert(&alert).await.unwrap().is_none());
    assert_eq!(h.notifications.all().await.len(), 1);

    // Cycle 3, after the window: triggers again.
    tokio::time::sleep(Duration::from_millis(350)).await;
    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(result.should_trigger);
    assert_eq!(h.notifications.all().await.len(), 2);
}

#[tokio::test]
async fn equal_to_target_does_not_trigger() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "BTCUSDT",
        AlertType::Price,
        ConditionType::Above,
        dec!(50000),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();
    h.market
        .push_price_point(candle("BTCUSDT", Timeframe::OneHour, dec!(50000), Utc::now()))
        .await;

    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(!result.should_trigger);
    assert!(h.notifications.all().await.is_empty());
}

// ── S2: percentage down over 24h ────────────────────────────────────────

#[tokio::test]
async fn percentage_down_over_24h_triggers_at_threshold() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "ETHUSDT",
        AlertType::Percentage,
        ConditionType::Down,
        dec!(5),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();

    let now = Utc::now();
    // Closest candle to now-24h closes at 3000; latest closes at 2850.
    h.market
        .push_price_point(candle(
            "ETHUSDT",
            Timeframe::OneHour,
            dec!(3000),
            now - ChronoDuration::hours(23) - ChronoDuration::minutes(55),
        ))
        .await;
    h.market
        .push_price_point(candle(
            "ETHUSDT",
            Timeframe::OneHour,
            dec!(2950),
            now - ChronoDuration::hours(12),
        ))
        .await;
    h.market
        .push_price_point(candle("ETHUSDT", Timeframe::OneHour, dec!(2850), now))
        .await;

    // (2850 - 3000) / 3000 * 100 = -5.0 <= -5 -> trigger.
    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(result.should_trigger);
    assert_eq!(result.context.get("base_price").unwrap(), &serde_json::json!(dec!(3000)));
}

#[tokio::test]
async fn percentage_without_24h_history_is_unavailable() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "ETHUSDT",
        AlertType::Percentage,
        ConditionType::Down,
        dec!(5),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();

    // Only the latest candle exists; there is no base to compare against.
    h.market
        .push_price_point(candle("ETHUSDT", Timeframe::OneHour, dec!(2850), Utc::now()))
        .await;

    let err = h.engine.evaluate_alert(&alert).await.unwrap_err();
    assert!(matches!(err, EngineError::MarketDataUnavailable { .. }));
}

// ── S3: MA-cross first observation records state only ───────────────────

#[tokio::test]
async fn ema_cross_first_observation_never_triggers() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "ADAUSDT",
        AlertType::EmaCross,
        ConditionType::CrossesUp,
        dec!(12),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();

    let set = |short: Decimal, long: Decimal| {
        let market = h.market.clone();
        async move {
            market
                .set_indicator(IndicatorPoint::new(
                    "ADAUSDT",
                    Timeframe::OneHour,
                    "ema_12",
                    Some(short),
                    Utc::now(),
                ))
                .await;
            market
                .set_indicator(IndicatorPoint::new(
                    "ADAUSDT",
                    Timeframe::OneHour,
                    "ema_24",
                    Some(long),
                    Utc::now(),
                ))
                .await;
        }
    };

    // Cycle 1: short below long; state recorded, no trigger.
    set(dec!(0.50), dec!(0.52)).await;
    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(!result.should_trigger);
    assert_eq!(h.engine.stats().await.cached_state_count, 1);

    // Cycle 2: sign flipped negative -> positive; triggers.
    set(dec!(0.53), dec!(0.52)).await;
    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(result.should_trigger);
    assert_eq!(result.context.get("short_period").unwrap(), &serde_json::json!(12));
    assert_eq!(result.context.get("long_period").unwrap(), &serde_json::json!(24));
}

#[tokio::test]
async fn ma_cross_accepts_up_alias() {
    let h = harness(300_000);
    // "up" is an accepted input spelling for crosses_up on cross alerts.
    let alert = Alert::new(
        Uuid::new_v4(),
        "ADAUSDT",
        AlertType::SmaCross,
        ConditionType::Up,
        dec!(10),
        Timeframe::OneHour,
    );
    assert_eq!(alert.condition_type, ConditionType::CrossesUp);
    h.alerts.create(&alert).await.unwrap();

    let set = |short: Decimal, long: Decimal| {
        let market = h.market.clone();
        async move {
            market
                .set_indicator(IndicatorPoint::new(
                    "ADAUSDT",
                    Timeframe::OneHour,
                    "sma_10",
                    Some(short),
                    Utc::now(),
                ))
                .await;
            market
                .set_indicator(IndicatorPoint::new(
                    "ADAUSDT",
                    Timeframe::OneHour,
                    "sma_20",
                    Some(long),
                    Utc::now(),
                ))
                .await;
        }
    };

    set(dec!(1.0), dec!(1.1)).await;
    let baseline = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(!baseline.should_trigger);

    set(dec!(1.2), dec!(1.1)).await;
    let result = h.engine.evaluate_alert(&alert).await.unwrap().unwrap();
    assert!(result.should_trigger);
}

#[tokio::test]
async fn ma_cross_with_warming_indicator_is_missing() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "ADAUSDT",
        AlertType::EmaCross,
        ConditionType::CrossesUp,
        dec!(12),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();

    // The short EMA exists but carries no value yet; the long one is absent.
    h.market
        .set_indicator(IndicatorPoint::new(
            "ADAUSDT",
            Timeframe::OneHour,
            "ema_12",
            None,
            Utc::now(),
        ))
        .await;

    let err = h.engine.evaluate_alert(&alert).await.unwrap_err();
    assert!(matches!(err, EngineError::IndicatorMissing { .. }));
}

// ── Error kinds ─────────────────────────────────────────────────────────

#[tokio::test]
async fn missing_market_data_is_reported() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "NOSUCH",
        AlertType::Price,
        ConditionType::Above,
        dec!(1),
        Timeframe::OneHour,
    );
    let err = h.engine.evaluate_alert(&alert).await.unwrap_err();
    assert!(matches!(err, EngineError::MarketDataUnavailable { .. }));
}

#[tokio::test]
async fn missing_rsi_indicator_is_reported() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "BTCUSDT",
        AlertType::Rsi,
        ConditionType::Above,
        dec!(70),
        Timeframe::OneHour,
    );
    let err = h.engine.evaluate_alert(&alert).await.unwrap_err();
    assert!(matches!(err, EngineError::IndicatorMissing { .. }));
}

#[tokio::test]
async fn unsupported_pair_is_rejected() {
    let h = harness(300_000);
    // price/up is not in the accepted matrix; build it without validation.
    let mut alert = Alert::new(
        Uuid::new_v4(),
        "BTCUSDT",
        AlertType::Price,
        ConditionType::Above,
        dec!(50000),
        Timeframe::OneHour,
    );
    alert.condition_type = ConditionType::Up;

    let err = h.engine.evaluate_alert(&alert).await.unwrap_err();
    assert!(matches!(err, EngineError::UnsupportedCondition { .. }));
}

// ── Post-trigger persistence failure keeps the throttle ─────────────────

struct FailingNotificationRepository;

#[async_trait]
impl NotificationRepository for FailingNotificationRepository {
    async fn create(&self, _notification: &Notification) -> Result<()> {
        anyhow::bail!("database unavailable")
    }
    async fn get_by_user(&self, _u: Uuid, _l: u32, _o: u32) -> Result<Vec<Notification>> {
        Ok(Vec::new())
    }
    async fn get_unread(&self, _u: Uuid, _l: u32, _o: u32) -> Result<Vec<Notification>> {
        Ok(Vec::new())
    }
    async fn mark_as_read(&self, _ids: &[Uuid], _u: Uuid) -> Result<()> {
        Ok(())
    }
    async fn mark_all_as_read(&self, _u: Uuid) -> Result<u64> {
        Ok(0)
    }
    async fn delete(&self, _id: Uuid) -> Result<()> {
        Ok(())
    }
    async fn delete_older_than(&self, _cutoff: DateTime<Utc>) -> Result<u64> {
        Ok(0)
    }
}

#[tokio::test]
async fn persistence_failure_surfaces_but_installs_throttle() {
    let alerts = Arc::new(InMemoryAlertRepository::new());
    let market = Arc::new(InMemoryMarketStore::new());
    let engine = AlertEngine::new(
        alerts.clone(),
        Arc::new(FailingNotificationRepository),
        market.clone(),
        EngineConfig {
            throttle_window: ChronoDuration::minutes(5),
            store_timeout: Duration::from_secs(5),
            evaluation_parallelism: 4,
        },
    );

    let alert = Alert::new(
        Uuid::new_v4(),
        "BTCUSDT",
        AlertType::Price,
        ConditionType::Above,
        dec!(50000),
        Timeframe::OneHour,
    );
    alerts.create(&alert).await.unwrap();
    market
        .push_price_point(candle("BTCUSDT", Timeframe::OneHour, dec!(51000), Utc::now()))
        .await;

    let err = engine.evaluate_alert(&alert).await.unwrap_err();
    assert!(matches!(err, EngineError::Persistence(_)));

    // The throttle guards against a notification storm on persistent
    // failure: the next evaluation is elided entirely.
    assert!(engine.evaluate_alert(&alert).await.unwrap().is_none());
}

// ── Batch evaluation ────────────────────────────────────────────────────

#[tokio::test]
async fn batch_isolates_per_alert_failures() {
    let h = harness(300_000);

    let good = Alert::new(
        Uuid::new_v4(),
        "BTCUSDT",
        AlertType::Price,
        ConditionType::Above,
        dec!(50000),
        Timeframe::OneHour,
    );
    // This one has no market data and fails; the batch must still complete.
    let bad = Alert::new(
        Uuid::new_v4(),
        "NODATA",
        AlertType::Price,
        ConditionType::Above,
        dec!(1),
        Timeframe::OneHour,
    );
    h.alerts.create(&good).await.unwrap();
    h.alerts.create(&bad).await.unwrap();
    h.market
        .push_price_point(candle("BTCUSDT", Timeframe::OneHour, dec!(51000), Utc::now()))
        .await;

    let results = h.engine.evaluate_all().await;
    assert_eq!(results.len(), 1);
    assert_eq!(results[0].alert_id, good.id);
    assert!(results[0].should_trigger);

    let stats = h.engine.stats().await;
    assert_eq!(stats.enabled_count, 2);
    assert_eq!(stats.throttled_count, 1);
}

#[tokio::test]
async fn batch_evicts_crossover_state_of_removed_alerts() {
    let h = harness(300_000);
    let alert = Alert::new(
        Uuid::new_v4(),
        "ADAUSDT",
        AlertType::EmaCross,
        ConditionType::CrossesUp,
        dec!(12),
        Timeframe::OneHour,
    );
    h.alerts.create(&alert).await.unwrap();
    h.market
        .set_indicator(IndicatorPoint::new(
            "ADAUSDT",
            Timeframe::OneHour,
            "ema_12",
            Some(dec!(0.50)),
            Utc::now(),
        ))
        .await;
    h.market
        .set_indicator(IndicatorPoint::new(
            "ADAUSDT",
            Timeframe::OneHour,
            "ema_24",
            Some(dec!(0.52)),
            Utc::now(),
        ))
        .await;

    h.engine.evaluate_all().await;
    assert_eq!(h.engine.stats().await.cached_state_count, 1);

    // Delete the alert; the next cycle drops its cached state.
    h.alerts.delete(alert.id).await.unwrap();
    h.engine.evaluate_all().await;
    assert_eq!(h.engine.stats().await.cached_state_count, 0);
}
