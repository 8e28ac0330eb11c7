use thiserror::Error;
use rust_decimal::Decimal;
use uuid::Uuid;

use crate::domain::alert::{AlertType, ConditionType};
use crate::domain::market::Timeframe;

/// Errors surfaced by alert evaluation.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No market data for {symbol} {timeframe}")]
    MarketDataUnavailable { symbol: String, timeframe: Timeframe },

    #[error("Indicator {indicator} missing for {symbol} {timeframe}")]
    IndicatorMissing {
        symbol: String,
        timeframe: Timeframe,
        indicator: String,
    },

    #[error("Unsupported condition {condition_type} for alert type {alert_type}")]
    UnsupportedCondition {
        alert_type: AlertType,
        condition_type: ConditionType,
    },

    #[error("Persistence failure while handling trigger: {0}")]
    Persistence(#[source] anyhow::Error),
}

/// Errors surfaced by the notification service.
#[derive(Debug, Error)]
pub enum NotificationError {
    #[error("Failed to write to notification queue: {0}")]
    QueueWriteFailed(#[source] anyhow::Error),

    #[error("Failed to persist notification: {0}")]
    Persistence(#[source] anyhow::Error),

    #[error("User not found: {user_id}")]
    UserNotFound { user_id: Uuid },
}

/// Errors surfaced by lifecycle operations on background drivers.
#[derive(Debug, Error)]
pub enum MonitorError {
    #[error("Monitor is not running")]
    NotRunning,
}

/// Violations of the alert predicate invariants, reported before persistence.
#[derive(Debug, Error)]
pub enum AlertValidationError {
    #[error("Target value must be non-negative, got {target_value}")]
    NegativeTarget { target_value: Decimal },

    #[error("Condition {condition_type} is not accepted for alert type {alert_type}")]
    UnsupportedCombination {
        alert_type: AlertType,
        condition_type: ConditionType,
    },

    #[error("notify_via must contain at least one channel")]
    NoChannels,
}
