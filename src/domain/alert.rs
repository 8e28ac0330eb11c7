use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::domain::errors::AlertValidationError;
use crate::domain::market::Timeframe;

/// What market quantity an alert watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    Price,
    Percentage,
    Rsi,
    EmaCross,
    SmaCross,
}

impl AlertType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertType::Price => "price",
            AlertType::Percentage => "percentage",
            AlertType::Rsi => "rsi",
            AlertType::EmaCross => "ema_cross",
            AlertType::SmaCross => "sma_cross",
        }
    }

    pub fn is_ma_cross(&self) -> bool {
        matches!(self, AlertType::EmaCross | AlertType::SmaCross)
    }

    /// Indicator key prefix for MA-cross lookups (`ema` / `sma`).
    pub fn ma_kind(&self) -> Option<&'static str> {
        match self {
            AlertType::EmaCross => Some("ema"),
            AlertType::SmaCross => Some("sma"),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// How the watched quantity is compared against the target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionType {
    Above,
    Below,
    Up,
    Down,
    CrossesUp,
    CrossesDown,
}

impl ConditionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConditionType::Above => "above",
            ConditionType::Below => "below",
            ConditionType::Up => "up",
            ConditionType::Down => "down",
            ConditionType::CrossesUp => "crosses_up",
            ConditionType::CrossesDown => "crosses_down",
        }
    }

    /// Normalizes the condition for a given alert type. MA-cross alerts accept
    /// `up`/`down` as input spellings for `crosses_up`/`crosses_down`; the
    /// canonical form is what evaluation and serialized output use.
    pub fn canonical_for(&self, alert_type: AlertType) -> ConditionType {
        if alert_type.is_ma_cross() {
            match self {
                ConditionType::Up => ConditionType::CrossesUp,
                ConditionType::Down => ConditionType::CrossesDown,
                other => *other,
            }
        } else {
            *self
        }
    }
}

impl std::fmt::Display for ConditionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Delivery channel for a triggered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    App,
    Email,
    Push,
    Sms,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::App => "app",
            NotificationChannel::Email => "email",
            NotificationChannel::Push => "push",
            NotificationChannel::Sms => "sms",
        }
    }
}

impl std::fmt::Display for NotificationChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A user-defined predicate over market state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: Uuid,
    pub user_id: Uuid,
    pub symbol: String,
    pub alert_type: AlertType,
    pub condition_type: ConditionType,
    pub target_value: Decimal,
    pub timeframe: Timeframe,
    pub enabled: bool,
    pub notify_via: Vec<NotificationChannel>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Alert {
    pub fn new(
        user_id: Uuid,
        symbol: impl Into<String>,
        alert_type: AlertType,
        condition_type: ConditionType,
        target_value: Decimal,
        timeframe: Timeframe,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            user_id,
            symbol: symbol.into(),
            alert_type,
            condition_type: condition_type.canonical_for(alert_type),
            target_value: target_value.round_dp(8),
            timeframe,
            enabled: true,
            notify_via: vec![NotificationChannel::App],
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// The condition in its canonical spelling (`crosses_up`/`crosses_down`
    /// for MA-cross alerts regardless of the stored alias).
    pub fn canonical_condition(&self) -> ConditionType {
        self.condition_type.canonical_for(self.alert_type)
    }

    /// Whether the (alert_type, condition_type) pair is in the accepted matrix.
    pub fn is_supported_pair(&self) -> bool {
        matches!(
            (self.alert_type, self.canonical_condition()),
            (AlertType::Price, ConditionType::Above)
                | (AlertType::Price, ConditionType::Below)
                | (AlertType::Percentage, ConditionType::Up)
                | (AlertType::Percentage, ConditionType::Down)
                | (AlertType::Rsi, ConditionType::Above)
                | (AlertType::Rsi, ConditionType::Below)
                | (AlertType::EmaCross, ConditionType::CrossesUp)
                | (AlertType::EmaCross, ConditionType::CrossesDown)
                | (AlertType::SmaCross, ConditionType::CrossesUp)
                | (AlertType::SmaCross, ConditionType::CrossesDown)
        )
    }

    /// Validates the predicate before persistence.
    pub fn validate(&self) -> Result<(), AlertValidationError> {
        if self.target_value < Decimal::ZERO {
            return Err(AlertValidationError::NegativeTarget {
                target_value: self.target_value,
            });
        }
        if !self.is_supported_pair() {
            return Err(AlertValidationError::UnsupportedCombination {
                alert_type: self.alert_type,
                condition_type: self.condition_type,
            });
        }
        if self.notify_via.is_empty() {
            return Err(AlertValidationError::NoChannels);
        }
        Ok(())
    }

    /// Short period for MA-cross alerts, read from `target_value`. The long
    /// period is always twice the short one.
    pub fn ma_short_period(&self) -> Option<u32> {
        if !self.alert_type.is_ma_cross() {
            return None;
        }
        let period = self.target_value.trunc().to_u32()?;
        (period > 0).then_some(period)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn alert(alert_type: AlertType, condition_type: ConditionType, target: Decimal) -> Alert {
        Alert::new(
            Uuid::new_v4(),
            "BTCUSDT",
            alert_type,
            condition_type,
            target,
            Timeframe::OneHour,
        )
    }

    #[test]
    fn test_accepted_matrix() {
        assert!(alert(AlertType::Price, ConditionType::Above, dec!(50000)).validate().is_ok());
        assert!(alert(AlertType::Percentage, ConditionType::Down, dec!(5)).validate().is_ok());
        assert!(alert(AlertType::Rsi, ConditionType::Below, dec!(30)).validate().is_ok());
        assert!(alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(12)).validate().is_ok());

        assert!(alert(AlertType::Price, ConditionType::Up, dec!(50000)).validate().is_err());
        assert!(alert(AlertType::Rsi, ConditionType::CrossesDown, dec!(70)).validate().is_err());
        assert!(alert(AlertType::Percentage, ConditionType::Above, dec!(5)).validate().is_err());
    }

    #[test]
    fn test_cross_direction_aliases_normalize() {
        let a = alert(AlertType::EmaCross, ConditionType::Up, dec!(12));
        assert_eq!(a.condition_type, ConditionType::CrossesUp);
        assert!(a.validate().is_ok());

        let a = alert(AlertType::SmaCross, ConditionType::Down, dec!(20));
        assert_eq!(a.condition_type, ConditionType::CrossesDown);
        assert!(a.validate().is_ok());
    }

    #[test]
    fn test_negative_target_rejected() {
        let a = alert(AlertType::Price, ConditionType::Above, dec!(-1));
        assert!(matches!(
            a.validate(),
            Err(AlertValidationError::NegativeTarget { .. })
        ));
    }

    #[test]
    fn test_empty_channels_rejected() {
        let mut a = alert(AlertType::Price, ConditionType::Above, dec!(100));
        a.notify_via.clear();
        assert!(matches!(a.validate(), Err(AlertValidationError::NoChannels)));
    }

    #[test]
    fn test_default_channel_is_app() {
        let a = alert(AlertType::Price, ConditionType::Above, dec!(100));
        assert_eq!(a.notify_via, vec![NotificationChannel::App]);
    }

    #[test]
    fn test_ma_short_period() {
        let a = alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(12));
        assert_eq!(a.ma_short_period(), Some(12));

        // Fractional targets truncate to the integer period
        let a = alert(AlertType::SmaCross, ConditionType::CrossesUp, dec!(20.9));
        assert_eq!(a.ma_short_period(), Some(20));

        // Zero is not a usable period
        let a = alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(0));
        assert_eq!(a.ma_short_period(), None);

        // Non-cross alerts have no period semantics
        let a = alert(AlertType::Price, ConditionType::Above, dec!(12));
        assert_eq!(a.ma_short_period(), None);
    }

    #[test]
    fn test_target_normalized_to_eight_decimals() {
        let a = alert(AlertType::Price, ConditionType::Above, dec!(0.123456789123));
        assert_eq!(a.target_value, dec!(0.12345679));
    }

    #[test]
    fn test_wire_forms() {
        assert_eq!(
            serde_json::to_string(&AlertType::EmaCross).unwrap(),
            "\"ema_cross\""
        );
        assert_eq!(
            serde_json::to_string(&ConditionType::CrossesUp).unwrap(),
            "\"crosses_up\""
        );
        assert_eq!(
            serde_json::to_string(&NotificationChannel::App).unwrap(),
            "\"app\""
        );
    }
}
