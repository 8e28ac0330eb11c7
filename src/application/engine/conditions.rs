//! Predicate evaluation for the accepted (alert_type, condition_type) matrix.
//!
//! These functions are pure over their inputs; the engine is responsible for
//! fetching market data, throttling, and post-trigger side effects.

use rust_decimal::Decimal;
use serde_json::{Value, json};
use std::collections::HashMap;
use tracing::warn;

use crate::application::engine::state::CrossoverState;
use crate::domain::alert::{Alert, ConditionType};
use crate::domain::market::PricePoint;

/// Outcome of one predicate check.
#[derive(Debug, Clone)]
pub struct ConditionOutcome {
    pub should_trigger: bool,
    pub current_value: Decimal,
    pub message: String,
    pub context: HashMap<String, Value>,
}

fn candle_context(point: &PricePoint) -> HashMap<String, Value> {
    HashMap::from([
        ("open".to_string(), json!(point.open)),
        ("high".to_string(), json!(point.high)),
        ("low".to_string(), json!(point.low)),
        ("close".to_string(), json!(point.close)),
        ("volume".to_string(), json!(point.volume)),
        ("timestamp".to_string(), json!(point.timestamp)),
    ])
}

/// price/above, price/below: strict comparison of the latest close against
/// the target. Equality never triggers.
pub fn price_outcome(alert: &Alert, latest: &PricePoint) -> ConditionOutcome {
    let close = latest.close;
    let (should_trigger, direction) = match alert.canonical_condition() {
        ConditionType::Above => (close > alert.target_value, "above"),
        ConditionType::Below => (close < alert.target_value, "below"),
        other => {
            // Unreachable for validated alerts.
            warn!(alert_id = %alert.id, condition = %other, "price alert with non-price condition");
            (false, "invalid")
        }
    };

    let message = if should_trigger {
        format!(
            "{} price is {} {}: current {}",
            alert.symbol, direction, alert.target_value, close
        )
    } else {
        format!(
            "{} price {} is not {} {}",
            alert.symbol, close, direction, alert.target_value
        )
    };

    ConditionOutcome {
        should_trigger,
        current_value: close,
        message,
        context: candle_context(latest),
    }
}

/// percentage/up, percentage/down: 24 h change of the latest close against
/// the base candle. The down-target is stated positive and compared against
/// the negated magnitude. A zero base cannot produce a finite percentage and
/// is treated as non-triggering.
pub fn percentage_outcome(alert: &Alert, latest: &PricePoint, base: &PricePoint) -> ConditionOutcome {
    let close = latest.close;

    let change_pct = match (close - base.close).checked_div(base.close) {
        Some(ratio) => ratio * Decimal::from(100),
        None => {
            warn!(
                alert_id = %alert.id,
                symbol = %alert.symbol,
                base_close = %base.close,
                "percentage alert has zero base price; treating as non-trigger"
            );
            let mut context = candle_context(latest);
            context.insert("base_price".to_string(), json!(base.close));
            context.insert("base_timestamp".to_string(), json!(base.timestamp));
            return ConditionOutcome {
                should_trigger: false,
                current_value: close,
                message: format!("{} 24h change unavailable (zero base price)", alert.symbol),
                context,
            };
        }
    };

    let (should_trigger, direction) = match alert.canonical_condition() {
        ConditionType::Up => (change_pct >= alert.target_value, "up"),
        ConditionType::Down => (change_pct <= -alert.target_value, "down"),
        other => {
            warn!(alert_id = %alert.id, condition = %other, "percentage alert with non-directional condition");
            (false, "invalid")
        }
    };

    let rounded = change_pct.round_dp(2);
    let message = if should_trigger {
        format!(
            "{} is {} {}% over 24h ({}%)",
            alert.symbol, direction, alert.target_value, rounded
        )
    } else {
        format!("{} 24h change is {}%", alert.symbol, rounded)
    };

    let mut context = candle_context(latest);
    context.insert("base_price".to_string(), json!(base.close));
    context.insert("base_timestamp".to_string(), json!(base.timestamp));
    context.insert("change_pct".to_string(), json!(change_pct));

    ConditionOutcome {
        should_trigger,
        current_value: close,
        message,
        context,
    }
}

/// rsi/above, rsi/below: strict comparison of the latest RSI reading.
pub fn rsi_outcome(alert: &Alert, rsi: Decimal) -> ConditionOutcome {
    let (should_trigger, direction) = match alert.canonical_condition() {
        ConditionType::Above => (rsi > alert.target_value, "above"),
        ConditionType::Below => (rsi < alert.target_value, "below"),
        other => {
            warn!(alert_id = %alert.id, condition = %other, "rsi alert with non-threshold condition");
            (false, "invalid")
        }
    };

    let message = if should_trigger {
        format!(
            "{} RSI is {} {}: current {}",
            alert.symbol, direction, alert.target_value, rsi
        )
    } else {
        format!("{} RSI is {}", alert.symbol, rsi)
    };

    ConditionOutcome {
        should_trigger,
        current_value: rsi,
        message,
        context: HashMap::from([("rsi".to_string(), json!(rsi))]),
    }
}

/// ema_cross/sma_cross: a trigger requires the sign of (short - long) to flip
/// between the previous observation and this one, in the configured
/// direction. The first observation only records state.
pub fn cross_outcome(
    alert: &Alert,
    previous: Option<&CrossoverState>,
    short_ma: Decimal,
    long_ma: Decimal,
    short_period: u32,
    long_period: u32,
) -> ConditionOutcome {
    let current_diff = short_ma - long_ma;

    let should_trigger = match previous {
        None => false,
        Some(prev) => {
            let prev_diff = prev.short_ma - prev.long_ma;
            match alert.canonical_condition() {
                ConditionType::CrossesUp => {
                    prev_diff < Decimal::ZERO && current_diff > Decimal::ZERO
                }
                ConditionType::CrossesDown => {
                    prev_diff > Decimal::ZERO && current_diff < Decimal::ZERO
                }
                other => {
                    warn!(alert_id = %alert.id, condition = %other, "cross alert with non-cross condition");
                    false
                }
            }
        }
    };

    let kind = alert.alert_type.ma_kind().unwrap_or("ma").to_uppercase();
    let message = if should_trigger {
        let direction = match alert.canonical_condition() {
            ConditionType::CrossesUp => "crossed above",
            _ => "crossed below",
        };
        format!(
            "{} {}{} {} {}{}",
            alert.symbol, kind, short_period, direction, kind, long_period
        )
    } else if previous.is_none() {
        format!("{} {} crossover baseline recorded", alert.symbol, kind)
    } else {
        format!("{} {} spread is {}", alert.symbol, kind, current_diff)
    };

    ConditionOutcome {
        should_trigger,
        current_value: short_ma,
        message,
        context: HashMap::from([
            ("short_ma".to_string(), json!(short_ma)),
            ("long_ma".to_string(), json!(long_ma)),
            ("short_period".to_string(), json!(short_period)),
            ("long_period".to_string(), json!(long_period)),
        ]),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::alert::AlertType;
    use crate::domain::market::Timeframe;
    use chrono::Utc;
    use rust_decimal_macros::dec;
    use uuid::Uuid;

    fn alert(alert_type: AlertType, condition: ConditionType, target: Decimal) -> Alert {
        Alert::new(
            Uuid::new_v4(),
            "BTCUSDT",
            alert_type,
            condition,
            target,
            Timeframe::OneHour,
        )
    }

    fn candle(close: Decimal) -> PricePoint {
        PricePoint {
            symbol: "BTCUSDT".to_string(),
            timeframe: Timeframe::OneHour,
            open: close,
            high: close,
            low: close,
            close,
            volume: dec!(1),
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_price_above_strict() {
        let a = alert(AlertType::Price, ConditionType::Above, dec!(50000));
        assert!(price_outcome(&a, &candle(dec!(51000))).should_trigger);
        // Equality does not trigger
        assert!(!price_outcome(&a, &candle(dec!(50000))).should_trigger);
        assert!(!price_outcome(&a, &candle(dec!(49999))).should_trigger);
    }

    #[test]
    fn test_price_below_strict() {
        let a = alert(AlertType::Price, ConditionType::Below, dec!(50000));
        assert!(price_outcome(&a, &candle(dec!(49000))).should_trigger);
        assert!(!price_outcome(&a, &candle(dec!(50000))).should_trigger);
    }

    #[test]
    fn test_percentage_down_boundary() {
        // (2850 - 3000) / 3000 * 100 = -5.0, target 5 (down) -> triggers
        let a = alert(AlertType::Percentage, ConditionType::Down, dec!(5));
        let outcome = percentage_outcome(&a, &candle(dec!(2850)), &candle(dec!(3000)));
        assert!(outcome.should_trigger);

        let change: Decimal =
            serde_json::from_value(outcome.context["change_pct"].clone()).unwrap();
        assert_eq!(change, dec!(-5));
    }

    #[test]
    fn test_percentage_up_requires_threshold() {
        let a = alert(AlertType::Percentage, ConditionType::Up, dec!(5));
        // +4.9% does not trigger
        let outcome = percentage_outcome(&a, &candle(dec!(3147)), &candle(dec!(3000)));
        assert!(!outcome.should_trigger);
        // +5% exactly triggers (inclusive per the matrix)
        let outcome = percentage_outcome(&a, &candle(dec!(3150)), &candle(dec!(3000)));
        assert!(outcome.should_trigger);
    }

    #[test]
    fn test_percentage_zero_base_is_non_trigger() {
        let a = alert(AlertType::Percentage, ConditionType::Down, dec!(5));
        let outcome = percentage_outcome(&a, &candle(dec!(2850)), &candle(dec!(0)));
        assert!(!outcome.should_trigger);
        assert!(outcome.message.contains("unavailable"));
    }

    #[test]
    fn test_rsi_thresholds() {
        let above = alert(AlertType::Rsi, ConditionType::Above, dec!(70));
        assert!(rsi_outcome(&above, dec!(71)).should_trigger);
        assert!(!rsi_outcome(&above, dec!(70)).should_trigger);

        let below = alert(AlertType::Rsi, ConditionType::Below, dec!(30));
        assert!(rsi_outcome(&below, dec!(29.5)).should_trigger);
        assert!(!rsi_outcome(&below, dec!(30)).should_trigger);
    }

    fn state(short: Decimal, long: Decimal) -> CrossoverState {
        CrossoverState {
            short_ma: short,
            long_ma: long,
            observed_at: Utc::now(),
        }
    }

    #[test]
    fn test_cross_first_observation_never_triggers() {
        let a = alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(12));
        let outcome = cross_outcome(&a, None, dec!(0.50), dec!(0.52), 12, 24);
        assert!(!outcome.should_trigger);
    }

    #[test]
    fn test_cross_up_on_sign_flip() {
        let a = alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(12));
        let prev = state(dec!(0.50), dec!(0.52));
        let outcome = cross_outcome(&a, Some(&prev), dec!(0.53), dec!(0.52), 12, 24);
        assert!(outcome.should_trigger);
        assert_eq!(outcome.context["short_period"], json!(12));
        assert_eq!(outcome.context["long_period"], json!(24));
    }

    #[test]
    fn test_cross_down_direction_must_match() {
        let a = alert(AlertType::SmaCross, ConditionType::CrossesDown, dec!(10));
        // Upward flip does not satisfy a crosses_down alert
        let prev = state(dec!(0.50), dec!(0.52));
        let outcome = cross_outcome(&a, Some(&prev), dec!(0.53), dec!(0.52), 10, 20);
        assert!(!outcome.should_trigger);

        let prev = state(dec!(0.53), dec!(0.52));
        let outcome = cross_outcome(&a, Some(&prev), dec!(0.50), dec!(0.52), 10, 20);
        assert!(outcome.should_trigger);
    }

    #[test]
    fn test_identical_observations_never_trigger() {
        // Two consecutive identical readings: diff sign is unchanged.
        let a = alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(12));
        let prev = state(dec!(0.53), dec!(0.52));
        let outcome = cross_outcome(&a, Some(&prev), dec!(0.53), dec!(0.52), 12, 24);
        assert!(!outcome.should_trigger);
    }

    #[test]
    fn test_touching_zero_does_not_trigger() {
        // prev diff < 0, current diff == 0: no strict sign flip.
        let a = alert(AlertType::EmaCross, ConditionType::CrossesUp, dec!(12));
        let prev = state(dec!(0.50), dec!(0.52));
        let outcome = cross_outcome(&a, Some(&prev), dec!(0.52), dec!(0.52), 12, 24);
        assert!(!outcome.should_trigger);
    }
}
