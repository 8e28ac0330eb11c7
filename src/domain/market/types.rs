use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::domain::market::Timeframe;

/// One OHLCV candle for a (symbol, timeframe) pair.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PricePoint {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub open: Decimal,
    pub high: Decimal,
    pub low: Decimal,
    pub close: Decimal,
    pub volume: Decimal,
    pub timestamp: DateTime<Utc>,
}

impl PricePoint {
    /// Candle shape invariant: low <= min(open, close) <= max(open, close) <= high,
    /// volume >= 0.
    pub fn is_well_formed(&self) -> bool {
        let body_low = self.open.min(self.close);
        let body_high = self.open.max(self.close);
        self.low <= body_low && body_high <= self.high && self.volume >= Decimal::ZERO
    }
}

/// One computed indicator reading, e.g. `rsi_14` or `ema_12`.
///
/// `value` is absent while the indicator is still warming up. Auxiliary
/// readings (trend direction, band levels, period) live in `metadata`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IndicatorPoint {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub indicator_type: String,
    pub value: Option<Decimal>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl IndicatorPoint {
    pub fn new(
        symbol: impl Into<String>,
        timeframe: Timeframe,
        indicator_type: impl Into<String>,
        value: Option<Decimal>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
            indicator_type: indicator_type.into(),
            value,
            metadata: HashMap::new(),
            timestamp,
        }
    }
}

/// Storage key for moving-average indicator lookups, e.g. `ema_12`.
pub fn ma_indicator_key(kind: &str, period: u32) -> String {
    format!("{}_{}", kind, period)
}

/// Storage key for the RSI reading the engine evaluates against.
pub const RSI_INDICATOR_KEY: &str = "rsi_14";
