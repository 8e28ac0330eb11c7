//! In-memory market snapshot store.
//!
//! Exchange ingestion (out of scope here) pushes candles and indicator
//! readings in; the engine reads the latest state out through the
//! `MarketStore` port.

use anyhow::Result;
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use tokio::sync::RwLock;

use crate::domain::market::{IndicatorPoint, PricePoint, Timeframe};
use crate::domain::ports::MarketStore;

/// Candles retained per (symbol, timeframe); enough to cover the 24h
/// percentage window on the 1m timeframe with headroom.
const MAX_HISTORY: usize = 2_000;

struct MarketInner {
    prices: HashMap<(String, Timeframe), VecDeque<PricePoint>>,
    indicators: HashMap<(String, Timeframe, String), IndicatorPoint>,
}

pub struct InMemoryMarketStore {
    inner: RwLock<MarketInner>,
}

impl InMemoryMarketStore {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(MarketInner {
                prices: HashMap::new(),
                indicators: HashMap::new(),
            }),
        }
    }

    /// Appends a candle, keeping history ordered by timestamp and bounded.
    pub async fn push_price_point(&self, point: PricePoint) {
        let key = (point.symbol.clone(), point.timeframe);
        let mut inner = self.inner.write().await;
        let history = inner.prices.entry(key).or_default();

        // Ingestion normally arrives in order; tolerate the occasional
        // out-of-order candle by inserting at its sorted position.
        let pos = history
            .iter()
            .rposition(|p| p.timestamp <= point.timestamp)
            .map(|i| i + 1)
            .unwrap_or(0);
        history.insert(pos, point);

        while history.len() > MAX_HISTORY {
            history.pop_front();
        }
    }

    /// Replaces the latest reading for an indicator key.
    pub async fn set_indicator(&self, point: IndicatorPoint) {
        let key = (
            point.symbol.clone(),
            point.timeframe,
            point.indicator_type.clone(),
        );
        self.inner.write().await.indicators.insert(key, point);
    }
}

impl Default for InMemoryMarketStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MarketStore for InMemoryMarketStore {
    async fn get_latest_price_point(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<PricePoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .prices
            .get(&(symbol.to_string(), timeframe))
            .and_then(|history| history.back().cloned()))
    }

    async fn get_price_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<PricePoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .prices
            .get(&(symbol.to_string(), timeframe))
            .map(|history| {
                let skip = history.len().saturating_sub(count);
                history.iter().skip(skip).cloned().collect()
            })
            .unwrap_or_default())
    }

    async fn get_latest_indicator(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        indicator_type: &str,
    ) -> Result<Option<IndicatorPoint>> {
        let inner = self.inner.read().await;
        Ok(inner
            .indicators
            .get(&(symbol.to_string(), timeframe, indicator_type.to_string()))
            .cloned())
    }
}
