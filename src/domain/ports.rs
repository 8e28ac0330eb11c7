//! Collaborator ports: the thin contracts this core consumes.
//!
//! The market store is fed by exchange ingestion (out of scope here), the
//! queue store is the shared ordered-set backing the notification queue, and
//! channel adapters deliver one job to one external channel.

use anyhow::Result;
use async_trait::async_trait;

use crate::domain::market::{IndicatorPoint, PricePoint, Timeframe};
use crate::domain::notification::QueuedNotification;

/// Latest OHLCV and indicator snapshots per (symbol, timeframe).
#[async_trait]
pub trait MarketStore: Send + Sync {
    /// The most recent candle, if any.
    async fn get_latest_price_point(
        &self,
        symbol: &str,
        timeframe: Timeframe,
    ) -> Result<Option<PricePoint>>;

    /// Up to `count` most recent candles, oldest first.
    async fn get_price_history(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        count: usize,
    ) -> Result<Vec<PricePoint>>;

    /// The most recent reading for the given indicator key (e.g. `rsi_14`,
    /// `ema_12`), if any.
    async fn get_latest_indicator(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        indicator_type: &str,
    ) -> Result<Option<IndicatorPoint>>;
}

/// A shared ordered set keyed by an integer score. Backs the notification
/// queue and dead-letter queue; implementations must make `pop_due` atomic so
/// concurrent drainers never hand the same entry to two workers.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Inserts (or re-scores) a member.
    async fn insert(&self, queue: &str, member: &str, score: i64) -> Result<()>;

    /// Atomically removes and returns up to `limit` members with
    /// `score <= max_score`, smallest score first.
    async fn pop_due(&self, queue: &str, max_score: i64, limit: usize) -> Result<Vec<String>>;

    async fn len(&self, queue: &str) -> Result<usize>;

    /// Removes members with `min <= score <= max`; returns how many were removed.
    async fn remove_by_score_range(&self, queue: &str, min: i64, max: i64) -> Result<u64>;
}

/// Delivers one queued job over one external channel (email, push, sms).
///
/// An `Err` carries the provider's failure message and counts against the
/// job's retry budget. Adapters are expected to return promptly; the caller
/// additionally bounds each call with the configured delivery timeout.
#[async_trait]
pub trait ChannelAdapter: Send + Sync {
    async fn deliver(&self, job: &QueuedNotification) -> Result<()>;
}
