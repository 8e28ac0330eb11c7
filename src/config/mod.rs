//! Configuration module for PriceGuard.
//!
//! All settings load from `PRICEGUARD_`-prefixed environment variables with
//! the documented defaults; `Default` yields the same values for tests.

use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::application::engine::EngineConfig;
use crate::application::monitor::MonitorConfig;
use crate::application::notifications::NotificationServiceConfig;

/// Main application configuration.
#[derive(Debug, Clone)]
pub struct Config {
    // Core
    pub database_url: String,
    pub server_addr: String,
    pub ws_auth_token: String,

    // Engine
    pub throttle_window_secs: u64,
    pub store_timeout_secs: u64,
    pub evaluation_parallelism: usize,

    // Monitor
    pub evaluation_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub notification_retention_days: i64,

    // Notification service
    pub notification_batch_size: usize,
    pub notification_batch_tick_secs: u64,
    pub max_retries: u32,
    pub priority_bonus_urgent_secs: i64,
    pub priority_bonus_high_secs: i64,

    // Channel adapter endpoints; a channel without an endpoint is not
    // registered and its deliveries fail toward the retry/DLQ path.
    pub email_webhook_url: Option<String>,
    pub push_webhook_url: Option<String>,
    pub sms_webhook_url: Option<String>,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            database_url: env_or(
                "PRICEGUARD_DATABASE_URL",
                "sqlite://data/priceguard.db".to_string(),
            )?,
            server_addr: env_or("PRICEGUARD_SERVER_ADDR", "0.0.0.0:8080".to_string())?,
            ws_auth_token: env::var("PRICEGUARD_WS_TOKEN").unwrap_or_default(),
            throttle_window_secs: env_or("PRICEGUARD_THROTTLE_WINDOW_SECS", 300)?,
            store_timeout_secs: env_or("PRICEGUARD_STORE_TIMEOUT_SECS", 5)?,
            evaluation_parallelism: env_or(
                "PRICEGUARD_EVALUATION_PARALLELISM",
                default_parallelism(),
            )?,
            evaluation_interval_secs: env_or("PRICEGUARD_EVALUATION_INTERVAL_SECS", 30)?,
            cleanup_interval_secs: env_or("PRICEGUARD_CLEANUP_INTERVAL_SECS", 300)?,
            notification_retention_days: env_or("PRICEGUARD_NOTIFICATION_RETENTION_DAYS", 30)?,
            notification_batch_size: env_or("PRICEGUARD_NOTIFICATION_BATCH_SIZE", 10)?,
            notification_batch_tick_secs: env_or("PRICEGUARD_NOTIFICATION_BATCH_TICK_SECS", 5)?,
            max_retries: env_or("PRICEGUARD_MAX_RETRIES", 3)?,
            priority_bonus_urgent_secs: env_or("PRICEGUARD_PRIORITY_BONUS_URGENT_SECS", 86_400)?,
            priority_bonus_high_secs: env_or("PRICEGUARD_PRIORITY_BONUS_HIGH_SECS", 3_600)?,
            email_webhook_url: env::var("PRICEGUARD_EMAIL_WEBHOOK_URL").ok(),
            push_webhook_url: env::var("PRICEGUARD_PUSH_WEBHOOK_URL").ok(),
            sms_webhook_url: env::var("PRICEGUARD_SMS_WEBHOOK_URL").ok(),
        })
    }

    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            throttle_window: ChronoDuration::seconds(self.throttle_window_secs as i64),
            store_timeout: Duration::from_secs(self.store_timeout_secs),
            evaluation_parallelism: self.evaluation_parallelism,
        }
    }

    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            evaluation_interval: Duration::from_secs(self.evaluation_interval_secs),
            cleanup_interval: Duration::from_secs(self.cleanup_interval_secs),
            notification_retention: ChronoDuration::days(self.notification_retention_days),
        }
    }

    pub fn notification_config(&self) -> NotificationServiceConfig {
        NotificationServiceConfig {
            batch_size: self.notification_batch_size,
            batch_tick: Duration::from_secs(self.notification_batch_tick_secs),
            max_retries: self.max_retries,
            delivery_timeout: Duration::from_secs(self.store_timeout_secs),
            priority_bonus_urgent_secs: self.priority_bonus_urgent_secs,
            priority_bonus_high_secs: self.priority_bonus_high_secs,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://data/priceguard.db".to_string(),
            server_addr: "0.0.0.0:8080".to_string(),
            ws_auth_token: String::new(),
            throttle_window_secs: 300,
            store_timeout_secs: 5,
            evaluation_parallelism: default_parallelism(),
            evaluation_interval_secs: 30,
            cleanup_interval_secs: 300,
            notification_retention_days: 30,
            notification_batch_size: 10,
            notification_batch_tick_secs: 5,
            max_retries: 3,
            priority_bonus_urgent_secs: 86_400,
            priority_bonus_high_secs: 3_600,
            email_webhook_url: None,
            push_webhook_url: None,
            sms_webhook_url: None,
        }
    }
}

fn default_parallelism() -> usize {
    2 * std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

/// Reads and parses an environment variable, falling back to `default` when
/// it is unset or empty.
fn env_or<T>(key: &str, default: T) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .with_context(|| format!("Invalid value for {}: '{}'", key, raw)),
        _ => Ok(default),
    }
}
