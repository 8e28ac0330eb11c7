//! Channel delivery adapters.
//!
//! Each non-app channel posts the job as JSON to a provider webhook endpoint.
//! A channel without a configured endpoint is simply not registered; its
//! deliveries fail toward the retry/DLQ path.

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use crate::config::Config;
use crate::domain::alert::NotificationChannel;
use crate::domain::notification::QueuedNotification;
use crate::domain::ports::ChannelAdapter;

/// Delivers jobs by POSTing them to a provider webhook.
pub struct WebhookChannelAdapter {
    channel: NotificationChannel,
    endpoint: String,
    client: reqwest::Client,
}

impl WebhookChannelAdapter {
    pub fn new(channel: NotificationChannel, endpoint: String, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client for channel adapter")?;
        Ok(Self {
            channel,
            endpoint,
            client,
        })
    }
}

#[async_trait]
impl ChannelAdapter for WebhookChannelAdapter {
    async fn deliver(&self, job: &QueuedNotification) -> Result<()> {
        let body = json!({
            "channel": self.channel,
            "notification_id": job.id,
            "user_id": job.user_id,
            "type": job.notification_type,
            "title": job.title,
            "message": job.message,
            "data": job.data,
        });

        let response = self
            .client
            .post(&self.endpoint)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("{} delivery request failed", self.channel))?;

        let status = response.status();
        if !status.is_success() {
            return Err(anyhow!(
                "{} provider returned {} for job {}",
                self.channel,
                status,
                job.id
            ));
        }

        debug!(job_id = %job.id, channel = %self.channel, "delivery accepted by provider");
        Ok(())
    }
}

/// Builds the adapter registry from configured endpoints.
pub fn adapter_registry(
    config: &Config,
) -> Result<HashMap<NotificationChannel, Arc<dyn ChannelAdapter>>> {
    let timeout = Duration::from_secs(config.store_timeout_secs);
    let endpoints = [
        (NotificationChannel::Email, config.email_webhook_url.clone()),
        (NotificationChannel::Push, config.push_webhook_url.clone()),
        (NotificationChannel::Sms, config.sms_webhook_url.clone()),
    ];

    let mut registry: HashMap<NotificationChannel, Arc<dyn ChannelAdapter>> = HashMap::new();
    for (channel, endpoint) in endpoints {
        if let Some(endpoint) = endpoint {
            registry.insert(
                channel,
                Arc::new(WebhookChannelAdapter::new(channel, endpoint, timeout)?),
            );
            info!(channel = %channel, "channel adapter registered");
        }
    }
    Ok(registry)
}
