use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use thiserror::Error;
use tracing::{error, info, warn};

use super::models::ChannelConfig;
use super::senders::email::EmailSender;
use super::senders::telegram::TelegramSender;
use super::senders::webhook::WebhookSender;
use super::senders::{DeliveryResult, NotificationSender};
use crate::db::models::{Alert, DeliveryStatus, NotificationChannel, NotificationDelivery};
use crate::db::stores::{ChannelStore, DeliveryStore, ServiceStore, StorageError};
use crate::util::ttl_cache::TtlCache;

/// Fallback cooldown when a provider rate-limits without a Retry-After hint.
const DEFAULT_COOLDOWN: Duration = Duration::from_secs(60);

#[derive(Error, Debug)]
pub enum DispatchError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Routes alerts to every enabled channel of the owning user and records one
/// delivery row per attempt. A single broken channel never blocks the others.
pub struct NotificationDispatcher {
    services: Arc<dyn ServiceStore>,
    channels: Arc<dyn ChannelStore>,
    deliveries: Arc<dyn DeliveryStore>,
    telegram: TelegramSender,
    email: EmailSender,
    webhook: WebhookSender,
    /// Channels sitting out a provider-requested back-off, keyed by channel
    /// id. Entries expire after the provider's Retry-After.
    cooldowns: TtlCache<i64, u64>,
}

impl NotificationDispatcher {
    pub fn new(
        services: Arc<dyn ServiceStore>,
        channels: Arc<dyn ChannelStore>,
        deliveries: Arc<dyn DeliveryStore>,
    ) -> Self {
        Self {
            services,
            channels,
            deliveries,
            telegram: TelegramSender::new(),
            email: EmailSender::new(),
            webhook: WebhookSender::new(),
            cooldowns: TtlCache::new(DEFAULT_COOLDOWN),
        }
    }

    /// Dispatches `alert` to all enabled channels of the service owner.
    /// Returns the recorded delivery rows.
    pub async fn send_alert(&self, alert: &Alert) -> Result<Vec<NotificationDelivery>, DispatchError> {
        let Some(service) = self.services.get(alert.service_id).await? else {
            warn!(
                alert_id = alert.id,
                service_id = alert.service_id,
                "alert refers to a missing service; nothing dispatched"
            );
            return Ok(Vec::new());
        };

        let channels = self.channels.list_enabled_for_user(service.user_id).await?;
        if channels.is_empty() {
            info!(
                alert_id = alert.id,
                user_id = service.user_id,
                "no enabled notification channels for alert owner"
            );
            return Ok(Vec::new());
        }

        let mut recorded = Vec::with_capacity(channels.len());
        for channel in &channels {
            let (method, result) = self.send_to_channel(alert, channel).await;
            if let Some(retry_after) = result.retry_after_seconds {
                self.cooldowns.insert_with_ttl(
                    channel.id,
                    retry_after,
                    Duration::from_secs(retry_after),
                );
            }
            if let Some(delivery) = self.record(alert, channel, method, result).await {
                recorded.push(delivery);
            }
        }
        Ok(recorded)
    }

    /// One channel attempt. Sender errors are flattened to a failed result;
    /// this function never propagates.
    async fn send_to_channel(
        &self,
        alert: &Alert,
        channel: &NotificationChannel,
    ) -> (String, DeliveryResult) {
        if let Some(retry_after) = self.cooldowns.get(&channel.id) {
            return (
                channel.channel_type.to_uppercase(),
                DeliveryResult::failed(
                    None,
                    format!("channel in rate-limit cooldown (retry after {retry_after}s)"),
                ),
            );
        }

        let config = match ChannelConfig::from_channel(channel) {
            Ok(config) => config,
            Err(e) => {
                warn!(channel_id = channel.id, error = %e, "unusable channel configuration");
                return (
                    channel.channel_type.to_uppercase(),
                    DeliveryResult::failed(None, e),
                );
            }
        };

        let method = config.method().to_string();
        let outcome = match &config {
            ChannelConfig::Telegram(_) => self.telegram.send(alert, &config).await,
            ChannelConfig::Email(_) => self.email.send(alert, &config).await,
            ChannelConfig::Webhook(_) => self.webhook.send(alert, &config).await,
        };

        let result = match outcome {
            Ok(result) => result,
            Err(e) => {
                warn!(channel_id = channel.id, error = %e, "channel send failed");
                DeliveryResult::failed(None, e.to_string())
            }
        };
        (method, result)
    }

    async fn record(
        &self,
        alert: &Alert,
        channel: &NotificationChannel,
        method: String,
        result: DeliveryResult,
    ) -> Option<NotificationDelivery> {
        let now = Utc::now();
        let delivery = NotificationDelivery {
            id: 0,
            alert_id: alert.id,
            channel_id: channel.id,
            status: if result.success {
                DeliveryStatus::Sent
            } else {
                DeliveryStatus::Failed
            },
            delivery_method: method,
            attempt_count: 1,
            error_message: result.error,
            sent_at: now,
            delivered_at: result.success.then_some(now),
        };
        match self.deliveries.append(&delivery).await {
            Ok(saved) => Some(saved),
            Err(e) => {
                // The attempt happened either way; losing the audit row is
                // logged, not fatal.
                error!(
                    alert_id = alert.id,
                    channel_id = channel.id,
                    error = %e,
                    "failed to record notification delivery"
                );
                None
            }
        }
    }
}
