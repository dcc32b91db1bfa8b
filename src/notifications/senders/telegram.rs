use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Serialize;
use tracing::debug;

use super::{
    DeliveryResult, NotificationSender, PROVIDER_TIMEOUT_SECS, SenderError, escape_html,
    retry_after_seconds,
};
use crate::db::models::Alert;
use crate::notifications::models::ChannelConfig;

/// Hard Telegram Bot API limit on a single message, in UTF-8 bytes.
pub(crate) const TELEGRAM_MESSAGE_LIMIT: usize = 4096;

/// Sends alerts through the Telegram Bot API.
pub struct TelegramSender {
    client: Client,
}

impl Default for TelegramSender {
    fn default() -> Self {
        Self::new()
    }
}

impl TelegramSender {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }
}

#[derive(Serialize)]
struct SendMessagePayload<'a> {
    chat_id: &'a str,
    text: &'a str,
    parse_mode: &'a str,
    disable_web_page_preview: bool,
}

#[async_trait]
impl NotificationSender for TelegramSender {
    async fn send(
        &self,
        alert: &Alert,
        config: &ChannelConfig,
    ) -> Result<DeliveryResult, SenderError> {
        let cfg = match config {
            ChannelConfig::Telegram(cfg) => cfg,
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "expected telegram configuration".to_string(),
                ));
            }
        };

        let api_url = format!("https://api.telegram.org/bot{}/sendMessage", cfg.bot_token);
        let parse_mode = cfg.parse_mode.as_deref().unwrap_or("HTML");
        let disable_preview = cfg.disable_preview.unwrap_or(true);

        let text = render_alert(alert);
        let chunks = split_utf8_chunks(&text, TELEGRAM_MESSAGE_LIMIT);
        debug!(alert_id = alert.id, chunks = chunks.len(), "sending telegram alert");

        let mut last = DeliveryResult::sent(200);
        for chunk in &chunks {
            let payload = SendMessagePayload {
                chat_id: &cfg.chat_id,
                text: chunk,
                parse_mode,
                disable_web_page_preview: disable_preview,
            };
            let response = self.client.post(&api_url).json(&payload).send().await?;
            let status = response.status();

            if status.is_success() {
                last = DeliveryResult::sent(status.as_u16());
                continue;
            }

            // Remaining chunks are aborted on the first failure: delivering a
            // message with a hole in the middle helps nobody.
            let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
                .then(|| retry_after_seconds(&response))
                .flatten();
            let body = response.text().await.unwrap_or_default();
            let error = format!("telegram api returned {status}: {body}");
            return Ok(if status == StatusCode::TOO_MANY_REQUESTS {
                DeliveryResult::rate_limited(status.as_u16(), error, retry_after)
            } else {
                DeliveryResult::failed(Some(status.as_u16()), error)
            });
        }
        Ok(last)
    }
}

fn render_alert(alert: &Alert) -> String {
    let state = if alert.resolved { "RESOLVED" } else { "OPEN" };
    let mut text = format!(
        "<b>{}</b> {}\n{}\n",
        escape_html(&alert.severity.to_string()),
        state,
        escape_html(&alert.message),
    );
    text.push_str(&format!(
        "at: {}\n",
        alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(name) = alert.metadata.get("serviceName") {
        text.push_str(&format!("service: {}\n", escape_html(name)));
    }
    if let Some(url) = alert.metadata.get("serviceUrl") {
        text.push_str(&format!("url: {}\n", escape_html(url)));
    }
    text
}

/// Splits `text` into pieces of at most `max_bytes` UTF-8 bytes, never
/// cutting through a multi-byte character.
pub(crate) fn split_utf8_chunks(text: &str, max_bytes: usize) -> Vec<String> {
    if text.len() <= max_bytes {
        return vec![text.to_string()];
    }
    let mut parts = Vec::new();
    let mut start = 0;
    while start < text.len() {
        let mut end = (start + max_bytes).min(text.len());
        while end > start && !text.is_char_boundary(end) {
            end -= 1;
        }
        if end == start {
            // max_bytes smaller than one character; take the whole character
            // rather than loop forever.
            end = (start + 1..=text.len())
                .find(|&i| text.is_char_boundary(i))
                .unwrap_or(text.len());
        }
        parts.push(text[start..end].to_string());
        start = end;
    }
    parts
}
