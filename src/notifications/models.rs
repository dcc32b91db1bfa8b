use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::db::models::NotificationChannel;

/// Telegram bot channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelegramConfig {
    pub bot_token: String,
    pub chat_id: String,
    pub parse_mode: Option<String>,
    pub disable_preview: Option<bool>,
}

/// SMTP email channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EmailConfig {
    pub smtp_host: String,
    pub smtp_port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    /// One or more recipients, comma-separated.
    pub to: String,
    pub use_start_tls: Option<bool>,
    pub use_ssl: Option<bool>,
}

/// Webhook channel configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookConfig {
    pub url: String,
    pub headers: Option<HashMap<String, String>>,
    pub hmac_secret: Option<String>,
    pub signature_header: Option<String>,
    pub algo: Option<String>,
}

/// A channel's provider configuration, parsed once from the opaque blob
/// stored on the channel row. Adding a provider means adding a variant here
/// and a sender for it; there is no string dispatch past this point.
#[derive(Debug, Clone)]
pub enum ChannelConfig {
    Telegram(TelegramConfig),
    Email(EmailConfig),
    Webhook(WebhookConfig),
}

impl ChannelConfig {
    /// Parses a channel row's configuration blob according to its declared
    /// type.
    pub fn from_channel(channel: &NotificationChannel) -> Result<Self, String> {
        match channel.channel_type.to_ascii_lowercase().as_str() {
            "telegram" => serde_json::from_value(channel.configuration.clone())
                .map(ChannelConfig::Telegram)
                .map_err(|e| format!("invalid telegram configuration: {e}")),
            "email" => serde_json::from_value(channel.configuration.clone())
                .map(ChannelConfig::Email)
                .map_err(|e| format!("invalid email configuration: {e}")),
            "webhook" => serde_json::from_value(channel.configuration.clone())
                .map(ChannelConfig::Webhook)
                .map_err(|e| format!("invalid webhook configuration: {e}")),
            other => Err(format!("unsupported channel type: {other}")),
        }
    }

    /// Upper-case method tag recorded on delivery rows.
    pub fn method(&self) -> &'static str {
        match self {
            ChannelConfig::Telegram(_) => "TELEGRAM",
            ChannelConfig::Email(_) => "EMAIL",
            ChannelConfig::Webhook(_) => "WEBHOOK",
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn channel(channel_type: &str, configuration: serde_json::Value) -> NotificationChannel {
        NotificationChannel {
            id: 1,
            user_id: 1,
            channel_type: channel_type.to_string(),
            name: "ops".to_string(),
            configuration,
            enabled: true,
            is_default: false,
        }
    }

    #[test]
    fn parses_telegram_configuration() {
        let parsed = ChannelConfig::from_channel(&channel(
            "telegram",
            json!({"botToken": "123:abc", "chatId": "-100", "parseMode": "HTML"}),
        ))
        .unwrap();
        match parsed {
            ChannelConfig::Telegram(cfg) => {
                assert_eq!(cfg.bot_token, "123:abc");
                assert_eq!(cfg.chat_id, "-100");
                assert_eq!(cfg.parse_mode.as_deref(), Some("HTML"));
                assert!(cfg.disable_preview.is_none());
            }
            other => panic!("unexpected config: {other:?}"),
        }
    }

    #[test]
    fn parses_email_and_webhook_configurations() {
        let email = ChannelConfig::from_channel(&channel(
            "email",
            json!({"smtpHost": "smtp.example.com", "from": "a@example.com", "to": "b@example.com"}),
        ))
        .unwrap();
        assert_eq!(email.method(), "EMAIL");

        let webhook = ChannelConfig::from_channel(&channel(
            "webhook",
            json!({"url": "https://hooks.example.com/x", "hmacSecret": "s"}),
        ))
        .unwrap();
        assert_eq!(webhook.method(), "WEBHOOK");
    }

    #[test]
    fn rejects_unknown_type_and_missing_fields() {
        assert!(ChannelConfig::from_channel(&channel("pager", json!({}))).is_err());
        assert!(ChannelConfig::from_channel(&channel("telegram", json!({"chatId": "1"}))).is_err());
    }
}
