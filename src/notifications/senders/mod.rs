use async_trait::async_trait;
use thiserror::Error;

use super::models::ChannelConfig;
use crate::db::models::Alert;

pub mod email;
pub mod telegram;
pub mod webhook;

/// Bounded network timeout for provider calls, separate from probe timeouts.
pub(crate) const PROVIDER_TIMEOUT_SECS: u64 = 15;

#[derive(Error, Debug)]
pub enum SenderError {
    #[error("invalid configuration for sender: {0}")]
    InvalidConfiguration(String),
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
}

/// Outcome of one provider call. `retry_after_seconds` is populated when the
/// provider rate-limited the call and asked for a back-off.
#[derive(Debug, Clone)]
pub struct DeliveryResult {
    pub success: bool,
    pub http_code: Option<u16>,
    pub error: Option<String>,
    pub retry_after_seconds: Option<u64>,
}

impl DeliveryResult {
    pub fn sent(http_code: u16) -> Self {
        Self {
            success: true,
            http_code: Some(http_code),
            error: None,
            retry_after_seconds: None,
        }
    }

    pub fn failed(http_code: Option<u16>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            http_code,
            error: Some(error.into()),
            retry_after_seconds: None,
        }
    }

    pub fn rate_limited(http_code: u16, error: impl Into<String>, retry_after: Option<u64>) -> Self {
        Self {
            success: false,
            http_code: Some(http_code),
            error: Some(error.into()),
            retry_after_seconds: retry_after,
        }
    }
}

/// A provider-specific alert sender. Implementations must reject a config
/// variant that is not theirs with `InvalidConfiguration` rather than panic.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn send(
        &self,
        alert: &Alert,
        config: &ChannelConfig,
    ) -> Result<DeliveryResult, SenderError>;
}

/// Reads a `Retry-After` header as whole seconds, if present and numeric.
pub(crate) fn retry_after_seconds(response: &reqwest::Response) -> Option<u64> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse().ok())
}

/// Escapes text for embedding in HTML payloads (Telegram HTML mode, email
/// bodies).
pub(crate) fn escape_html(text: &str) -> String {
    let mut escaped = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            '"' => escaped.push_str("&quot;"),
            '\'' => escaped.push_str("&#39;"),
            _ => escaped.push(c),
        }
    }
    escaped
}
