use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use reqwest::{Client, StatusCode, header};
use serde::Serialize;
use sha2::Sha256;
use tracing::debug;
use uuid::Uuid;

use super::{DeliveryResult, NotificationSender, PROVIDER_TIMEOUT_SECS, SenderError, retry_after_seconds};
use crate::db::models::Alert;
use crate::notifications::models::ChannelConfig;

const DEFAULT_SIGNATURE_HEADER: &str = "X-Signature-256";

type HmacSha256 = Hmac<Sha256>;

/// Posts alert event envelopes to a configured URL, optionally signed.
pub struct WebhookSender {
    client: Client,
}

impl Default for WebhookSender {
    fn default() -> Self {
        Self::new()
    }
}

impl WebhookSender {
    pub fn new() -> Self {
        Self {
            client: Client::builder()
                .timeout(Duration::from_secs(PROVIDER_TIMEOUT_SECS))
                .build()
                .unwrap_or_default(),
        }
    }
}

/// The JSON event envelope delivered to webhook consumers.
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WebhookEvent<'a> {
    event_id: Uuid,
    #[serde(rename = "type")]
    event_type: &'static str,
    service_id: i64,
    severity: String,
    message: &'a str,
    triggered_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    metadata: &'a HashMap<String, String>,
}

#[async_trait]
impl NotificationSender for WebhookSender {
    async fn send(
        &self,
        alert: &Alert,
        config: &ChannelConfig,
    ) -> Result<DeliveryResult, SenderError> {
        let cfg = match config {
            ChannelConfig::Webhook(cfg) => cfg,
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "expected webhook configuration".to_string(),
                ));
            }
        };

        let event = WebhookEvent {
            event_id: Uuid::new_v4(),
            event_type: if alert.resolved {
                "IncidentResolved"
            } else {
                "IncidentOpened"
            },
            service_id: alert.service_id,
            severity: alert.severity.to_string(),
            message: &alert.message,
            triggered_at: alert.triggered_at,
            resolved_at: alert.resolved_at,
            metadata: &alert.metadata,
        };
        let body = serde_json::to_string(&event)
            .map_err(|e| SenderError::InvalidConfiguration(format!("event serialization: {e}")))?;

        let mut request = self
            .client
            .post(&cfg.url)
            .header(header::CONTENT_TYPE, "application/json");

        if let Some(headers) = &cfg.headers {
            for (name, value) in headers {
                request = request.header(name.as_str(), value.as_str());
            }
        }

        if let Some(secret) = cfg.hmac_secret.as_deref().filter(|s| !s.is_empty()) {
            let signature = sign_body(secret, &body, cfg.algo.as_deref())?;
            let signature_header = cfg
                .signature_header
                .as_deref()
                .unwrap_or(DEFAULT_SIGNATURE_HEADER);
            request = request.header(signature_header, signature);
        }

        debug!(alert_id = alert.id, url = %cfg.url, "posting webhook event");
        let response = request.body(body).send().await?;
        let status = response.status();

        if status.is_success() {
            return Ok(DeliveryResult::sent(status.as_u16()));
        }

        let retry_after = (status == StatusCode::TOO_MANY_REQUESTS)
            .then(|| retry_after_seconds(&response))
            .flatten();
        let response_body = response.text().await.unwrap_or_default();
        let error = format!("webhook returned {status}: {response_body}");
        Ok(if status == StatusCode::TOO_MANY_REQUESTS {
            DeliveryResult::rate_limited(status.as_u16(), error, retry_after)
        } else {
            DeliveryResult::failed(Some(status.as_u16()), error)
        })
    }
}

/// Computes the signature header value: `sha256=` + base64(HMAC-SHA256 over
/// the raw request body).
pub(crate) fn sign_body(
    secret: &str,
    body: &str,
    algo: Option<&str>,
) -> Result<String, SenderError> {
    match algo.unwrap_or("HmacSHA256") {
        "HmacSHA256" | "sha256" | "SHA256" => {}
        other => {
            return Err(SenderError::InvalidConfiguration(format!(
                "unsupported signature algorithm: {other}"
            )));
        }
    }
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SenderError::InvalidConfiguration(format!("hmac key: {e}")))?;
    mac.update(body.as_bytes());
    Ok(format!("sha256={}", BASE64.encode(mac.finalize().into_bytes())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::AlertSeverity;

    #[test]
    fn signature_matches_known_vector() {
        // HMAC-SHA256("key", "The quick brown fox jumps over the lazy dog")
        // = f7bc83f430538424b13298e6aa6fb143ef4d59a14946175997479dbc2d1a3cd8
        let signature = sign_body(
            "key",
            "The quick brown fox jumps over the lazy dog",
            None,
        )
        .unwrap();
        assert_eq!(
            signature,
            "sha256=97yD9DBThCSxMpjmqm+xQ+9NWaFJRhdZl0edvC0aPNg="
        );
    }

    #[test]
    fn signature_verifies_against_recomputed_mac() {
        let signature = sign_body("s3cret", "{\"a\":1}", Some("sha256")).unwrap();
        let encoded = signature.strip_prefix("sha256=").unwrap();
        let raw = BASE64.decode(encoded).unwrap();

        let mut mac = HmacSha256::new_from_slice(b"s3cret").unwrap();
        mac.update(b"{\"a\":1}");
        mac.verify_slice(&raw).unwrap();
    }

    #[test]
    fn unsupported_algorithm_is_rejected() {
        assert!(matches!(
            sign_body("key", "body", Some("HmacMD5")),
            Err(SenderError::InvalidConfiguration(_))
        ));
    }

    #[test]
    fn envelope_uses_camel_case_keys_and_incident_type() {
        let alert = Alert {
            id: 9,
            service_id: 3,
            message: "down".to_string(),
            severity: AlertSeverity::Critical,
            resolved: false,
            triggered_at: Utc::now(),
            resolved_at: None,
            metadata: HashMap::from([("failureCount".to_string(), "10".to_string())]),
        };
        let event = WebhookEvent {
            event_id: Uuid::new_v4(),
            event_type: "IncidentOpened",
            service_id: alert.service_id,
            severity: alert.severity.to_string(),
            message: &alert.message,
            triggered_at: alert.triggered_at,
            resolved_at: alert.resolved_at,
            metadata: &alert.metadata,
        };
        let value: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&event).unwrap()).unwrap();
        assert_eq!(value["type"], "IncidentOpened");
        assert_eq!(value["serviceId"], 3);
        assert_eq!(value["severity"], "CRITICAL");
        assert!(value["eventId"].is_string());
        assert!(value["triggeredAt"].is_string());
        assert_eq!(value["metadata"]["failureCount"], "10");
    }
}
