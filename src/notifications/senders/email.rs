use std::time::Duration;

use async_trait::async_trait;
use lettre::message::header::ContentType;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use tracing::debug;

use super::{DeliveryResult, NotificationSender, PROVIDER_TIMEOUT_SECS, SenderError, escape_html};
use crate::db::models::Alert;
use crate::notifications::models::{ChannelConfig, EmailConfig};

const DEFAULT_SMTP_PORT: u16 = 587;

/// Sends alerts as HTML email over SMTP.
pub struct EmailSender;

impl Default for EmailSender {
    fn default() -> Self {
        Self::new()
    }
}

impl EmailSender {
    pub fn new() -> Self {
        Self
    }

    fn build_transport(
        cfg: &EmailConfig,
    ) -> Result<AsyncSmtpTransport<Tokio1Executor>, SenderError> {
        let use_ssl = cfg.use_ssl.unwrap_or(false);
        let use_start_tls = cfg.use_start_tls.unwrap_or(true);

        let mut builder = if use_ssl {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&cfg.smtp_host)
                .map_err(|e| SenderError::InvalidConfiguration(format!("smtp relay: {e}")))?
        } else if use_start_tls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&cfg.smtp_host)
                .map_err(|e| SenderError::InvalidConfiguration(format!("smtp starttls: {e}")))?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&cfg.smtp_host)
        };

        builder = builder
            .port(cfg.smtp_port.unwrap_or(DEFAULT_SMTP_PORT))
            .timeout(Some(Duration::from_secs(PROVIDER_TIMEOUT_SECS)));

        if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(builder.build())
    }

    fn build_message(alert: &Alert, cfg: &EmailConfig) -> Result<Message, SenderError> {
        let from = cfg
            .from
            .parse()
            .map_err(|e| SenderError::InvalidConfiguration(format!("from address: {e}")))?;

        let mut builder = Message::builder().from(from).subject(build_subject(alert));
        for recipient in cfg.to.split(',') {
            let recipient = recipient.trim();
            if recipient.is_empty() {
                continue;
            }
            builder = builder.to(recipient
                .parse()
                .map_err(|e| SenderError::InvalidConfiguration(format!("to address: {e}")))?);
        }

        builder
            .header(ContentType::TEXT_HTML)
            .body(build_html(alert))
            .map_err(|e| SenderError::InvalidConfiguration(format!("message build: {e}")))
    }
}

#[async_trait]
impl NotificationSender for EmailSender {
    async fn send(
        &self,
        alert: &Alert,
        config: &ChannelConfig,
    ) -> Result<DeliveryResult, SenderError> {
        let cfg = match config {
            ChannelConfig::Email(cfg) => cfg,
            _ => {
                return Err(SenderError::InvalidConfiguration(
                    "expected email configuration".to_string(),
                ));
            }
        };

        let message = Self::build_message(alert, cfg)?;
        let transport = Self::build_transport(cfg)?;

        debug!(alert_id = alert.id, host = %cfg.smtp_host, "sending alert email");
        // SMTP acceptance is delivery success; anything past the relay is out
        // of our hands.
        match transport.send(message).await {
            Ok(_) => Ok(DeliveryResult::sent(250)),
            Err(e) => Ok(DeliveryResult::failed(None, format!("smtp send failed: {e}"))),
        }
    }
}

fn build_subject(alert: &Alert) -> String {
    let state = if alert.resolved { "RESOLVED" } else { "ALERT" };
    format!(
        "{state} {}: service={}",
        alert.severity, alert.service_id
    )
}

fn build_html(alert: &Alert) -> String {
    let heading = if alert.resolved {
        "Incident Resolved"
    } else {
        "Incident Opened"
    };
    let mut html = String::new();
    html.push_str("<html><body>");
    html.push_str(&format!(
        "<h3>{heading} - {}</h3>",
        escape_html(&alert.severity.to_string())
    ));
    html.push_str(&format!("<p>{}</p>", escape_html(&alert.message)));
    html.push_str("<ul>");
    html.push_str(&format!("<li>Service ID: {}</li>", alert.service_id));
    html.push_str(&format!(
        "<li>Triggered: {}</li>",
        alert.triggered_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(resolved_at) = alert.resolved_at {
        html.push_str(&format!(
            "<li>Resolved: {}</li>",
            resolved_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
    }
    for (key, value) in &alert.metadata {
        html.push_str(&format!(
            "<li>{}: {}</li>",
            escape_html(key),
            escape_html(value)
        ));
    }
    html.push_str("</ul></body></html>");
    html
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use chrono::Utc;

    use super::*;
    use crate::db::models::AlertSeverity;

    fn alert(resolved: bool) -> Alert {
        Alert {
            id: 1,
            service_id: 42,
            message: "Service 'api' is experiencing failures".to_string(),
            severity: if resolved {
                AlertSeverity::Info
            } else {
                AlertSeverity::High
            },
            resolved,
            triggered_at: Utc::now(),
            resolved_at: resolved.then(Utc::now),
            metadata: HashMap::new(),
        }
    }

    #[test]
    fn subject_carries_severity_and_state() {
        assert_eq!(build_subject(&alert(false)), "ALERT HIGH: service=42");
        assert_eq!(build_subject(&alert(true)), "RESOLVED INFO: service=42");
    }

    #[test]
    fn html_body_escapes_message_content() {
        let mut a = alert(false);
        a.message = "<script>alert(1)</script>".to_string();
        let html = build_html(&a);
        assert!(html.contains("&lt;script&gt;"));
        assert!(!html.contains("<script>"));
        assert!(html.contains("Incident Opened"));
    }

    #[test]
    fn message_builds_with_multiple_recipients() {
        let cfg = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: None,
            username: None,
            password: None,
            from: "watchpost@example.com".to_string(),
            to: "a@example.com, b@example.com".to_string(),
            use_start_tls: None,
            use_ssl: None,
        };
        assert!(EmailSender::build_message(&alert(false), &cfg).is_ok());
    }

    #[test]
    fn invalid_from_address_is_rejected() {
        let cfg = EmailConfig {
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: None,
            username: None,
            password: None,
            from: "not an address".to_string(),
            to: "a@example.com".to_string(),
            use_start_tls: None,
            use_ssl: None,
        };
        assert!(matches!(
            EmailSender::build_message(&alert(false), &cfg),
            Err(SenderError::InvalidConfiguration(_))
        ));
    }
}
