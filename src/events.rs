//! Pipeline event publishing.
//!
//! One `EventPublisher` interface with two implementations selected
//! explicitly by configuration at startup: an in-process broadcast bus for
//! deployments with live subscribers (dashboards, websockets), and a logging
//! fallback that only records events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::db::models::{Alert, CheckResult};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PipelineEvent {
    CheckCompleted {
        service_id: i64,
        success: bool,
        response_code: i32,
        latency_ms: i64,
        check_time: DateTime<Utc>,
    },
    AlertOpened {
        alert_id: i64,
        service_id: i64,
        severity: String,
        message: String,
    },
    AlertRecovered {
        alert_id: i64,
        service_id: i64,
        message: String,
    },
}

impl PipelineEvent {
    pub fn check_completed(result: &CheckResult) -> Self {
        PipelineEvent::CheckCompleted {
            service_id: result.service_id,
            success: result.success,
            response_code: result.response_code,
            latency_ms: result.latency_ms,
            check_time: result.check_time,
        }
    }

    pub fn from_alert(alert: &Alert) -> Self {
        if alert.resolved {
            PipelineEvent::AlertRecovered {
                alert_id: alert.id,
                service_id: alert.service_id,
                message: alert.message.clone(),
            }
        } else {
            PipelineEvent::AlertOpened {
                alert_id: alert.id,
                service_id: alert.service_id,
                severity: alert.severity.to_string(),
                message: alert.message.clone(),
            }
        }
    }
}

pub trait EventPublisher: Send + Sync {
    /// Publishes one event. Best-effort: failures are logged, never returned,
    /// so the pipeline cannot be stalled by a slow or absent transport.
    fn publish(&self, event: PipelineEvent);
}

/// Broadcast-channel transport. Subscribers attach via `subscribe`; events
/// published with no live subscriber are dropped.
pub struct BroadcastEventPublisher {
    tx: broadcast::Sender<PipelineEvent>,
}

impl BroadcastEventPublisher {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }
}

impl EventPublisher for BroadcastEventPublisher {
    fn publish(&self, event: PipelineEvent) {
        if let Err(e) = self.tx.send(event) {
            // No active subscribers; the event is dropped.
            debug!(error = %e, "no subscribers for pipeline event");
        }
    }
}

/// Logging fallback used when no event transport is configured.
pub struct LogEventPublisher;

impl EventPublisher for LogEventPublisher {
    fn publish(&self, event: PipelineEvent) {
        match &event {
            PipelineEvent::CheckCompleted {
                service_id,
                success,
                latency_ms,
                ..
            } => {
                debug!(service_id, success, latency_ms, "check completed");
            }
            PipelineEvent::AlertOpened {
                service_id,
                severity,
                message,
                ..
            } => {
                warn!(service_id, severity = %severity, message = %message, "alert opened");
            }
            PipelineEvent::AlertRecovered {
                service_id,
                message,
                ..
            } => {
                info!(service_id, message = %message, "alert recovered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_publisher_delivers_to_subscribers() {
        let publisher = BroadcastEventPublisher::new(16);
        let mut rx = publisher.subscribe();
        publisher.publish(PipelineEvent::AlertRecovered {
            alert_id: 1,
            service_id: 7,
            message: "recovered".to_string(),
        });
        match rx.recv().await.unwrap() {
            PipelineEvent::AlertRecovered { service_id, .. } => assert_eq!(service_id, 7),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn publish_without_subscribers_does_not_fail() {
        let publisher = BroadcastEventPublisher::new(4);
        publisher.publish(PipelineEvent::AlertOpened {
            alert_id: 1,
            service_id: 1,
            severity: "HIGH".to_string(),
            message: "down".to_string(),
        });
    }
}
