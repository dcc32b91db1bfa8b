use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::policy::{AlertPolicy, severity_for_failures};
use crate::db::models::{Alert, AlertSeverity, CheckResult, MonitoredService};
use crate::db::stores::{AlertStore, RecentResultStore, ServiceStore, StorageError};
use crate::events::{EventPublisher, PipelineEvent};
use crate::notifications::NotificationDispatcher;

#[derive(Error, Debug)]
pub enum EvaluationError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Evaluates every stored check result against the alert policy, opening
/// incident alerts on sustained failure and emitting recovery alerts when a
/// service comes back.
pub struct AlertEngine {
    recent: Arc<dyn RecentResultStore>,
    services: Arc<dyn ServiceStore>,
    alerts: Arc<dyn AlertStore>,
    dispatcher: Arc<NotificationDispatcher>,
    events: Arc<dyn EventPublisher>,
    policy: AlertPolicy,
}

impl AlertEngine {
    pub fn new(
        recent: Arc<dyn RecentResultStore>,
        services: Arc<dyn ServiceStore>,
        alerts: Arc<dyn AlertStore>,
        dispatcher: Arc<NotificationDispatcher>,
        events: Arc<dyn EventPublisher>,
        policy: AlertPolicy,
    ) -> Self {
        Self {
            recent,
            services,
            alerts,
            dispatcher,
            events,
            policy,
        }
    }

    pub fn policy(&self) -> &AlertPolicy {
        &self.policy
    }

    /// Evaluates one result. The result must already be durable in the
    /// recent tier; the failure counts below include it.
    pub async fn evaluate(&self, result: &CheckResult) -> Result<Option<Alert>, EvaluationError> {
        if result.success {
            self.check_for_recovery(result).await
        } else {
            self.check_for_incident(result).await
        }
    }

    async fn check_for_incident(
        &self,
        result: &CheckResult,
    ) -> Result<Option<Alert>, EvaluationError> {
        let since = Utc::now() - Duration::minutes(self.policy.failure_window_minutes);
        let failures = self
            .recent
            .find_failures_since(result.service_id, since)
            .await?;

        let count_triggered = failures.len() >= self.policy.medium_failure_threshold;
        let latency_triggered = result.latency_ms > self.policy.latency_ceiling_ms;
        if !count_triggered && !latency_triggered {
            debug!(
                service_id = result.service_id,
                failures = failures.len(),
                "failure below alert thresholds"
            );
            return Ok(None);
        }

        let Some(service) = self.services.get(result.service_id).await? else {
            warn!(
                service_id = result.service_id,
                "failing result for unknown service; no alert raised"
            );
            return Ok(None);
        };

        let severity = severity_for_failures(failures.len(), &self.policy);
        let last_error = result
            .error_message
            .clone()
            .unwrap_or_else(|| "connection failed".to_string());
        let message = format!(
            "Service '{}' is experiencing failures. {} failures in the last {} minutes. Latest error: {}",
            service.name,
            failures.len(),
            self.policy.failure_window_minutes,
            last_error,
        );

        let mut metadata = service_metadata(&service);
        metadata.insert("failureCount".to_string(), failures.len().to_string());
        metadata.insert(
            "lastResponseCode".to_string(),
            result.response_code.to_string(),
        );
        metadata.insert("lastLatencyMs".to_string(), result.latency_ms.to_string());

        let alert = Alert {
            id: 0,
            service_id: service.id,
            message,
            severity,
            resolved: false,
            triggered_at: Utc::now(),
            resolved_at: None,
            metadata,
        };
        let saved = self.alerts.save(&alert).await?;
        warn!(
            service_id = service.id,
            alert_id = saved.id,
            severity = %saved.severity,
            "alert opened"
        );

        self.events.publish(PipelineEvent::from_alert(&saved));
        self.dispatch(&saved).await;
        Ok(Some(saved))
    }

    async fn check_for_recovery(
        &self,
        result: &CheckResult,
    ) -> Result<Option<Alert>, EvaluationError> {
        let since = Utc::now() - Duration::minutes(self.policy.recovery_window_minutes);
        let failures = self
            .recent
            .find_failures_since(result.service_id, since)
            .await?;
        if failures.len() < self.policy.recovery_failure_threshold {
            return Ok(None);
        }

        let Some(service) = self.services.get(result.service_id).await? else {
            return Ok(None);
        };

        let message = format!(
            "Service '{}' has recovered after {} failures. Service is now responding normally.",
            service.name,
            failures.len(),
        );

        let mut metadata = service_metadata(&service);
        metadata.insert("type".to_string(), "RECOVERY".to_string());
        metadata.insert("previousFailures".to_string(), failures.len().to_string());

        let now = Utc::now();
        // A distinct resolved row, not a mutation of the original alert: the
        // incident history stays append-only.
        let alert = Alert {
            id: 0,
            service_id: service.id,
            message,
            severity: AlertSeverity::Info,
            resolved: true,
            triggered_at: now,
            resolved_at: Some(now),
            metadata,
        };
        let saved = self.alerts.save(&alert).await?;
        info!(
            service_id = service.id,
            alert_id = saved.id,
            "service recovery detected"
        );

        self.events.publish(PipelineEvent::from_alert(&saved));
        self.dispatch(&saved).await;
        Ok(Some(saved))
    }

    /// Notification failures never propagate into the evaluation path.
    async fn dispatch(&self, alert: &Alert) {
        if let Err(e) = self.dispatcher.send_alert(alert).await {
            error!(alert_id = alert.id, error = %e, "alert notification dispatch failed");
        }
    }
}

fn service_metadata(service: &MonitoredService) -> HashMap<String, String> {
    HashMap::from([
        ("serviceId".to_string(), service.id.to_string()),
        ("serviceName".to_string(), service.name.clone()),
        ("serviceUrl".to_string(), service.url.clone()),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::memory::{
        InMemoryAlertStore, InMemoryChannelStore, InMemoryDeliveryStore,
        InMemoryRecentResultStore, InMemoryServiceStore,
    };
    use crate::events::LogEventPublisher;

    fn service(id: i64) -> MonitoredService {
        MonitoredService {
            id,
            user_id: 1,
            name: "api".to_string(),
            description: None,
            url: "https://example.com/health".to_string(),
            http_method: "GET".to_string(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
            expected_status_code: 200,
            expected_body_fragment: None,
            timeout_seconds: 10,
            check_interval_seconds: 60,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn result(service_id: i64, success: bool, age_minutes: i64, latency_ms: i64) -> CheckResult {
        CheckResult {
            id: 0,
            service_id,
            check_time: Utc::now() - Duration::minutes(age_minutes),
            success,
            response_code: if success { 200 } else { 503 },
            latency_ms,
            response_body: None,
            error_message: (!success).then(|| "expected status 200, got 503".to_string()),
            ssl_valid: false,
            ssl_expires_at: None,
            location: "test".to_string(),
        }
    }

    struct Fixture {
        engine: AlertEngine,
        recent: Arc<InMemoryRecentResultStore>,
        alerts: Arc<InMemoryAlertStore>,
    }

    fn fixture() -> Fixture {
        let recent = Arc::new(InMemoryRecentResultStore::new());
        let services = Arc::new(InMemoryServiceStore::new());
        services.insert(service(1));
        let alerts = Arc::new(InMemoryAlertStore::new());
        let dispatcher = Arc::new(NotificationDispatcher::new(
            services.clone(),
            Arc::new(InMemoryChannelStore::new()),
            Arc::new(InMemoryDeliveryStore::new()),
        ));
        let engine = AlertEngine::new(
            recent.clone(),
            services,
            alerts.clone(),
            dispatcher,
            Arc::new(LogEventPublisher),
            AlertPolicy::default(),
        );
        Fixture {
            engine,
            recent,
            alerts,
        }
    }

    async fn seed_failures(f: &Fixture, service_id: i64, count: usize) {
        for i in 0..count {
            f.recent
                .save(&result(service_id, false, i as i64, 40))
                .await
                .unwrap();
        }
    }

    async fn store_and_evaluate(f: &Fixture, r: CheckResult) -> Option<Alert> {
        let saved = f.recent.save(&r).await.unwrap();
        f.engine.evaluate(&saved).await.unwrap()
    }

    #[tokio::test]
    async fn fourth_failure_in_window_opens_medium_alert() {
        let f = fixture();
        seed_failures(&f, 1, 3).await;

        let alert = store_and_evaluate(&f, result(1, false, 0, 40))
            .await
            .expect("alert should open");

        assert_eq!(alert.severity, AlertSeverity::Medium);
        assert!(!alert.resolved);
        assert!(alert.message.contains("4 failures"));
        assert_eq!(alert.metadata.get("failureCount").unwrap(), "4");
        assert_eq!(alert.metadata.get("lastResponseCode").unwrap(), "503");
        assert_eq!(f.alerts.all().len(), 1);
    }

    #[tokio::test]
    async fn five_failures_escalate_to_high_and_ten_to_critical() {
        let f = fixture();
        seed_failures(&f, 1, 4).await;
        let alert = store_and_evaluate(&f, result(1, false, 0, 40))
            .await
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::High);

        seed_failures(&f, 1, 4).await;
        let alert = store_and_evaluate(&f, result(1, false, 0, 40))
            .await
            .unwrap();
        assert_eq!(alert.severity, AlertSeverity::Critical);
    }

    #[tokio::test]
    async fn failures_below_threshold_stay_silent() {
        let f = fixture();
        seed_failures(&f, 1, 1).await;
        let alert = store_and_evaluate(&f, result(1, false, 0, 40)).await;
        assert!(alert.is_none());
        assert!(f.alerts.all().is_empty());
    }

    #[tokio::test]
    async fn old_failures_outside_the_window_are_ignored() {
        let f = fixture();
        for age in [45, 50, 55] {
            f.recent.save(&result(1, false, age, 40)).await.unwrap();
        }
        let alert = store_and_evaluate(&f, result(1, false, 0, 40)).await;
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn slow_probe_alone_opens_low_alert() {
        let f = fixture();
        let alert = store_and_evaluate(&f, result(1, false, 0, 12_000))
            .await
            .expect("latency ceiling should open an alert");
        assert_eq!(alert.severity, AlertSeverity::Low);
        assert_eq!(alert.metadata.get("lastLatencyMs").unwrap(), "12000");
    }

    #[tokio::test]
    async fn success_after_failures_emits_distinct_recovery_alert() {
        let f = fixture();
        seed_failures(&f, 1, 2).await;

        let recovery = store_and_evaluate(&f, result(1, true, 0, 30))
            .await
            .expect("recovery alert expected");

        assert_eq!(recovery.severity, AlertSeverity::Info);
        assert!(recovery.resolved);
        assert!(recovery.resolved_at.is_some());
        assert_eq!(recovery.metadata.get("type").unwrap(), "RECOVERY");
        assert_eq!(recovery.metadata.get("previousFailures").unwrap(), "2");
        assert!(recovery.message.contains("recovered after 2 failures"));
    }

    #[tokio::test]
    async fn recovery_is_distinct_from_the_incident_alert() {
        let f = fixture();
        seed_failures(&f, 1, 3).await;
        let incident = store_and_evaluate(&f, result(1, false, 0, 40))
            .await
            .unwrap();
        let recovery = store_and_evaluate(&f, result(1, true, 0, 30))
            .await
            .unwrap();

        assert_ne!(incident.id, recovery.id);
        assert!(!incident.resolved);
        assert!(recovery.resolved);
        assert_eq!(f.alerts.find_by_service(1).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn success_with_one_prior_failure_is_not_a_recovery() {
        let f = fixture();
        seed_failures(&f, 1, 1).await;
        let alert = store_and_evaluate(&f, result(1, true, 0, 30)).await;
        assert!(alert.is_none());
    }

    #[tokio::test]
    async fn evaluation_is_per_service() {
        let f = fixture();
        seed_failures(&f, 2, 10).await;
        // Service 1 has no failures; service 2's pile must not leak over.
        let alert = store_and_evaluate(&f, result(1, false, 0, 40)).await;
        assert!(alert.is_none());
    }
}
