//! Pipeline wiring and the management facade consumed by the API layer.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::alerting::AlertEngine;
use crate::db::models::{CheckResult, CheckSchedule, MonitoredService, ServiceStatus};
use crate::db::stores::{ServiceStore, StorageError};
use crate::events::{EventPublisher, PipelineEvent};
use crate::probe::ProbeExecutor;
use crate::scheduler::{CheckRunner, Scheduler, SchedulerError};
use crate::sink::{ConsistencyReport, ResultSink};

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("scheduling error: {0}")]
    Scheduler(#[from] SchedulerError),
    #[error("service not found: {0}")]
    ServiceNotFound(i64),
    #[error("invalid service definition: {0}")]
    InvalidService(String),
}

/// How a manual test was executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestTrigger {
    /// Fired through the existing scheduled job.
    Scheduled,
    /// No job was scheduled; a one-off direct probe ran instead (degraded
    /// path).
    Direct,
}

/// One check firing end to end: probe, persist, evaluate.
pub struct MonitorPipeline {
    executor: ProbeExecutor,
    sink: Arc<ResultSink>,
    engine: AlertEngine,
    events: Arc<dyn EventPublisher>,
}

impl MonitorPipeline {
    pub fn new(
        executor: ProbeExecutor,
        sink: Arc<ResultSink>,
        engine: AlertEngine,
        events: Arc<dyn EventPublisher>,
    ) -> Self {
        Self {
            executor,
            sink,
            engine,
            events,
        }
    }

    async fn execute_check(&self, service: &MonitoredService) -> CheckResult {
        // The executor is infallible by contract, but a panic inside it must
        // not kill the timer task: probe continuity wins, so a crash becomes
        // a synthetic failed result.
        match AssertUnwindSafe(self.executor.execute(service))
            .catch_unwind()
            .await
        {
            Ok(result) => result,
            Err(panic) => {
                let summary = panic_summary(panic.as_ref());
                error!(
                    service_id = service.id,
                    panic = %summary,
                    "probe execution panicked"
                );
                CheckResult::execution_failure(
                    service.id,
                    format!("check execution failed: {summary}"),
                    self.executor.location(),
                )
            }
        }
    }
}

fn panic_summary(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[async_trait]
impl CheckRunner for MonitorPipeline {
    async fn run_check(&self, service: &MonitoredService) {
        let result = self.execute_check(service).await;
        let saved = match self.sink.save(result).await {
            Ok(saved) => saved,
            Err(e) => {
                error!(service_id = service.id, error = %e, "failed to persist check result");
                return;
            }
        };
        self.events.publish(PipelineEvent::check_completed(&saved));

        // The result is durable; an evaluation failure only costs this
        // round's alerting, never the probe itself.
        if let Err(e) = self.engine.evaluate(&saved).await {
            error!(service_id = service.id, error = %e, "alert evaluation failed");
        }
    }
}

/// Management operations the (out-of-scope) API layer calls into: reacting
/// to service CRUD, manual tests, status reads and consistency audits.
pub struct MonitorManager {
    scheduler: Arc<Scheduler>,
    pipeline: Arc<MonitorPipeline>,
    services: Arc<dyn ServiceStore>,
    sink: Arc<ResultSink>,
}

impl MonitorManager {
    pub fn new(
        scheduler: Arc<Scheduler>,
        pipeline: Arc<MonitorPipeline>,
        services: Arc<dyn ServiceStore>,
        sink: Arc<ResultSink>,
    ) -> Self {
        Self {
            scheduler,
            pipeline,
            services,
            sink,
        }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    /// Schedules every enabled service. Called once at startup; a service
    /// that fails to schedule is logged and skipped so one bad definition
    /// cannot hold up the rest.
    pub async fn start_all(&self) -> Result<usize, PipelineError> {
        let services = self.services.list_enabled().await?;
        let mut scheduled = 0;
        for service in &services {
            let schedule = CheckSchedule::from_service(service);
            match self.scheduler.schedule(service, &schedule) {
                Ok(()) => scheduled += 1,
                Err(e) => {
                    error!(service_id = service.id, error = %e, "failed to schedule service");
                }
            }
        }
        info!(scheduled, total = services.len(), "scheduled enabled services");
        Ok(scheduled)
    }

    /// Reacts to a created or updated service definition: enabled services
    /// are (re)armed, disabled ones unscheduled.
    pub fn sync_service(
        &self,
        service: &MonitoredService,
        schedule: Option<&CheckSchedule>,
    ) -> Result<(), PipelineError> {
        service
            .validate()
            .map_err(PipelineError::InvalidService)?;
        if !service.enabled {
            self.scheduler.unschedule(service.id);
            return Ok(());
        }
        let default_schedule;
        let schedule = match schedule {
            Some(s) => s,
            None => {
                default_schedule = CheckSchedule::from_service(service);
                &default_schedule
            }
        };
        self.scheduler.reschedule(service, schedule)?;
        Ok(())
    }

    /// Reacts to a deleted service.
    pub fn remove_service(&self, service_id: i64) {
        self.scheduler.unschedule(service_id);
    }

    /// Manual "test now". Prefers the scheduled job; falls back to a direct
    /// one-off probe when the service is not scheduled.
    pub async fn test_now(&self, service_id: i64) -> Result<TestTrigger, PipelineError> {
        if self.scheduler.is_scheduled(service_id) {
            self.scheduler.trigger_now(service_id)?;
            return Ok(TestTrigger::Scheduled);
        }

        let Some(service) = self.services.get(service_id).await? else {
            return Err(PipelineError::ServiceNotFound(service_id));
        };
        warn!(
            service_id,
            "service not scheduled; running direct one-off probe"
        );
        self.pipeline.run_check(&service).await;
        Ok(TestTrigger::Direct)
    }

    pub async fn service_status(&self, service_id: i64) -> Result<ServiceStatus, PipelineError> {
        Ok(self.sink.service_status(service_id).await?)
    }

    pub async fn latest_result(
        &self,
        service_id: i64,
    ) -> Result<Option<CheckResult>, PipelineError> {
        Ok(self.sink.latest_result(service_id).await?)
    }

    pub async fn service_metrics(
        &self,
        service_id: i64,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
        period: &str,
    ) -> Result<crate::db::models::ServiceMetrics, PipelineError> {
        Ok(self.sink.metrics(service_id, start, end, period).await?)
    }

    pub async fn verify_consistency(
        &self,
        service_id: i64,
        start: chrono::DateTime<chrono::Utc>,
        end: chrono::DateTime<chrono::Utc>,
    ) -> Result<ConsistencyReport, PipelineError> {
        Ok(self.sink.verify_consistency(service_id, start, end).await?)
    }

    pub fn shutdown(&self) {
        self.scheduler.stop_all();
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use chrono::Utc;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::alerting::AlertPolicy;
    use crate::db::memory::{
        InMemoryAlertStore, InMemoryAnalyticsStore, InMemoryChannelStore, InMemoryDeliveryStore,
        InMemoryRecentResultStore, InMemoryServiceStore,
    };
    use crate::db::stores::RecentResultStore;
    use crate::events::BroadcastEventPublisher;
    use crate::notifications::NotificationDispatcher;

    fn service(id: i64, url: &str) -> MonitoredService {
        MonitoredService {
            id,
            user_id: 1,
            name: format!("svc-{id}"),
            description: None,
            url: url.to_string(),
            http_method: "GET".to_string(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
            expected_status_code: 200,
            expected_body_fragment: None,
            timeout_seconds: 5,
            check_interval_seconds: 3600,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    struct Fixture {
        manager: MonitorManager,
        services: Arc<InMemoryServiceStore>,
        recent: Arc<InMemoryRecentResultStore>,
        alerts: Arc<InMemoryAlertStore>,
        events: Arc<BroadcastEventPublisher>,
    }

    fn fixture() -> Fixture {
        let recent = Arc::new(InMemoryRecentResultStore::new());
        let analytics = Arc::new(InMemoryAnalyticsStore::new());
        let services = Arc::new(InMemoryServiceStore::new());
        let alerts = Arc::new(InMemoryAlertStore::new());
        let events = Arc::new(BroadcastEventPublisher::new(64));

        let sink = Arc::new(ResultSink::new(recent.clone(), analytics));
        let dispatcher = Arc::new(NotificationDispatcher::new(
            services.clone(),
            Arc::new(InMemoryChannelStore::new()),
            Arc::new(InMemoryDeliveryStore::new()),
        ));
        let engine = AlertEngine::new(
            recent.clone(),
            services.clone(),
            alerts.clone(),
            dispatcher,
            events.clone(),
            AlertPolicy::default(),
        );
        let pipeline = Arc::new(MonitorPipeline::new(
            ProbeExecutor::new("test"),
            sink.clone(),
            engine,
            events.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(pipeline.clone(), services.clone()));
        Fixture {
            manager: MonitorManager::new(scheduler, pipeline, services.clone(), sink),
            services,
            recent,
            alerts,
            events,
        }
    }

    #[tokio::test]
    async fn direct_test_stores_a_result_and_publishes_an_event() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let f = fixture();
        f.services.insert(service(1, &server.uri()));
        let mut rx = f.events.subscribe();

        let trigger = f.manager.test_now(1).await.unwrap();
        assert_eq!(trigger, TestTrigger::Direct);

        let stored = f.recent.find_latest_by_service(1).await.unwrap().unwrap();
        assert!(stored.success);
        assert_eq!(stored.response_code, 200);

        match rx.recv().await.unwrap() {
            crate::events::PipelineEvent::CheckCompleted { service_id, success, .. } => {
                assert_eq!(service_id, 1);
                assert!(success);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_now_prefers_the_scheduled_job() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        let f = fixture();
        let svc = service(1, &server.uri());
        f.services.insert(svc.clone());
        f.manager.sync_service(&svc, None).unwrap();

        let trigger = f.manager.test_now(1).await.unwrap();
        assert_eq!(trigger, TestTrigger::Scheduled);

        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(f.recent.find_latest_by_service(1).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_now_for_unknown_service_errors() {
        let f = fixture();
        assert!(matches!(
            f.manager.test_now(404).await,
            Err(PipelineError::ServiceNotFound(404))
        ));
    }

    #[tokio::test]
    async fn sustained_failures_open_an_alert_through_the_pipeline() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let f = fixture();
        f.services.insert(service(1, &server.uri()));

        for _ in 0..2 {
            f.manager.test_now(1).await.unwrap();
        }
        assert!(f.alerts.all().is_empty());

        f.manager.test_now(1).await.unwrap();
        let alerts = f.alerts.all();
        assert_eq!(alerts.len(), 1);
        assert!(!alerts[0].resolved);
    }

    #[tokio::test]
    async fn start_all_schedules_only_enabled_services() {
        let f = fixture();
        f.services.insert(service(1, "https://example.com"));
        f.services.insert(service(2, "https://example.org"));
        let mut disabled = service(3, "https://example.net");
        disabled.enabled = false;
        f.services.insert(disabled);

        let scheduled = f.manager.start_all().await.unwrap();
        assert_eq!(scheduled, 2);
        assert!(f.manager.scheduler().is_scheduled(1));
        assert!(f.manager.scheduler().is_scheduled(2));
        assert!(!f.manager.scheduler().is_scheduled(3));

        f.manager.shutdown();
        assert_eq!(f.manager.scheduler().scheduled_job_count(), 0);
    }

    #[tokio::test]
    async fn disabling_a_service_unschedules_it() {
        let f = fixture();
        let svc = service(1, "https://example.com");
        f.services.insert(svc.clone());
        f.manager.sync_service(&svc, None).unwrap();
        assert!(f.manager.scheduler().is_scheduled(1));

        let mut disabled = svc;
        disabled.enabled = false;
        f.manager.sync_service(&disabled, None).unwrap();
        assert!(!f.manager.scheduler().is_scheduled(1));
    }

    #[tokio::test]
    async fn invalid_service_definitions_are_rejected() {
        let f = fixture();
        let mut svc = service(1, "ftp://example.com");
        f.services.insert(svc.clone());
        assert!(matches!(
            f.manager.sync_service(&svc, None),
            Err(PipelineError::InvalidService(_))
        ));

        svc.url = "https://example.com".to_string();
        svc.timeout_seconds = 0;
        assert!(matches!(
            f.manager.sync_service(&svc, None),
            Err(PipelineError::InvalidService(_))
        ));
    }
}
