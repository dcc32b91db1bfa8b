//! Per-service check scheduling.
//!
//! One entry per monitored service in a concurrent keyed registry, each
//! owning a cancelable timer task. There is no global scheduler object to
//! configure; arming, re-arming and cancelling are plain registry
//! operations safe to call from any number of concurrent callers.

use std::str::FromStr;
use std::sync::{Arc, RwLock};

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dashmap::DashMap;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::db::models::{CheckSchedule, MonitoredService};
use crate::db::stores::ServiceStore;

#[derive(Error, Debug)]
pub enum SchedulerError {
    #[error("no scheduled job for service {0}")]
    JobNotFound(i64),
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),
}

/// Executes one check firing for a service. Implemented by the pipeline;
/// implementations must not fail; every outcome becomes a stored result.
#[async_trait]
pub trait CheckRunner: Send + Sync {
    async fn run_check(&self, service: &MonitoredService);
}

enum TimerSource {
    Interval(ChronoDuration),
    Cron(Box<cron::Schedule>),
}

impl TimerSource {
    fn from_schedule(schedule: &CheckSchedule) -> Result<Self, SchedulerError> {
        if let Some(expr) = schedule
            .cron_expression
            .as_deref()
            .filter(|e| !e.trim().is_empty())
        {
            let parsed = cron::Schedule::from_str(expr).map_err(|e| {
                SchedulerError::InvalidSchedule(format!("cron expression '{expr}': {e}"))
            })?;
            // Cron schedules are evaluated in UTC; a non-UTC timezone on the
            // schedule is accepted but not applied.
            if !schedule.timezone.is_empty() && schedule.timezone != "UTC" {
                warn!(
                    service_id = schedule.service_id,
                    timezone = %schedule.timezone,
                    "cron schedules are evaluated in UTC"
                );
            }
            Ok(TimerSource::Cron(Box::new(parsed)))
        } else if schedule.interval_seconds > 0 {
            Ok(TimerSource::Interval(ChronoDuration::seconds(
                schedule.interval_seconds,
            )))
        } else {
            Err(SchedulerError::InvalidSchedule(
                "interval_seconds must be positive when no cron expression is given".to_string(),
            ))
        }
    }

    fn next_fire(&self) -> Option<DateTime<Utc>> {
        match self {
            TimerSource::Interval(interval) => Some(Utc::now() + *interval),
            TimerSource::Cron(schedule) => schedule.upcoming(Utc).next(),
        }
    }
}

struct JobEntry {
    handle: JoinHandle<()>,
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
}

pub struct Scheduler {
    jobs: DashMap<i64, JobEntry>,
    runner: Arc<dyn CheckRunner>,
    services: Arc<dyn ServiceStore>,
}

impl Scheduler {
    pub fn new(runner: Arc<dyn CheckRunner>, services: Arc<dyn ServiceStore>) -> Self {
        Self {
            jobs: DashMap::new(),
            runner,
            services,
        }
    }

    /// Arms (or re-arms) the timer for a service. An existing timer for the
    /// same id is cancelled first, so the call is an idempotent
    /// create-or-replace. No-op when the service or schedule is disabled.
    pub fn schedule(
        &self,
        service: &MonitoredService,
        schedule: &CheckSchedule,
    ) -> Result<(), SchedulerError> {
        if !schedule.enabled || !service.enabled {
            info!(
                service_id = service.id,
                "skipping scheduling for disabled service or schedule"
            );
            return Ok(());
        }

        let source = TimerSource::from_schedule(schedule)?;
        let next_run = Arc::new(RwLock::new(source.next_fire()));

        if let Some((_, old)) = self.jobs.remove(&service.id) {
            old.handle.abort();
            debug!(service_id = service.id, "replaced existing scheduled job");
        }

        let handle = tokio::spawn(run_job(
            service.id,
            source,
            self.runner.clone(),
            self.services.clone(),
            next_run.clone(),
        ));
        self.jobs.insert(service.id, JobEntry { handle, next_run });

        info!(
            service_id = service.id,
            schedule = %describe(schedule),
            "scheduled monitoring"
        );
        Ok(())
    }

    /// Cancels the timer for a service. Returns whether a job existed. An
    /// in-flight firing that already started is allowed to complete; no new
    /// firing starts after this returns.
    pub fn unschedule(&self, service_id: i64) -> bool {
        match self.jobs.remove(&service_id) {
            Some((_, entry)) => {
                entry.handle.abort();
                info!(service_id, "unscheduled monitoring");
                true
            }
            None => false,
        }
    }

    /// `unschedule` followed by `schedule`, as one logical operation.
    pub fn reschedule(
        &self,
        service: &MonitoredService,
        schedule: &CheckSchedule,
    ) -> Result<(), SchedulerError> {
        self.unschedule(service.id);
        self.schedule(service, schedule)
    }

    /// Fires the job for a service immediately, out of band from its normal
    /// cadence. The firing may overlap a concurrently running scheduled
    /// probe for the same service; that is accepted behavior. Fails when no
    /// job is scheduled; the caller is expected to fall back to a direct
    /// one-off probe.
    pub fn trigger_now(&self, service_id: i64) -> Result<(), SchedulerError> {
        if !self.jobs.contains_key(&service_id) {
            warn!(service_id, "cannot trigger immediate check: no scheduled job");
            return Err(SchedulerError::JobNotFound(service_id));
        }
        info!(service_id, "triggering immediate check");
        let runner = self.runner.clone();
        let services = self.services.clone();
        tokio::spawn(async move {
            fire(service_id, runner.as_ref(), services.as_ref()).await;
        });
        Ok(())
    }

    pub fn is_scheduled(&self, service_id: i64) -> bool {
        self.jobs.contains_key(&service_id)
    }

    pub fn next_run_time(&self, service_id: i64) -> Option<DateTime<Utc>> {
        self.jobs
            .get(&service_id)
            .and_then(|entry| *entry.next_run.read().unwrap())
    }

    pub fn scheduled_job_count(&self) -> usize {
        self.jobs.len()
    }

    /// Cancels every timer. Used on shutdown.
    pub fn stop_all(&self) {
        let ids: Vec<i64> = self.jobs.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, entry)) = self.jobs.remove(&id) {
                entry.handle.abort();
            }
        }
        info!("stopped all scheduled monitoring jobs");
    }
}

/// The per-service timer loop. Firings are sequential within one service's
/// job; only `trigger_now` runs out of band.
async fn run_job(
    service_id: i64,
    source: TimerSource,
    runner: Arc<dyn CheckRunner>,
    services: Arc<dyn ServiceStore>,
    next_run: Arc<RwLock<Option<DateTime<Utc>>>>,
) {
    loop {
        let Some(next) = source.next_fire() else {
            warn!(service_id, "cron schedule has no future firings; job ends");
            break;
        };
        *next_run.write().unwrap() = Some(next);

        let delay = (next - Utc::now())
            .to_std()
            .unwrap_or(std::time::Duration::ZERO);
        tokio::time::sleep(delay).await;

        fire(service_id, runner.as_ref(), services.as_ref()).await;
    }
}

/// One firing: re-reads the service so configuration edits and disables take
/// effect without rescheduling.
async fn fire(service_id: i64, runner: &dyn CheckRunner, services: &dyn ServiceStore) {
    match services.get(service_id).await {
        Ok(Some(service)) if service.enabled => runner.run_check(&service).await,
        Ok(Some(_)) => {
            debug!(service_id, "service disabled; skipping firing");
        }
        Ok(None) => {
            warn!(service_id, "scheduled service no longer exists; skipping firing");
        }
        Err(e) => {
            error!(service_id, error = %e, "failed to load service for firing");
        }
    }
}

fn describe(schedule: &CheckSchedule) -> String {
    match schedule
        .cron_expression
        .as_deref()
        .filter(|e| !e.trim().is_empty())
    {
        Some(expr) => format!("cron: {expr}"),
        None => format!("interval: {}s", schedule.interval_seconds),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::db::memory::InMemoryServiceStore;

    struct CountingRunner {
        fired: AtomicUsize,
    }

    impl CountingRunner {
        fn new() -> Self {
            Self {
                fired: AtomicUsize::new(0),
            }
        }

        fn count(&self) -> usize {
            self.fired.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl CheckRunner for CountingRunner {
        async fn run_check(&self, _service: &MonitoredService) {
            self.fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn service(id: i64, interval_seconds: i64) -> MonitoredService {
        MonitoredService {
            id,
            user_id: 1,
            name: format!("svc-{id}"),
            description: None,
            url: "https://example.com".to_string(),
            http_method: "GET".to_string(),
            headers: HashMap::new(),
            query_params: HashMap::new(),
            body: None,
            expected_status_code: 200,
            expected_body_fragment: None,
            timeout_seconds: 10,
            check_interval_seconds: interval_seconds,
            enabled: true,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    fn fixture(services: &[MonitoredService]) -> (Scheduler, Arc<CountingRunner>) {
        let store = Arc::new(InMemoryServiceStore::new());
        for s in services {
            store.insert(s.clone());
        }
        let runner = Arc::new(CountingRunner::new());
        (Scheduler::new(runner.clone(), store), runner)
    }

    #[tokio::test]
    async fn schedule_reports_status_and_future_next_run() {
        let svc = service(1, 3600);
        let (scheduler, _) = fixture(&[svc.clone()]);

        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();

        assert!(scheduler.is_scheduled(1));
        assert_eq!(scheduler.scheduled_job_count(), 1);
        let next = scheduler.next_run_time(1).expect("next run must be set");
        assert!(next > Utc::now());

        assert!(scheduler.unschedule(1));
        assert!(!scheduler.is_scheduled(1));
        assert!(scheduler.next_run_time(1).is_none());
    }

    #[tokio::test]
    async fn disabled_service_or_schedule_is_not_armed() {
        let mut svc = service(1, 60);
        svc.enabled = false;
        let (scheduler, _) = fixture(&[svc.clone()]);
        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();
        assert!(!scheduler.is_scheduled(1));

        let svc = service(2, 60);
        let mut schedule = CheckSchedule::from_service(&svc);
        schedule.enabled = false;
        scheduler.schedule(&svc, &schedule).unwrap();
        assert!(!scheduler.is_scheduled(2));
    }

    #[tokio::test]
    async fn interval_job_fires_repeatedly() {
        let svc = service(1, 1);
        let (scheduler, runner) = fixture(&[svc.clone()]);
        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();

        tokio::time::sleep(Duration::from_millis(2500)).await;
        assert!(runner.count() >= 2, "expected at least 2 firings");
    }

    #[tokio::test]
    async fn unschedule_stops_future_fires() {
        let svc = service(1, 1);
        let (scheduler, runner) = fixture(&[svc.clone()]);
        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();
        assert!(scheduler.unschedule(1));

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runner.count(), 0);
    }

    #[tokio::test]
    async fn unschedule_absent_job_is_safe() {
        let (scheduler, _) = fixture(&[]);
        assert!(!scheduler.unschedule(42));
    }

    #[tokio::test]
    async fn trigger_now_fires_out_of_band() {
        let svc = service(1, 3600);
        let (scheduler, runner) = fixture(&[svc.clone()]);
        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();

        scheduler.trigger_now(1).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(runner.count(), 1);
        // The scheduled cadence is untouched.
        assert!(scheduler.next_run_time(1).unwrap() > Utc::now());
    }

    #[tokio::test]
    async fn trigger_now_without_job_fails_loudly() {
        let (scheduler, _) = fixture(&[]);
        assert!(matches!(
            scheduler.trigger_now(9),
            Err(SchedulerError::JobNotFound(9))
        ));
    }

    #[tokio::test]
    async fn reschedule_replaces_the_existing_timer() {
        let svc = service(1, 3600);
        let (scheduler, runner) = fixture(&[svc.clone()]);
        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();
        let slow_next = scheduler.next_run_time(1).unwrap();

        let mut fast = CheckSchedule::from_service(&svc);
        fast.interval_seconds = 1;
        scheduler.reschedule(&svc, &fast).unwrap();

        assert_eq!(scheduler.scheduled_job_count(), 1);
        assert!(scheduler.next_run_time(1).unwrap() < slow_next);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert!(runner.count() >= 1);
    }

    #[tokio::test]
    async fn cron_schedule_is_armed_and_fires() {
        let svc = service(1, 0);
        let (scheduler, runner) = fixture(&[svc.clone()]);
        let schedule = CheckSchedule {
            service_id: 1,
            cron_expression: Some("* * * * * *".to_string()),
            interval_seconds: 0,
            enabled: true,
            timezone: "UTC".to_string(),
        };

        scheduler.schedule(&svc, &schedule).unwrap();
        assert!(scheduler.next_run_time(1).is_some());

        tokio::time::sleep(Duration::from_millis(2200)).await;
        assert!(runner.count() >= 1);
    }

    #[tokio::test]
    async fn invalid_schedules_are_rejected() {
        let svc = service(1, 0);
        let (scheduler, _) = fixture(&[svc.clone()]);

        let bad_cron = CheckSchedule {
            service_id: 1,
            cron_expression: Some("not a cron".to_string()),
            interval_seconds: 60,
            enabled: true,
            timezone: "UTC".to_string(),
        };
        assert!(matches!(
            scheduler.schedule(&svc, &bad_cron),
            Err(SchedulerError::InvalidSchedule(_))
        ));

        let no_timer = CheckSchedule {
            service_id: 1,
            cron_expression: None,
            interval_seconds: 0,
            enabled: true,
            timezone: "UTC".to_string(),
        };
        assert!(matches!(
            scheduler.schedule(&svc, &no_timer),
            Err(SchedulerError::InvalidSchedule(_))
        ));
    }

    #[tokio::test]
    async fn disabled_service_skips_firing_without_unscheduling() {
        let svc = service(1, 1);
        let store = Arc::new(InMemoryServiceStore::new());
        store.insert(svc.clone());
        let runner = Arc::new(CountingRunner::new());
        let scheduler = Scheduler::new(runner.clone(), store.clone());
        scheduler
            .schedule(&svc, &CheckSchedule::from_service(&svc))
            .unwrap();

        let mut disabled = svc.clone();
        disabled.enabled = false;
        store.insert(disabled);

        tokio::time::sleep(Duration::from_millis(1500)).await;
        assert_eq!(runner.count(), 0);
        assert!(scheduler.is_scheduled(1));
    }

    #[tokio::test]
    async fn stop_all_clears_the_registry() {
        let services: Vec<_> = (1..=3).map(|id| service(id, 3600)).collect();
        let (scheduler, _) = fixture(&services);
        for svc in &services {
            scheduler
                .schedule(svc, &CheckSchedule::from_service(svc))
                .unwrap();
        }
        assert_eq!(scheduler.scheduled_job_count(), 3);

        scheduler.stop_all();
        assert_eq!(scheduler.scheduled_job_count(), 0);
    }
}
