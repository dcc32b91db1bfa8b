//! Dual-tier result persistence.
//!
//! Every result is written synchronously to the recent tier (the live
//! signal), then best-effort to the analytics tier. Tier maintenance jobs
//! live in [`maintenance`].

pub mod maintenance;

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::warn;

use crate::db::models::{CheckResult, ServiceMetrics, ServiceStatus};
use crate::db::stores::{AnalyticsStore, RecentResultStore, StorageError};

/// Window of recent-tier data considered for live status classification.
const STATUS_WINDOW_MINUTES: i64 = 5;

/// Outcome of an on-demand cross-tier consistency audit.
#[derive(Debug, Clone, Serialize)]
pub struct ConsistencyReport {
    pub service_id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub recent_total: i64,
    pub recent_successful: i64,
    pub analytics_total: i64,
    pub analytics_successful: i64,
    pub consistent: bool,
}

pub struct ResultSink {
    recent: Arc<dyn RecentResultStore>,
    analytics: Arc<dyn AnalyticsStore>,
}

impl ResultSink {
    pub fn new(recent: Arc<dyn RecentResultStore>, analytics: Arc<dyn AnalyticsStore>) -> Self {
        Self { recent, analytics }
    }

    /// Persists one result. The recent-tier write is authoritative; an
    /// analytics-tier failure is logged and swallowed so the live signal is
    /// never lost to analytics unavailability.
    pub async fn save(&self, result: CheckResult) -> Result<CheckResult, StorageError> {
        let saved = self.recent.save(&result).await?;
        if let Err(e) = self.analytics.save(&saved).await {
            warn!(
                service_id = saved.service_id,
                error = %e,
                "analytics tier write failed; recent tier result retained"
            );
        }
        Ok(saved)
    }

    pub async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        self.recent.save_batch(results).await?;
        if let Err(e) = self.analytics.save_batch(results).await {
            warn!(error = %e, "analytics tier batch write failed; recent tier retained");
        }
        Ok(())
    }

    /// Most recent stored result for a service, preferring the recent tier
    /// and falling back to the analytics tier for services whose rows have
    /// all been migrated.
    pub async fn latest_result(
        &self,
        service_id: i64,
    ) -> Result<Option<CheckResult>, StorageError> {
        if let Some(result) = self.recent.find_latest_by_service(service_id).await? {
            return Ok(Some(result));
        }
        let now = Utc::now();
        let results = self
            .analytics
            .query_range(service_id, now - Duration::days(1), now)
            .await?;
        Ok(results.into_iter().next())
    }

    /// Aggregated uptime/latency metrics over a period, computed by the
    /// analytics tier.
    pub async fn metrics(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: &str,
    ) -> Result<ServiceMetrics, StorageError> {
        self.analytics
            .aggregate(service_id, start, end, period)
            .await
    }

    /// Classifies a service's availability from the last few minutes of
    /// recent-tier data, falling back to the analytics tier when the recent
    /// tier has nothing (e.g. right after a migration).
    pub async fn service_status(&self, service_id: i64) -> Result<ServiceStatus, StorageError> {
        let now = Utc::now();
        let since = now - Duration::minutes(STATUS_WINDOW_MINUTES);

        let mut results = self.recent.find_recent_by_service(service_id, since).await?;
        if results.is_empty() {
            results = self.analytics.query_range(service_id, since, now).await?;
        }
        if results.is_empty() {
            return Ok(ServiceStatus::Unknown);
        }

        let successes = results.iter().filter(|r| r.success).count();
        Ok(if successes == results.len() {
            ServiceStatus::Up
        } else if successes == 0 {
            ServiceStatus::Down
        } else {
            ServiceStatus::Degraded
        })
    }

    /// Compares total/success counts between the tiers for auditing. A
    /// mismatch is reported, never acted on automatically.
    pub async fn verify_consistency(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<ConsistencyReport, StorageError> {
        let recent = self.recent.count_in_range(service_id, start, end).await?;
        let analytics = self.analytics.count_in_range(service_id, start, end).await?;
        Ok(ConsistencyReport {
            service_id,
            period_start: start,
            period_end: end,
            recent_total: recent.total,
            recent_successful: recent.successful,
            analytics_total: analytics.total,
            analytics_successful: analytics.successful,
            consistent: recent == analytics,
        })
    }
}
