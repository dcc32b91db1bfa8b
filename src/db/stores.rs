//! Storage collaborator interfaces for the monitoring pipeline.
//!
//! The pipeline is written against these traits only. Two backends ship with
//! the crate: a Postgres implementation per tier and an in-memory one used by
//! tests and standalone mode.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use super::models::{
    Alert, CheckResult, MonitoredService, NotificationChannel, NotificationDelivery,
    ServiceMetrics,
};

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: i64 },
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error("write failed: {0}")]
    WriteFailed(String),
}

/// Total and successful check counts for a service over a time range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TierCounts {
    pub total: i64,
    pub successful: i64,
}

/// Low-latency short-retention store: source of truth for live status and
/// alerting reads over the last few minutes to days.
#[async_trait]
pub trait RecentResultStore: Send + Sync {
    /// Persists one result and returns it with its assigned id.
    async fn save(&self, result: &CheckResult) -> Result<CheckResult, StorageError>;

    async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError>;

    /// All results for a service since `since`, newest first.
    async fn find_recent_by_service(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError>;

    /// Failing results for a service since `since`, newest first.
    async fn find_failures_since(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError>;

    async fn find_latest_by_service(
        &self,
        service_id: i64,
    ) -> Result<Option<CheckResult>, StorageError>;

    async fn find_by_service_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError>;

    /// Rows older than `cutoff`, across all services. Used by tier migration.
    async fn find_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError>;

    /// Deletes rows older than `cutoff`; returns the number removed.
    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn count_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierCounts, StorageError>;

    /// Distinct ids of services that have at least one stored result.
    async fn service_ids_with_results(&self) -> Result<Vec<i64>, StorageError>;
}

/// Long-retention aggregation-oriented store for historical metrics and SLA
/// reporting. Writes are idempotent re-assertions: saving a row that is
/// already present must not duplicate it.
#[async_trait]
pub trait AnalyticsStore: Send + Sync {
    async fn save(&self, result: &CheckResult) -> Result<(), StorageError>;

    async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError>;

    async fn query_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError>;

    async fn aggregate(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: &str,
    ) -> Result<ServiceMetrics, StorageError>;

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError>;

    async fn count_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierCounts, StorageError>;
}

/// Read access to the monitored-service catalog. Services are created and
/// edited by the management API layer, outside this pipeline.
#[async_trait]
pub trait ServiceStore: Send + Sync {
    async fn get(&self, service_id: i64) -> Result<Option<MonitoredService>, StorageError>;

    async fn list_enabled(&self) -> Result<Vec<MonitoredService>, StorageError>;
}

#[async_trait]
pub trait AlertStore: Send + Sync {
    /// Persists an alert and returns it with its assigned id.
    async fn save(&self, alert: &Alert) -> Result<Alert, StorageError>;

    async fn find_by_service(&self, service_id: i64) -> Result<Vec<Alert>, StorageError>;
}

#[async_trait]
pub trait ChannelStore: Send + Sync {
    async fn list_enabled_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationChannel>, StorageError>;
}

#[async_trait]
pub trait DeliveryStore: Send + Sync {
    /// Appends one delivery attempt record and returns it with its id.
    async fn append(
        &self,
        delivery: &NotificationDelivery,
    ) -> Result<NotificationDelivery, StorageError>;
}
