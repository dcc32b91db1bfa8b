//! In-memory store implementations.
//!
//! Used by the test suite and by standalone mode when no database is
//! configured. Rows live in process memory and are lost on restart.

use std::collections::HashMap;
use std::sync::RwLock;
use std::sync::atomic::{AtomicI64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::models::{
    Alert, CheckResult, MonitoredService, NotificationChannel, NotificationDelivery,
    ServiceMetrics,
};
use super::stores::{
    AlertStore, AnalyticsStore, ChannelStore, DeliveryStore, RecentResultStore, ServiceStore,
    StorageError, TierCounts,
};

fn compute_metrics(
    service_id: i64,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    period: &str,
    rows: &[CheckResult],
) -> ServiceMetrics {
    let total = rows.len() as i64;
    let successful = rows.iter().filter(|r| r.success).count() as i64;
    let latencies: Vec<i64> = rows.iter().map(|r| r.latency_ms).collect();
    let average = if latencies.is_empty() {
        0.0
    } else {
        latencies.iter().sum::<i64>() as f64 / latencies.len() as f64
    };
    ServiceMetrics {
        service_id,
        period_start: start,
        period_end: end,
        uptime_percentage: if total > 0 {
            successful as f64 / total as f64 * 100.0
        } else {
            0.0
        },
        average_latency_ms: average,
        min_latency_ms: latencies.iter().copied().min().unwrap_or(0),
        max_latency_ms: latencies.iter().copied().max().unwrap_or(0),
        total_checks: total,
        successful_checks: successful,
        failed_checks: total - successful,
        aggregation_period: period.to_string(),
    }
}

#[derive(Default)]
pub struct InMemoryRecentResultStore {
    rows: RwLock<Vec<CheckResult>>,
    next_id: AtomicI64,
}

impl InMemoryRecentResultStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }
}

#[async_trait]
impl RecentResultStore for InMemoryRecentResultStore {
    async fn save(&self, result: &CheckResult) -> Result<CheckResult, StorageError> {
        let mut saved = result.clone();
        saved.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.rows.write().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        let mut rows = self.rows.write().unwrap();
        for result in results {
            let mut saved = result.clone();
            saved.id = self.next_id.fetch_add(1, Ordering::SeqCst);
            rows.push(saved);
        }
        Ok(())
    }

    async fn find_recent_by_service(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        let mut found: Vec<CheckResult> = self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.service_id == service_id && r.check_time >= since)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.check_time.cmp(&a.check_time));
        Ok(found)
    }

    async fn find_failures_since(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        let mut found = self.find_recent_by_service(service_id, since).await?;
        found.retain(|r| !r.success);
        Ok(found)
    }

    async fn find_latest_by_service(
        &self,
        service_id: i64,
    ) -> Result<Option<CheckResult>, StorageError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.service_id == service_id)
            .max_by_key(|r| r.check_time)
            .cloned())
    }

    async fn find_by_service_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.service_id == service_id && r.check_time >= start && r.check_time <= end)
            .cloned()
            .collect())
    }

    async fn find_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(self
            .rows
            .read()
            .unwrap()
            .iter()
            .filter(|r| r.check_time < cutoff)
            .cloned()
            .collect())
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|r| r.check_time >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn count_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierCounts, StorageError> {
        let rows = self.rows.read().unwrap();
        let in_range = rows
            .iter()
            .filter(|r| r.service_id == service_id && r.check_time >= start && r.check_time <= end);
        let mut counts = TierCounts {
            total: 0,
            successful: 0,
        };
        for row in in_range {
            counts.total += 1;
            if row.success {
                counts.successful += 1;
            }
        }
        Ok(counts)
    }

    async fn service_ids_with_results(&self) -> Result<Vec<i64>, StorageError> {
        let mut ids: Vec<i64> = self
            .rows
            .read()
            .unwrap()
            .iter()
            .map(|r| r.service_id)
            .collect();
        ids.sort_unstable();
        ids.dedup();
        Ok(ids)
    }
}

/// In-memory analytics tier. Re-saving a row that already has an id is an
/// upsert keyed on that id, mirroring the idempotent re-assertion contract.
#[derive(Default)]
pub struct InMemoryAnalyticsStore {
    rows: RwLock<HashMap<i64, CheckResult>>,
    next_id: AtomicI64,
}

impl InMemoryAnalyticsStore {
    pub fn new() -> Self {
        Self {
            rows: RwLock::new(HashMap::new()),
            next_id: AtomicI64::new(1_000_000),
        }
    }

    fn upsert(&self, rows: &mut HashMap<i64, CheckResult>, result: &CheckResult) {
        let mut row = result.clone();
        if row.id == 0 {
            row.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        }
        rows.insert(row.id, row);
    }
}

#[async_trait]
impl AnalyticsStore for InMemoryAnalyticsStore {
    async fn save(&self, result: &CheckResult) -> Result<(), StorageError> {
        self.upsert(&mut self.rows.write().unwrap(), result);
        Ok(())
    }

    async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        let mut rows = self.rows.write().unwrap();
        for result in results {
            self.upsert(&mut rows, result);
        }
        Ok(())
    }

    async fn query_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        let mut found: Vec<CheckResult> = self
            .rows
            .read()
            .unwrap()
            .values()
            .filter(|r| r.service_id == service_id && r.check_time >= start && r.check_time <= end)
            .cloned()
            .collect();
        found.sort_by(|a, b| b.check_time.cmp(&a.check_time));
        Ok(found)
    }

    async fn aggregate(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: &str,
    ) -> Result<ServiceMetrics, StorageError> {
        let rows = self.query_range(service_id, start, end).await?;
        Ok(compute_metrics(service_id, start, end, period, &rows))
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let mut rows = self.rows.write().unwrap();
        let before = rows.len();
        rows.retain(|_, r| r.check_time >= cutoff);
        Ok((before - rows.len()) as u64)
    }

    async fn count_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierCounts, StorageError> {
        let rows = self.query_range(service_id, start, end).await?;
        Ok(TierCounts {
            total: rows.len() as i64,
            successful: rows.iter().filter(|r| r.success).count() as i64,
        })
    }
}

#[derive(Default)]
pub struct InMemoryServiceStore {
    services: RwLock<HashMap<i64, MonitoredService>>,
}

impl InMemoryServiceStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, service: MonitoredService) {
        self.services.write().unwrap().insert(service.id, service);
    }

    pub fn remove(&self, service_id: i64) {
        self.services.write().unwrap().remove(&service_id);
    }
}

#[async_trait]
impl ServiceStore for InMemoryServiceStore {
    async fn get(&self, service_id: i64) -> Result<Option<MonitoredService>, StorageError> {
        Ok(self.services.read().unwrap().get(&service_id).cloned())
    }

    async fn list_enabled(&self) -> Result<Vec<MonitoredService>, StorageError> {
        Ok(self
            .services
            .read()
            .unwrap()
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryAlertStore {
    alerts: RwLock<Vec<Alert>>,
    next_id: AtomicI64,
}

impl InMemoryAlertStore {
    pub fn new() -> Self {
        Self {
            alerts: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn all(&self) -> Vec<Alert> {
        self.alerts.read().unwrap().clone()
    }
}

#[async_trait]
impl AlertStore for InMemoryAlertStore {
    async fn save(&self, alert: &Alert) -> Result<Alert, StorageError> {
        let mut saved = alert.clone();
        saved.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.alerts.write().unwrap().push(saved.clone());
        Ok(saved)
    }

    async fn find_by_service(&self, service_id: i64) -> Result<Vec<Alert>, StorageError> {
        Ok(self
            .alerts
            .read()
            .unwrap()
            .iter()
            .filter(|a| a.service_id == service_id)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryChannelStore {
    channels: RwLock<Vec<NotificationChannel>>,
}

impl InMemoryChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, channel: NotificationChannel) {
        self.channels.write().unwrap().push(channel);
    }
}

#[async_trait]
impl ChannelStore for InMemoryChannelStore {
    async fn list_enabled_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationChannel>, StorageError> {
        Ok(self
            .channels
            .read()
            .unwrap()
            .iter()
            .filter(|c| c.user_id == user_id && c.enabled)
            .cloned()
            .collect())
    }
}

#[derive(Default)]
pub struct InMemoryDeliveryStore {
    deliveries: RwLock<Vec<NotificationDelivery>>,
    next_id: AtomicI64,
}

impl InMemoryDeliveryStore {
    pub fn new() -> Self {
        Self {
            deliveries: RwLock::new(Vec::new()),
            next_id: AtomicI64::new(1),
        }
    }

    pub fn all(&self) -> Vec<NotificationDelivery> {
        self.deliveries.read().unwrap().clone()
    }
}

#[async_trait]
impl DeliveryStore for InMemoryDeliveryStore {
    async fn append(
        &self,
        delivery: &NotificationDelivery,
    ) -> Result<NotificationDelivery, StorageError> {
        let mut saved = delivery.clone();
        saved.id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.deliveries.write().unwrap().push(saved.clone());
        Ok(saved)
    }
}
