//! Postgres-backed store implementations.
//!
//! Both tiers speak Postgres here: the recent tier against the primary pool,
//! the analytics tier against its own pool (a separate database in
//! production, pointed at an archive table). Queries are runtime-checked so
//! the crate builds without a live database.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};

use super::models::{
    Alert, AlertSeverity, CheckResult, MonitoredService, NotificationChannel,
    NotificationDelivery, ServiceMetrics,
};
use super::stores::{
    AlertStore, AnalyticsStore, ChannelStore, DeliveryStore, RecentResultStore, ServiceStore,
    StorageError, TierCounts,
};

const CHECK_RESULT_COLUMNS: &str = "id, service_id, check_time, success, response_code, \
     latency_ms, response_body, error_message, ssl_valid, ssl_expires_at, location";

/// Creates the primary-tier tables when they do not exist yet.
pub async fn ensure_schema(pool: &PgPool) -> Result<(), StorageError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS monitored_services (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            name TEXT NOT NULL,
            description TEXT,
            url TEXT NOT NULL,
            http_method TEXT NOT NULL DEFAULT 'GET',
            headers JSONB,
            query_params JSONB,
            body TEXT,
            expected_status_code INT NOT NULL DEFAULT 200,
            expected_body_fragment TEXT,
            timeout_seconds BIGINT NOT NULL DEFAULT 30,
            check_interval_seconds BIGINT NOT NULL DEFAULT 300,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
            updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
        )",
        "CREATE TABLE IF NOT EXISTS check_results (
            id BIGSERIAL PRIMARY KEY,
            service_id BIGINT NOT NULL,
            check_time TIMESTAMPTZ NOT NULL,
            success BOOLEAN NOT NULL,
            response_code INT NOT NULL,
            latency_ms BIGINT NOT NULL,
            response_body TEXT,
            error_message TEXT,
            ssl_valid BOOLEAN NOT NULL DEFAULT FALSE,
            ssl_expires_at TIMESTAMPTZ,
            location TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_check_results_service_time
            ON check_results (service_id, check_time DESC)",
        "CREATE TABLE IF NOT EXISTS alerts (
            id BIGSERIAL PRIMARY KEY,
            service_id BIGINT NOT NULL,
            message TEXT NOT NULL,
            severity TEXT NOT NULL,
            resolved BOOLEAN NOT NULL DEFAULT FALSE,
            triggered_at TIMESTAMPTZ NOT NULL,
            resolved_at TIMESTAMPTZ,
            metadata JSONB
        )",
        "CREATE TABLE IF NOT EXISTS notification_channels (
            id BIGSERIAL PRIMARY KEY,
            user_id BIGINT NOT NULL,
            channel_type TEXT NOT NULL,
            name TEXT NOT NULL,
            configuration JSONB NOT NULL,
            enabled BOOLEAN NOT NULL DEFAULT TRUE,
            is_default BOOLEAN NOT NULL DEFAULT FALSE
        )",
        "CREATE TABLE IF NOT EXISTS notification_deliveries (
            id BIGSERIAL PRIMARY KEY,
            alert_id BIGINT NOT NULL,
            channel_id BIGINT NOT NULL,
            status TEXT NOT NULL,
            delivery_method TEXT NOT NULL,
            attempt_count INT NOT NULL DEFAULT 1,
            error_message TEXT,
            sent_at TIMESTAMPTZ NOT NULL,
            delivered_at TIMESTAMPTZ
        )",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

/// Creates the analytics-tier archive table when it does not exist yet.
pub async fn ensure_analytics_schema(pool: &PgPool) -> Result<(), StorageError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS check_results_archive (
            id BIGINT PRIMARY KEY,
            service_id BIGINT NOT NULL,
            check_time TIMESTAMPTZ NOT NULL,
            success BOOLEAN NOT NULL,
            response_code INT NOT NULL,
            latency_ms BIGINT NOT NULL,
            response_body TEXT,
            error_message TEXT,
            ssl_valid BOOLEAN NOT NULL DEFAULT FALSE,
            ssl_expires_at TIMESTAMPTZ,
            location TEXT NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_check_results_archive_service_time
            ON check_results_archive (service_id, check_time DESC)",
    ];
    for statement in statements {
        sqlx::query(statement).execute(pool).await?;
    }
    Ok(())
}

#[derive(FromRow)]
struct ServiceRow {
    id: i64,
    user_id: i64,
    name: String,
    description: Option<String>,
    url: String,
    http_method: String,
    headers: Option<serde_json::Value>,
    query_params: Option<serde_json::Value>,
    body: Option<String>,
    expected_status_code: i32,
    expected_body_fragment: Option<String>,
    timeout_seconds: i64,
    check_interval_seconds: i64,
    enabled: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

fn json_to_map(value: Option<serde_json::Value>) -> Result<HashMap<String, String>, StorageError> {
    match value {
        Some(v) if !v.is_null() => Ok(serde_json::from_value(v)?),
        _ => Ok(HashMap::new()),
    }
}

impl TryFrom<ServiceRow> for MonitoredService {
    type Error = StorageError;

    fn try_from(row: ServiceRow) -> Result<Self, Self::Error> {
        Ok(MonitoredService {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            url: row.url,
            http_method: row.http_method,
            headers: json_to_map(row.headers)?,
            query_params: json_to_map(row.query_params)?,
            body: row.body,
            expected_status_code: row.expected_status_code as u16,
            expected_body_fragment: row.expected_body_fragment,
            timeout_seconds: row.timeout_seconds.max(0) as u64,
            check_interval_seconds: row.check_interval_seconds,
            enabled: row.enabled,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

pub struct PgServiceStore {
    pool: PgPool,
}

impl PgServiceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceStore for PgServiceStore {
    async fn get(&self, service_id: i64) -> Result<Option<MonitoredService>, StorageError> {
        let row = sqlx::query_as::<_, ServiceRow>(
            "SELECT * FROM monitored_services WHERE id = $1",
        )
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?;
        row.map(MonitoredService::try_from).transpose()
    }

    async fn list_enabled(&self) -> Result<Vec<MonitoredService>, StorageError> {
        let rows = sqlx::query_as::<_, ServiceRow>(
            "SELECT * FROM monitored_services WHERE enabled = TRUE ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(MonitoredService::try_from).collect()
    }
}

pub struct PgRecentResultStore {
    pool: PgPool,
}

impl PgRecentResultStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl RecentResultStore for PgRecentResultStore {
    async fn save(&self, result: &CheckResult) -> Result<CheckResult, StorageError> {
        let saved = sqlx::query_as::<_, CheckResult>(&format!(
            "INSERT INTO check_results (service_id, check_time, success, response_code, \
             latency_ms, response_body, error_message, ssl_valid, ssl_expires_at, location) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) RETURNING {CHECK_RESULT_COLUMNS}"
        ))
        .bind(result.service_id)
        .bind(result.check_time)
        .bind(result.success)
        .bind(result.response_code)
        .bind(result.latency_ms)
        .bind(&result.response_body)
        .bind(&result.error_message)
        .bind(result.ssl_valid)
        .bind(result.ssl_expires_at)
        .bind(&result.location)
        .fetch_one(&self.pool)
        .await?;
        Ok(saved)
    }

    async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            sqlx::query(
                "INSERT INTO check_results (service_id, check_time, success, response_code, \
                 latency_ms, response_body, error_message, ssl_valid, ssl_expires_at, location) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
            )
            .bind(result.service_id)
            .bind(result.check_time)
            .bind(result.success)
            .bind(result.response_code)
            .bind(result.latency_ms)
            .bind(&result.response_body)
            .bind(&result.error_message)
            .bind(result.ssl_valid)
            .bind(result.ssl_expires_at)
            .bind(&result.location)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_recent_by_service(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(sqlx::query_as::<_, CheckResult>(&format!(
            "SELECT {CHECK_RESULT_COLUMNS} FROM check_results \
             WHERE service_id = $1 AND check_time >= $2 ORDER BY check_time DESC"
        ))
        .bind(service_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_failures_since(
        &self,
        service_id: i64,
        since: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(sqlx::query_as::<_, CheckResult>(&format!(
            "SELECT {CHECK_RESULT_COLUMNS} FROM check_results \
             WHERE service_id = $1 AND check_time >= $2 AND success = FALSE \
             ORDER BY check_time DESC"
        ))
        .bind(service_id)
        .bind(since)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_latest_by_service(
        &self,
        service_id: i64,
    ) -> Result<Option<CheckResult>, StorageError> {
        Ok(sqlx::query_as::<_, CheckResult>(&format!(
            "SELECT {CHECK_RESULT_COLUMNS} FROM check_results \
             WHERE service_id = $1 ORDER BY check_time DESC LIMIT 1"
        ))
        .bind(service_id)
        .fetch_optional(&self.pool)
        .await?)
    }

    async fn find_by_service_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(sqlx::query_as::<_, CheckResult>(&format!(
            "SELECT {CHECK_RESULT_COLUMNS} FROM check_results \
             WHERE service_id = $1 AND check_time >= $2 AND check_time <= $3 \
             ORDER BY check_time DESC"
        ))
        .bind(service_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn find_older_than(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(sqlx::query_as::<_, CheckResult>(&format!(
            "SELECT {CHECK_RESULT_COLUMNS} FROM check_results WHERE check_time < $1"
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn delete_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM check_results WHERE check_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierCounts, StorageError> {
        let (total, successful): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE success) FROM check_results \
             WHERE service_id = $1 AND check_time >= $2 AND check_time <= $3",
        )
        .bind(service_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(TierCounts { total, successful })
    }

    async fn service_ids_with_results(&self) -> Result<Vec<i64>, StorageError> {
        let ids: Vec<(i64,)> =
            sqlx::query_as("SELECT DISTINCT service_id FROM check_results ORDER BY service_id")
                .fetch_all(&self.pool)
                .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }
}

#[derive(FromRow)]
struct AggregateRow {
    total: i64,
    successful: i64,
    avg_latency: Option<f64>,
    min_latency: Option<i64>,
    max_latency: Option<i64>,
}

pub struct PgAnalyticsStore {
    pool: PgPool,
}

impl PgAnalyticsStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AnalyticsStore for PgAnalyticsStore {
    async fn save(&self, result: &CheckResult) -> Result<(), StorageError> {
        // Keyed on the recent-tier id so migration and resync re-assertions
        // are idempotent.
        sqlx::query(
            "INSERT INTO check_results_archive (id, service_id, check_time, success, \
             response_code, latency_ms, response_body, error_message, ssl_valid, \
             ssl_expires_at, location) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
             ON CONFLICT (id) DO NOTHING",
        )
        .bind(result.id)
        .bind(result.service_id)
        .bind(result.check_time)
        .bind(result.success)
        .bind(result.response_code)
        .bind(result.latency_ms)
        .bind(&result.response_body)
        .bind(&result.error_message)
        .bind(result.ssl_valid)
        .bind(result.ssl_expires_at)
        .bind(&result.location)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn save_batch(&self, results: &[CheckResult]) -> Result<(), StorageError> {
        let mut tx = self.pool.begin().await?;
        for result in results {
            sqlx::query(
                "INSERT INTO check_results_archive (id, service_id, check_time, success, \
                 response_code, latency_ms, response_body, error_message, ssl_valid, \
                 ssl_expires_at, location) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) \
                 ON CONFLICT (id) DO NOTHING",
            )
            .bind(result.id)
            .bind(result.service_id)
            .bind(result.check_time)
            .bind(result.success)
            .bind(result.response_code)
            .bind(result.latency_ms)
            .bind(&result.response_body)
            .bind(&result.error_message)
            .bind(result.ssl_valid)
            .bind(result.ssl_expires_at)
            .bind(&result.location)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn query_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<CheckResult>, StorageError> {
        Ok(sqlx::query_as::<_, CheckResult>(&format!(
            "SELECT {CHECK_RESULT_COLUMNS} FROM check_results_archive \
             WHERE service_id = $1 AND check_time >= $2 AND check_time <= $3 \
             ORDER BY check_time DESC"
        ))
        .bind(service_id)
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?)
    }

    async fn aggregate(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        period: &str,
    ) -> Result<ServiceMetrics, StorageError> {
        let row = sqlx::query_as::<_, AggregateRow>(
            "SELECT COUNT(*) AS total, \
                    COUNT(*) FILTER (WHERE success) AS successful, \
                    AVG(latency_ms)::double precision AS avg_latency, \
                    MIN(latency_ms) AS min_latency, \
                    MAX(latency_ms) AS max_latency \
             FROM check_results_archive \
             WHERE service_id = $1 AND check_time >= $2 AND check_time <= $3",
        )
        .bind(service_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;

        Ok(ServiceMetrics {
            service_id,
            period_start: start,
            period_end: end,
            uptime_percentage: if row.total > 0 {
                row.successful as f64 / row.total as f64 * 100.0
            } else {
                0.0
            },
            average_latency_ms: row.avg_latency.unwrap_or(0.0),
            min_latency_ms: row.min_latency.unwrap_or(0),
            max_latency_ms: row.max_latency.unwrap_or(0),
            total_checks: row.total,
            successful_checks: row.successful,
            failed_checks: row.total - row.successful,
            aggregation_period: period.to_string(),
        })
    }

    async fn cleanup_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StorageError> {
        let result = sqlx::query("DELETE FROM check_results_archive WHERE check_time < $1")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    async fn count_in_range(
        &self,
        service_id: i64,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<TierCounts, StorageError> {
        let (total, successful): (i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COUNT(*) FILTER (WHERE success) FROM check_results_archive \
             WHERE service_id = $1 AND check_time >= $2 AND check_time <= $3",
        )
        .bind(service_id)
        .bind(start)
        .bind(end)
        .fetch_one(&self.pool)
        .await?;
        Ok(TierCounts { total, successful })
    }
}

#[derive(FromRow)]
struct AlertRow {
    id: i64,
    service_id: i64,
    message: String,
    severity: String,
    resolved: bool,
    triggered_at: DateTime<Utc>,
    resolved_at: Option<DateTime<Utc>>,
    metadata: Option<serde_json::Value>,
}

impl TryFrom<AlertRow> for Alert {
    type Error = StorageError;

    fn try_from(row: AlertRow) -> Result<Self, Self::Error> {
        let severity = row
            .severity
            .parse::<AlertSeverity>()
            .map_err(StorageError::Corrupt)?;
        Ok(Alert {
            id: row.id,
            service_id: row.service_id,
            message: row.message,
            severity,
            resolved: row.resolved,
            triggered_at: row.triggered_at,
            resolved_at: row.resolved_at,
            metadata: json_to_map(row.metadata)?,
        })
    }
}

pub struct PgAlertStore {
    pool: PgPool,
}

impl PgAlertStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AlertStore for PgAlertStore {
    async fn save(&self, alert: &Alert) -> Result<Alert, StorageError> {
        let metadata = serde_json::to_value(&alert.metadata)?;
        let row = sqlx::query_as::<_, AlertRow>(
            "INSERT INTO alerts (service_id, message, severity, resolved, triggered_at, \
             resolved_at, metadata) VALUES ($1, $2, $3, $4, $5, $6, $7) RETURNING *",
        )
        .bind(alert.service_id)
        .bind(&alert.message)
        .bind(alert.severity.to_string())
        .bind(alert.resolved)
        .bind(alert.triggered_at)
        .bind(alert.resolved_at)
        .bind(metadata)
        .fetch_one(&self.pool)
        .await?;
        Alert::try_from(row)
    }

    async fn find_by_service(&self, service_id: i64) -> Result<Vec<Alert>, StorageError> {
        let rows = sqlx::query_as::<_, AlertRow>(
            "SELECT * FROM alerts WHERE service_id = $1 ORDER BY triggered_at DESC",
        )
        .bind(service_id)
        .fetch_all(&self.pool)
        .await?;
        rows.into_iter().map(Alert::try_from).collect()
    }
}

pub struct PgChannelStore {
    pool: PgPool,
}

impl PgChannelStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChannelStore for PgChannelStore {
    async fn list_enabled_for_user(
        &self,
        user_id: i64,
    ) -> Result<Vec<NotificationChannel>, StorageError> {
        Ok(sqlx::query_as::<_, NotificationChannel>(
            "SELECT id, user_id, channel_type, name, configuration, enabled, is_default \
             FROM notification_channels WHERE user_id = $1 AND enabled = TRUE ORDER BY id",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?)
    }
}

#[derive(FromRow)]
struct DeliveryRow {
    id: i64,
    alert_id: i64,
    channel_id: i64,
    status: String,
    delivery_method: String,
    attempt_count: i32,
    error_message: Option<String>,
    sent_at: DateTime<Utc>,
    delivered_at: Option<DateTime<Utc>>,
}

impl TryFrom<DeliveryRow> for NotificationDelivery {
    type Error = StorageError;

    fn try_from(row: DeliveryRow) -> Result<Self, Self::Error> {
        let status = row.status.parse().map_err(StorageError::Corrupt)?;
        Ok(NotificationDelivery {
            id: row.id,
            alert_id: row.alert_id,
            channel_id: row.channel_id,
            status,
            delivery_method: row.delivery_method,
            attempt_count: row.attempt_count,
            error_message: row.error_message,
            sent_at: row.sent_at,
            delivered_at: row.delivered_at,
        })
    }
}

pub struct PgDeliveryStore {
    pool: PgPool,
}

impl PgDeliveryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeliveryStore for PgDeliveryStore {
    async fn append(
        &self,
        delivery: &NotificationDelivery,
    ) -> Result<NotificationDelivery, StorageError> {
        let row = sqlx::query_as::<_, DeliveryRow>(
            "INSERT INTO notification_deliveries (alert_id, channel_id, status, \
             delivery_method, attempt_count, error_message, sent_at, delivered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING *",
        )
        .bind(delivery.alert_id)
        .bind(delivery.channel_id)
        .bind(delivery.status.to_string())
        .bind(&delivery.delivery_method)
        .bind(delivery.attempt_count)
        .bind(&delivery.error_message)
        .bind(delivery.sent_at)
        .bind(delivery.delivered_at)
        .fetch_one(&self.pool)
        .await?;
        NotificationDelivery::try_from(row)
    }
}
