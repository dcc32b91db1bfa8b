use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A service endpoint under monitoring.
///
/// Instances are immutable values: an update builds a new value and the
/// caller decides what to persist. The pipeline treats everything except
/// `enabled` and `check_interval_seconds` as read-only configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitoredService {
    pub id: i64,
    pub user_id: i64,
    pub name: String,
    pub description: Option<String>,
    pub url: String,
    pub http_method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub query_params: HashMap<String, String>,
    pub body: Option<String>,
    pub expected_status_code: u16,
    pub expected_body_fragment: Option<String>,
    pub timeout_seconds: u64,
    pub check_interval_seconds: i64,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MonitoredService {
    /// Checks the structural invariants of a service definition.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.url.starts_with("http://") || self.url.starts_with("https://")) {
            return Err(format!("url must be http(s): {}", self.url));
        }
        if self.timeout_seconds == 0 {
            return Err("timeout_seconds must be greater than zero".to_string());
        }
        if self.check_interval_seconds <= 0 {
            return Err("check_interval_seconds must be greater than zero".to_string());
        }
        Ok(())
    }
}

/// The timing configuration for one service's checks (1:1 with the service).
/// Either a cron expression or a fixed interval in seconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckSchedule {
    pub service_id: i64,
    pub cron_expression: Option<String>,
    pub interval_seconds: i64,
    pub enabled: bool,
    pub timezone: String,
}

impl CheckSchedule {
    /// A fixed-interval schedule derived from the service's own configuration.
    pub fn from_service(service: &MonitoredService) -> Self {
        Self {
            service_id: service.id,
            cron_expression: None,
            interval_seconds: service.check_interval_seconds,
            enabled: true,
            timezone: "UTC".to_string(),
        }
    }
}

/// Outcome of a single probe execution. Append-only once written.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct CheckResult {
    pub id: i64,
    pub service_id: i64,
    pub check_time: DateTime<Utc>,
    pub success: bool,
    pub response_code: i32,
    pub latency_ms: i64,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub ssl_valid: bool,
    pub ssl_expires_at: Option<DateTime<Utc>>,
    pub location: String,
}

impl CheckResult {
    /// A synthetic failed result for a check that could not be executed.
    pub fn execution_failure(service_id: i64, error: String, location: &str) -> Self {
        Self {
            id: 0,
            service_id,
            check_time: Utc::now(),
            success: false,
            response_code: 0,
            latency_ms: 0,
            response_body: None,
            error_message: Some(error),
            ssl_valid: false,
            ssl_expires_at: None,
            location: location.to_string(),
        }
    }
}

/// Alert severity. `Info` is reserved for recovery alerts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AlertSeverity {
    Low,
    Medium,
    High,
    Critical,
    Info,
}

impl fmt::Display for AlertSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AlertSeverity::Low => "LOW",
            AlertSeverity::Medium => "MEDIUM",
            AlertSeverity::High => "HIGH",
            AlertSeverity::Critical => "CRITICAL",
            AlertSeverity::Info => "INFO",
        };
        f.write_str(s)
    }
}

impl FromStr for AlertSeverity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "LOW" => Ok(AlertSeverity::Low),
            "MEDIUM" => Ok(AlertSeverity::Medium),
            "HIGH" => Ok(AlertSeverity::High),
            "CRITICAL" => Ok(AlertSeverity::Critical),
            "INFO" => Ok(AlertSeverity::Info),
            other => Err(format!("unknown alert severity: {other}")),
        }
    }
}

/// An incident opened by the alert engine, or a resolved recovery marker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Alert {
    pub id: i64,
    pub service_id: i64,
    pub message: String,
    pub severity: AlertSeverity,
    pub resolved: bool,
    pub triggered_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// A configured notification target. The `configuration` blob is
/// provider-specific JSON, parsed into a `ChannelConfig` at dispatch time.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct NotificationChannel {
    pub id: i64,
    pub user_id: i64,
    pub channel_type: String,
    pub name: String,
    pub configuration: serde_json::Value,
    pub enabled: bool,
    pub is_default: bool,
}

/// Delivery outcome of one dispatch attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum DeliveryStatus {
    Sent,
    Failed,
}

impl fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeliveryStatus::Sent => f.write_str("SENT"),
            DeliveryStatus::Failed => f.write_str("FAILED"),
        }
    }
}

impl FromStr for DeliveryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SENT" => Ok(DeliveryStatus::Sent),
            "FAILED" => Ok(DeliveryStatus::Failed),
            other => Err(format!("unknown delivery status: {other}")),
        }
    }
}

/// One row per notification dispatch attempt. Append-only audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationDelivery {
    pub id: i64,
    pub alert_id: i64,
    pub channel_id: i64,
    pub status: DeliveryStatus,
    pub delivery_method: String,
    pub attempt_count: i32,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
}

/// Aggregated check statistics for one service over a period.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceMetrics {
    pub service_id: i64,
    pub period_start: DateTime<Utc>,
    pub period_end: DateTime<Utc>,
    pub uptime_percentage: f64,
    pub average_latency_ms: f64,
    pub min_latency_ms: i64,
    pub max_latency_ms: i64,
    pub total_checks: i64,
    pub successful_checks: i64,
    pub failed_checks: i64,
    pub aggregation_period: String,
}

/// Coarse availability classification over the most recent window of results.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ServiceStatus {
    /// All recent checks passing.
    Up,
    /// All recent checks failing.
    Down,
    /// Mixed results.
    Degraded,
    /// No recent data.
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn service() -> MonitoredService {
        MonitoredService {
            id: 1,
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

    #[test]
    fn validate_accepts_well_formed_service() {
        assert!(service().validate().is_ok());
    }

    #[test]
    fn validate_rejects_non_http_url() {
        let mut s = service();
        s.url = "ftp://example.com".to_string();
        assert!(s.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_timeout_and_interval() {
        let mut s = service();
        s.timeout_seconds = 0;
        assert!(s.validate().is_err());

        let mut s = service();
        s.check_interval_seconds = 0;
        assert!(s.validate().is_err());
    }

    #[test]
    fn severity_round_trips_through_strings() {
        for sev in [
            AlertSeverity::Low,
            AlertSeverity::Medium,
            AlertSeverity::High,
            AlertSeverity::Critical,
            AlertSeverity::Info,
        ] {
            assert_eq!(sev.to_string().parse::<AlertSeverity>().unwrap(), sev);
        }
    }
}
