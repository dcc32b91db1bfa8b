use std::env;
use std::str::FromStr;
use std::time::Duration;

use crate::alerting::AlertPolicy;
use crate::sink::maintenance::RetentionConfig;

/// Which event transport the pipeline publishes to. Selected explicitly at
/// startup; there is no implicit detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventTransport {
    Broadcast,
    Log,
}

impl FromStr for EventTransport {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "broadcast" => Ok(EventTransport::Broadcast),
            "log" => Ok(EventTransport::Log),
            other => Err(format!("unknown event transport: {other}")),
        }
    }
}

#[derive(Clone)]
pub struct AppConfig {
    /// Primary (recent tier) database. When unset the server runs standalone
    /// with in-memory stores.
    pub database_url: Option<String>,
    /// Analytics tier database; defaults to the primary database.
    pub analytics_database_url: Option<String>,
    /// Probe location tag recorded on every check result.
    pub probe_location: String,
    pub event_transport: EventTransport,
    pub retention: RetentionConfig,
    pub alert_policy: AlertPolicy,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, String> {
        let database_url = env::var("DATABASE_URL").ok().filter(|v| !v.is_empty());
        let analytics_database_url = env::var("ANALYTICS_DATABASE_URL")
            .ok()
            .filter(|v| !v.is_empty());

        let probe_location =
            env::var("PROBE_LOCATION").unwrap_or_else(|_| "default".to_string());

        let event_transport = match env::var("EVENT_TRANSPORT") {
            Ok(value) => value.parse()?,
            Err(_) => EventTransport::Log,
        };

        let retention = RetentionConfig {
            recent_retention_days: env_parse("RECENT_RETENTION_DAYS", 7)?,
            analytics_retention_days: env_parse("ANALYTICS_RETENTION_DAYS", 730)?,
            resync_window_hours: env_parse("RESYNC_WINDOW_HOURS", 24)?,
            migration_interval: Duration::from_secs(env_parse(
                "MIGRATION_INTERVAL_SECONDS",
                24 * 3600,
            )?),
            resync_interval: Duration::from_secs(env_parse("RESYNC_INTERVAL_SECONDS", 3600)?),
            cleanup_interval: Duration::from_secs(env_parse(
                "CLEANUP_INTERVAL_SECONDS",
                7 * 24 * 3600,
            )?),
        };

        let alert_policy = AlertPolicy {
            failure_window_minutes: env_parse("ALERT_FAILURE_WINDOW_MINUTES", 30)?,
            recovery_window_minutes: env_parse("ALERT_RECOVERY_WINDOW_MINUTES", 60)?,
            medium_failure_threshold: env_parse("ALERT_MEDIUM_FAILURES", 3)?,
            high_failure_threshold: env_parse("ALERT_HIGH_FAILURES", 5)?,
            critical_failure_threshold: env_parse("ALERT_CRITICAL_FAILURES", 10)?,
            recovery_failure_threshold: env_parse("ALERT_RECOVERY_FAILURES", 2)?,
            latency_ceiling_ms: env_parse("ALERT_LATENCY_CEILING_MS", 10_000)?,
        };

        Ok(AppConfig {
            database_url,
            analytics_database_url,
            probe_location,
            event_transport,
            retention,
            alert_policy,
        })
    }
}

fn env_parse<T>(key: &str, default: T) -> Result<T, String>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|e| format!("{key} must be a valid value: {e}")),
        Err(_) => Ok(default),
    }
}
