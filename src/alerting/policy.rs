use crate::db::models::AlertSeverity;

/// Alerting thresholds and windows.
///
/// The defaults mirror long-standing operational practice rather than a
/// stated SLA; every value is overridable through configuration.
#[derive(Debug, Clone)]
pub struct AlertPolicy {
    /// Lookback window for counting failures, in minutes.
    pub failure_window_minutes: i64,
    /// Lookback window for detecting recovery, in minutes.
    pub recovery_window_minutes: i64,
    /// Failure count at which an incident opens with MEDIUM severity.
    pub medium_failure_threshold: usize,
    /// Failure count at which severity escalates to HIGH.
    pub high_failure_threshold: usize,
    /// Failure count at which severity escalates to CRITICAL.
    pub critical_failure_threshold: usize,
    /// Prior failures in the recovery window required to emit a recovery
    /// alert.
    pub recovery_failure_threshold: usize,
    /// A single probe slower than this opens an incident on its own.
    pub latency_ceiling_ms: i64,
}

impl Default for AlertPolicy {
    fn default() -> Self {
        Self {
            failure_window_minutes: 30,
            recovery_window_minutes: 60,
            medium_failure_threshold: 3,
            high_failure_threshold: 5,
            critical_failure_threshold: 10,
            recovery_failure_threshold: 2,
            latency_ceiling_ms: 10_000,
        }
    }
}

/// Maps an in-window failure count to a severity. Pure function of the
/// count; counts below the medium threshold fall back to LOW (reachable only
/// through the latency ceiling).
pub fn severity_for_failures(failure_count: usize, policy: &AlertPolicy) -> AlertSeverity {
    if failure_count >= policy.critical_failure_threshold {
        AlertSeverity::Critical
    } else if failure_count >= policy.high_failure_threshold {
        AlertSeverity::High
    } else if failure_count >= policy.medium_failure_threshold {
        AlertSeverity::Medium
    } else {
        AlertSeverity::Low
    }
}
