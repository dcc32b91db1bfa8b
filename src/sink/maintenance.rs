//! Periodic tier maintenance: migration, resynchronization and cleanup.
//!
//! Each job runs on its own interval loop, independent of per-request
//! writes. A failed run is logged and retried on the next tick; maintenance
//! never blocks live probing.

use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::db::stores::{AnalyticsStore, RecentResultStore, StorageError};

/// Retention and cadence settings for the maintenance jobs.
#[derive(Debug, Clone)]
pub struct RetentionConfig {
    /// Days a result stays in the recent tier before migration.
    pub recent_retention_days: i64,
    /// Days a result stays in the analytics tier before cleanup.
    pub analytics_retention_days: i64,
    /// Hours of recent-tier history re-pushed by each resync run.
    pub resync_window_hours: i64,
    pub migration_interval: Duration,
    pub resync_interval: Duration,
    pub cleanup_interval: Duration,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            recent_retention_days: 7,
            analytics_retention_days: 730,
            resync_window_hours: 24,
            migration_interval: Duration::from_secs(24 * 3600),
            resync_interval: Duration::from_secs(3600),
            cleanup_interval: Duration::from_secs(7 * 24 * 3600),
        }
    }
}

pub struct TierMaintenance {
    recent: Arc<dyn RecentResultStore>,
    analytics: Arc<dyn AnalyticsStore>,
    config: RetentionConfig,
}

impl TierMaintenance {
    pub fn new(
        recent: Arc<dyn RecentResultStore>,
        analytics: Arc<dyn AnalyticsStore>,
        config: RetentionConfig,
    ) -> Self {
        Self {
            recent,
            analytics,
            config,
        }
    }

    /// Moves recent-tier rows past the retention cutoff into the analytics
    /// tier, then deletes them from the recent tier. The analytics write is
    /// a re-assertion: rows already archived at probe time are deduplicated
    /// by the store.
    pub async fn migrate_aged_results(&self) -> Result<u64, StorageError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.recent_retention_days);
        let aged = self.recent.find_older_than(cutoff).await?;
        if aged.is_empty() {
            return Ok(0);
        }

        self.analytics.save_batch(&aged).await?;
        let deleted = self.recent.delete_older_than(cutoff).await?;
        info!(
            migrated = aged.len(),
            deleted, "migrated aged results to analytics tier"
        );
        Ok(deleted)
    }

    /// Re-pushes the resync window of recent-tier rows into the analytics
    /// tier for every service with stored results, healing gaps left by
    /// earlier best-effort write failures.
    pub async fn resynchronize_recent(&self) -> Result<u64, StorageError> {
        let since = Utc::now() - ChronoDuration::hours(self.config.resync_window_hours);
        let mut pushed = 0u64;
        for service_id in self.recent.service_ids_with_results().await? {
            let results = self
                .recent
                .find_recent_by_service(service_id, since)
                .await?;
            if results.is_empty() {
                continue;
            }
            self.analytics.save_batch(&results).await?;
            pushed += results.len() as u64;
        }
        if pushed > 0 {
            info!(pushed, "resynchronized recent tier into analytics tier");
        }
        Ok(pushed)
    }

    /// Re-pushes one service's recent-tier rows for an arbitrary range into
    /// the analytics tier. Operator-invoked repair for a known gap.
    pub async fn force_sync_service(
        &self,
        service_id: i64,
        start: chrono::DateTime<Utc>,
        end: chrono::DateTime<Utc>,
    ) -> Result<u64, StorageError> {
        let results = self
            .recent
            .find_by_service_in_range(service_id, start, end)
            .await?;
        if results.is_empty() {
            return Ok(0);
        }
        self.analytics.save_batch(&results).await?;
        info!(
            service_id,
            pushed = results.len(),
            "force-synced service results into analytics tier"
        );
        Ok(results.len() as u64)
    }

    /// Drops analytics-tier rows past the long-term retention horizon.
    pub async fn cleanup_analytics(&self) -> Result<u64, StorageError> {
        let cutoff = Utc::now() - ChronoDuration::days(self.config.analytics_retention_days);
        let deleted = self.analytics.cleanup_older_than(cutoff).await?;
        if deleted > 0 {
            info!(deleted, "cleaned up aged analytics rows");
        }
        Ok(deleted)
    }

    /// Starts the three periodic loops. Handles are returned so a shutdown
    /// path can abort them.
    pub fn spawn_periodic(self: Arc<Self>) -> Vec<JoinHandle<()>> {
        let migration = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(this.config.migration_interval);
                ticker.tick().await; // immediate first tick
                loop {
                    ticker.tick().await;
                    if let Err(e) = this.migrate_aged_results().await {
                        error!(error = %e, "result migration run failed");
                    }
                }
            })
        };
        let resync = {
            let this = self.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(this.config.resync_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = this.resynchronize_recent().await {
                        error!(error = %e, "analytics resync run failed");
                    }
                }
            })
        };
        let cleanup = {
            let this = self;
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(this.config.cleanup_interval);
                ticker.tick().await;
                loop {
                    ticker.tick().await;
                    if let Err(e) = this.cleanup_analytics().await {
                        error!(error = %e, "analytics cleanup run failed");
                    }
                }
            })
        };
        vec![migration, resync, cleanup]
    }
}
