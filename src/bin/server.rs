use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::info;
use tracing_subscriber::EnvFilter;

use watchpost::alerting::AlertEngine;
use watchpost::config::{AppConfig, EventTransport};
use watchpost::db::memory::{
    InMemoryAlertStore, InMemoryAnalyticsStore, InMemoryChannelStore, InMemoryDeliveryStore,
    InMemoryRecentResultStore, InMemoryServiceStore,
};
use watchpost::db::postgres::{
    PgAlertStore, PgAnalyticsStore, PgChannelStore, PgDeliveryStore, PgRecentResultStore,
    PgServiceStore, ensure_analytics_schema, ensure_schema,
};
use watchpost::db::stores::{
    AlertStore, AnalyticsStore, ChannelStore, DeliveryStore, RecentResultStore, ServiceStore,
};
use watchpost::events::{BroadcastEventPublisher, EventPublisher, LogEventPublisher};
use watchpost::notifications::NotificationDispatcher;
use watchpost::pipeline::{MonitorManager, MonitorPipeline};
use watchpost::probe::ProbeExecutor;
use watchpost::scheduler::Scheduler;
use watchpost::sink::ResultSink;
use watchpost::sink::maintenance::TierMaintenance;

struct Stores {
    recent: Arc<dyn RecentResultStore>,
    analytics: Arc<dyn AnalyticsStore>,
    services: Arc<dyn ServiceStore>,
    alerts: Arc<dyn AlertStore>,
    channels: Arc<dyn ChannelStore>,
    deliveries: Arc<dyn DeliveryStore>,
}

async fn build_stores(config: &AppConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    match &config.database_url {
        Some(database_url) => {
            let pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?;
            ensure_schema(&pool).await?;

            let analytics_pool = match &config.analytics_database_url {
                Some(url) => {
                    PgPoolOptions::new()
                        .max_connections(5)
                        .connect(url)
                        .await?
                }
                None => pool.clone(),
            };
            ensure_analytics_schema(&analytics_pool).await?;

            info!("using postgres-backed stores");
            Ok(Stores {
                recent: Arc::new(PgRecentResultStore::new(pool.clone())),
                analytics: Arc::new(PgAnalyticsStore::new(analytics_pool)),
                services: Arc::new(PgServiceStore::new(pool.clone())),
                alerts: Arc::new(PgAlertStore::new(pool.clone())),
                channels: Arc::new(PgChannelStore::new(pool.clone())),
                deliveries: Arc::new(PgDeliveryStore::new(pool)),
            })
        }
        None => {
            info!("DATABASE_URL not set; running standalone with in-memory stores");
            Ok(Stores {
                recent: Arc::new(InMemoryRecentResultStore::new()),
                analytics: Arc::new(InMemoryAnalyticsStore::new()),
                services: Arc::new(InMemoryServiceStore::new()),
                alerts: Arc::new(InMemoryAlertStore::new()),
                channels: Arc::new(InMemoryChannelStore::new()),
                deliveries: Arc::new(InMemoryDeliveryStore::new()),
            })
        }
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = AppConfig::from_env()?;
    let stores = build_stores(&config).await?;

    let events: Arc<dyn EventPublisher> = match config.event_transport {
        EventTransport::Broadcast => Arc::new(BroadcastEventPublisher::new(256)),
        EventTransport::Log => Arc::new(LogEventPublisher),
    };

    let sink = Arc::new(ResultSink::new(
        stores.recent.clone(),
        stores.analytics.clone(),
    ));
    let dispatcher = Arc::new(NotificationDispatcher::new(
        stores.services.clone(),
        stores.channels.clone(),
        stores.deliveries.clone(),
    ));
    let engine = AlertEngine::new(
        stores.recent.clone(),
        stores.services.clone(),
        stores.alerts.clone(),
        dispatcher,
        events.clone(),
        config.alert_policy.clone(),
    );
    let pipeline = Arc::new(MonitorPipeline::new(
        ProbeExecutor::new(config.probe_location.clone()),
        sink.clone(),
        engine,
        events,
    ));
    let scheduler = Arc::new(Scheduler::new(pipeline.clone(), stores.services.clone()));
    let manager = MonitorManager::new(scheduler, pipeline, stores.services.clone(), sink);

    manager.start_all().await?;

    let maintenance = Arc::new(TierMaintenance::new(
        stores.recent,
        stores.analytics,
        config.retention.clone(),
    ));
    let maintenance_handles = maintenance.spawn_periodic();

    info!("watchpost monitoring pipeline running; press ctrl-c to stop");
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    manager.shutdown();
    for handle in maintenance_handles {
        handle.abort();
    }
    Ok(())
}
