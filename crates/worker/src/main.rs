//! Headless scheduler binary.
//!
//! Runs the same sync engine and recurring jobs as the API server, without
//! the HTTP surface. Useful for deployments that split the dashboard from
//! the pipeline, and for one-box setups where the API is not needed.

use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liman_appcount::{AppCountClient, AppCountConfig};
use liman_events::{EventBus, SyncNotifier};
use liman_sync::{LifecycleJobs, PgLicenseStore, Scheduler, SchedulerConfig, SyncEngine};

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liman_worker=debug,liman_sync=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "5".into())
        .parse()
        .expect("DATABASE_MAX_CONNECTIONS must be a valid u32");

    let pool = liman_db::connect(&database_url, max_connections)
        .await
        .expect("Failed to connect to database");

    liman_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database ready");

    // --- External license API client ---
    let appcount_config = appcount_config_from_env();
    let api_timeout = appcount_config.timeout;
    let client = AppCountClient::new(appcount_config).expect("Failed to build AppCount client");

    // --- Shared services ---
    let monitor = Arc::new(liman_core::monitor::Monitor::new());
    let cache = Arc::new(liman_core::cache::TtlCache::new());
    let event_bus = Arc::new(EventBus::default());
    let notifier = SyncNotifier::new(Arc::clone(&event_bus));

    // --- Engine and scheduler ---
    let store = Arc::new(PgLicenseStore::new(pool.clone()));
    let engine = Arc::new(SyncEngine::new(
        Arc::new(client),
        store,
        Arc::clone(&cache),
        Arc::clone(&monitor),
        notifier.clone(),
        api_timeout,
    ));

    let scheduler_config = SchedulerConfig::from_env();
    let lifecycle = Arc::new(LifecycleJobs::new(
        pool,
        cache,
        Arc::clone(&monitor),
        notifier,
        scheduler_config.grace_days,
        scheduler_config.reminder_window_days,
    ));

    let scheduler = Scheduler::new(engine, lifecycle, monitor, scheduler_config);
    scheduler.start();
    tracing::info!("Worker started, recurring jobs running");

    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install Ctrl-C handler");
    tracing::info!("Received SIGINT, stopping scheduler");

    scheduler.stop();
    tracing::info!("Worker shut down");
}

/// Load the external license API configuration from environment variables.
fn appcount_config_from_env() -> AppCountConfig {
    let base_url = std::env::var("APPCOUNT_BASE_URL").expect("APPCOUNT_BASE_URL must be set");
    let api_key = std::env::var("APPCOUNT_API_KEY").expect("APPCOUNT_API_KEY must be set");

    let timeout_secs: u64 = std::env::var("APPCOUNT_TIMEOUT_SECS")
        .unwrap_or_else(|_| "30".into())
        .parse()
        .expect("APPCOUNT_TIMEOUT_SECS must be a valid u64");

    AppCountConfig {
        base_url,
        api_key,
        timeout: Duration::from_secs(timeout_secs),
    }
}
