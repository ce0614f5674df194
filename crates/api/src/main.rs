use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use liman_appcount::AppCountClient;
use liman_events::{EventBus, SyncNotifier};
use liman_sync::{LifecycleJobs, PgLicenseStore, Scheduler, SchedulerConfig, SyncEngine};

use liman_api::config::{appcount_config_from_env, ServerConfig};
use liman_api::router::build_app_router;
use liman_api::state::AppState;
use liman_api::ws;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "liman_api=debug,liman_sync=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ServerConfig::from_env();
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let database_url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");

    let max_connections: u32 = std::env::var("DATABASE_MAX_CONNECTIONS")
        .unwrap_or_else(|_| "10".into())
        .parse()
        .expect("DATABASE_MAX_CONNECTIONS must be a valid u32");

    let pool = liman_db::connect(&database_url, max_connections)
        .await
        .expect("Failed to connect to database");
    tracing::info!("Database connection pool created");

    liman_db::health_check(&pool)
        .await
        .expect("Database health check failed");

    liman_db::run_migrations(&pool)
        .await
        .expect("Failed to run database migrations");
    tracing::info!("Database migrations applied");

    // --- External license API client ---
    let appcount_config = appcount_config_from_env();
    let api_timeout = appcount_config.timeout;
    let client = AppCountClient::new(appcount_config).expect("Failed to build AppCount client");
    tracing::info!("AppCount client configured");

    // --- Shared services ---
    let monitor = Arc::new(liman_core::monitor::Monitor::new());
    let cache = Arc::new(liman_core::cache::TtlCache::new());
    let event_bus = Arc::new(EventBus::default());
    let notifier = SyncNotifier::new(Arc::clone(&event_bus));

    // --- Sync engine ---
    let store = Arc::new(PgLicenseStore::new(pool.clone()));
    let engine = Arc::new(SyncEngine::new(
        Arc::new(client),
        store,
        Arc::clone(&cache),
        Arc::clone(&monitor),
        notifier.clone(),
        api_timeout,
    ));

    // --- Scheduler ---
    let scheduler_config = SchedulerConfig::from_env();
    let lifecycle = Arc::new(LifecycleJobs::new(
        pool.clone(),
        Arc::clone(&cache),
        Arc::clone(&monitor),
        notifier,
        scheduler_config.grace_days,
        scheduler_config.reminder_window_days,
    ));
    let scheduler = Scheduler::new(
        Arc::clone(&engine),
        lifecycle,
        Arc::clone(&monitor),
        scheduler_config,
    );
    scheduler.start();
    tracing::info!("Scheduler started");

    // --- WebSocket manager + event forwarder ---
    let ws_manager = Arc::new(ws::WsManager::new());
    let forwarder_handle =
        ws::start_event_forwarder(Arc::clone(&ws_manager), event_bus.subscribe());

    // --- App state ---
    let state = AppState {
        pool,
        config: Arc::new(config.clone()),
        engine,
        monitor,
        cache,
        event_bus: Arc::clone(&event_bus),
        ws_manager: Arc::clone(&ws_manager),
    };

    // --- Router ---
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(
        config.host.parse().expect("Invalid HOST address"),
        config.port,
    );
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind to address");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    // --- Post-shutdown cleanup ---
    tracing::info!("Server stopped accepting connections, cleaning up");

    // Stop the recurring jobs first so no new run starts mid-shutdown.
    scheduler.stop();
    tracing::info!("Scheduler stopped");

    // Drop the event bus sender to close the broadcast channel.
    // This signals the WebSocket forwarder to shut down.
    drop(event_bus);
    let _ = tokio::time::timeout(Duration::from_secs(5), forwarder_handle).await;

    let ws_count = ws_manager.connection_count().await;
    tracing::info!(ws_count, "Closing remaining WebSocket connections");
    ws_manager.shutdown_all().await;

    tracing::info!("Graceful shutdown complete");
}

/// Wait for a termination signal to initiate graceful shutdown.
///
/// Handles both SIGINT (Ctrl-C) and SIGTERM (on Unix) so the server
/// shuts down cleanly whether stopped interactively or by a process
/// manager (e.g. systemd, Docker, Kubernetes).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received SIGINT (Ctrl-C), starting graceful shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        }
    }
}
