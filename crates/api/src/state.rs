use std::sync::Arc;

use liman_core::cache::TtlCache;
use liman_core::monitor::Monitor;
use liman_events::EventBus;
use liman_sync::SyncEngine;

use crate::config::ServerConfig;
use crate::ws::WsManager;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// This is cheaply cloneable (inner data is behind `Arc`).
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool.
    pub pool: liman_db::DbPool,
    /// Server configuration.
    pub config: Arc<ServerConfig>,
    /// Reconciliation engine driving all sync endpoints.
    pub engine: Arc<SyncEngine>,
    /// Metrics, alerts, and health for the monitoring endpoints.
    pub monitor: Arc<Monitor>,
    /// In-process TTL cache for license reads.
    pub cache: Arc<TtlCache>,
    /// Centralized event bus for sync and lifecycle events.
    pub event_bus: Arc<EventBus>,
    /// WebSocket connection manager (dashboard clients).
    pub ws_manager: Arc<WsManager>,
}
