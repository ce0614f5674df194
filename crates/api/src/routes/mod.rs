pub mod health;
pub mod licenses;
pub mod monitoring;
pub mod sync;

use axum::routing::get;
use axum::Router;

use crate::state::AppState;
use crate::ws;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /ws                                              WebSocket
///
/// /external-licenses/sync                          full run (POST)
/// /external-licenses/sync/pending                  pending re-fetch (POST)
/// /external-licenses/sync/status                   last result (GET)
/// /external-licenses/sync/{appid}                  single record (POST)
///
/// /licenses                                        filtered list (GET)
/// /licenses/stats                                  aggregate counts (GET)
/// /licenses/sync/status                            alias of sync status (GET)
/// /licenses/{id}                                   single entity (GET)
///
/// /monitoring/metrics                              metrics snapshot (GET)
/// /monitoring/alerts                               alert feed (GET)
/// /monitoring/alerts/{id}/acknowledge              mark seen (POST)
/// /monitoring/health                               health evaluation (GET)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/ws", get(ws::ws_handler))
        .nest("/external-licenses", sync::router())
        .nest("/licenses", licenses::router())
        .nest("/monitoring", monitoring::router())
}
