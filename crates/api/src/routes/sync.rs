//! Route definitions for the `/external-licenses` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::sync;
use crate::state::AppState;

/// Routes mounted at `/external-licenses`.
///
/// ```text
/// POST   /sync            -> trigger_sync
/// POST   /sync/pending    -> sync_pending
/// GET    /sync/status     -> sync_status
/// POST   /sync/{appid}    -> sync_one
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/sync", post(sync::trigger_sync))
        .route("/sync/pending", post(sync::sync_pending))
        .route("/sync/status", get(sync::sync_status))
        .route("/sync/{appid}", post(sync::sync_one))
}
