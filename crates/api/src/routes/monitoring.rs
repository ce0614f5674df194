//! Route definitions for the `/monitoring` resource.

use axum::routing::{get, post};
use axum::Router;

use crate::handlers::monitoring;
use crate::state::AppState;

/// Routes mounted at `/monitoring`.
///
/// ```text
/// GET    /metrics                     -> metrics
/// GET    /alerts                      -> alerts
/// POST   /alerts/{id}/acknowledge     -> acknowledge_alert
/// GET    /health                      -> health
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/metrics", get(monitoring::metrics))
        .route("/alerts", get(monitoring::alerts))
        .route("/alerts/{id}/acknowledge", post(monitoring::acknowledge_alert))
        .route("/health", get(monitoring::health))
}
