//! Route definitions for the `/licenses` resource.

use axum::routing::get;
use axum::Router;

use crate::handlers::{licenses, sync};
use crate::state::AppState;

/// Routes mounted at `/licenses`.
///
/// ```text
/// GET    /                -> list_licenses
/// GET    /stats           -> license_stats
/// GET    /sync/status     -> sync_status (alias kept for dashboards)
/// GET    /{id}            -> get_license
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(licenses::list_licenses))
        .route("/stats", get(licenses::license_stats))
        .route("/sync/status", get(sync::sync_status))
        .route("/{id}", get(licenses::get_license))
}
