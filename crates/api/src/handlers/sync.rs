//! Handlers for the `/external-licenses` sync triggers.
//!
//! These endpoints always return HTTP 200: a run that completed with
//! failures (or was rejected because another run holds the guard) reports
//! that through the `success` flag and `message` inside the body.

use axum::extract::{Path, Query, State};
use axum::Json;
use liman_sync::SyncOptions;

use crate::response::{DataResponse, SyncResponse};
use crate::state::AppState;

/// POST /api/v1/external-licenses/sync
///
/// Trigger a full reconciliation run. Options come from query parameters
/// (`force`, `batchSize`, `dryRun`, `bidirectional`, `comprehensive`,
/// `detectDuplicates`); anything omitted takes its default.
pub async fn trigger_sync(
    State(state): State<AppState>,
    Query(options): Query<SyncOptions>,
) -> Json<SyncResponse> {
    tracing::info!(
        force = options.force,
        dry_run = options.dry_run,
        batch_size = options.effective_batch_size(),
        "Sync triggered via API",
    );

    let result = state.engine.execute(&options).await;
    Json(SyncResponse::from_result(result))
}

/// POST /api/v1/external-licenses/sync/{appid}
///
/// Reconcile a single record by its external application ID.
pub async fn sync_one(
    State(state): State<AppState>,
    Path(appid): Path<String>,
) -> Json<SyncResponse> {
    tracing::info!(appid = %appid, "Single-record sync triggered via API");

    let result = state.engine.sync_by_appid(&appid).await;
    Json(SyncResponse::from_result(result))
}

/// POST /api/v1/external-licenses/sync/pending
///
/// Re-fetch every record currently flagged `sync_status = 'pending'`.
pub async fn sync_pending(State(state): State<AppState>) -> Json<SyncResponse> {
    tracing::info!("Pending-records sync triggered via API");

    let result = state.engine.sync_pending().await;
    Json(SyncResponse::from_result(result))
}

/// GET /api/v1/external-licenses/sync/status
/// GET /api/v1/licenses/sync/status
///
/// Last run result plus whether a run is currently in flight.
pub async fn sync_status(State(state): State<AppState>) -> Json<DataResponse<liman_sync::SyncStatus>> {
    Json(DataResponse {
        data: state.engine.status().await,
    })
}
