//! Handlers for the `/licenses` read endpoints.
//!
//! All reads go through the TTL cache (`remember`): a hit is served from
//! memory, a miss queries Postgres and populates the cache. Sync runs and
//! lifecycle sweeps invalidate the whole `license*` key space, so reads
//! never observe stale data longer than one TTL after an untracked write.

use axum::extract::{Path, Query, State};
use axum::Json;
use liman_core::cache::{self, ENTITY_TTL, STATS_KEY, STATS_TTL};
use liman_core::error::CoreError;
use liman_core::types::DbId;
use liman_db::models::license::LicenseListQuery;
use liman_db::repositories::LicenseRepo;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/licenses
///
/// Filtered list. Each filter combination caches under its own key.
pub async fn list_licenses(
    State(state): State<AppState>,
    Query(params): Query<LicenseListQuery>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let filters = serde_json::to_string(&params)
        .map_err(|e| AppError::InternalError(format!("Failed to serialize filters: {e}")))?;
    let key = cache::list_key(&filters);

    let data = state
        .cache
        .remember(&key, ENTITY_TTL, || async {
            let rows = LicenseRepo::list(&state.pool, &params).await?;
            serde_json::to_value(rows)
                .map_err(|e| AppError::InternalError(format!("Failed to serialize licenses: {e}")))
        })
        .await?;

    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/licenses/{id}
///
/// Single entity by internal ID. 404 is never cached.
pub async fn get_license(
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let key = cache::license_key(id);

    let data = state
        .cache
        .remember(&key, ENTITY_TTL, || async {
            let license = LicenseRepo::find_by_id(&state.pool, id)
                .await?
                .ok_or(AppError::Core(CoreError::NotFound {
                    entity: "License",
                    id,
                }))?;
            serde_json::to_value(license)
                .map_err(|e| AppError::InternalError(format!("Failed to serialize license: {e}")))
        })
        .await?;

    Ok(Json(DataResponse { data }))
}

/// GET /api/v1/licenses/stats
///
/// Aggregate dashboard counts. Cached longer than entities.
pub async fn license_stats(
    State(state): State<AppState>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let data = state
        .cache
        .remember(STATS_KEY, STATS_TTL, || async {
            let stats = LicenseRepo::stats(&state.pool).await?;
            serde_json::to_value(stats)
                .map_err(|e| AppError::InternalError(format!("Failed to serialize stats: {e}")))
        })
        .await?;

    Ok(Json(DataResponse { data }))
}
