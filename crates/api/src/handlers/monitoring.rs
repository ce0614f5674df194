//! Handlers for the `/monitoring` endpoints.
//!
//! These read straight from the in-process [`Monitor`]; no database access.

use axum::extract::{Path, Query, State};
use axum::Json;
use liman_core::monitor::{AlertFilter, AlertSeverity};
use serde::Deserialize;
use serde_json::json;

use crate::error::{AppError, AppResult};
use crate::response::DataResponse;
use crate::state::AppState;

/// Query parameters for the alert feed.
#[derive(Debug, Default, Deserialize)]
pub struct AlertQuery {
    /// Only alerts of this severity (`info`, `warning`, `error`, `critical`).
    pub severity: Option<String>,
    /// Only alerts not yet acknowledged.
    #[serde(default)]
    pub unacknowledged: bool,
}

fn parse_severity(value: &str) -> Result<AlertSeverity, AppError> {
    match value {
        "info" => Ok(AlertSeverity::Info),
        "warning" => Ok(AlertSeverity::Warning),
        "error" => Ok(AlertSeverity::Error),
        "critical" => Ok(AlertSeverity::Critical),
        other => Err(AppError::BadRequest(format!(
            "Unknown severity '{other}' (expected info, warning, error, or critical)"
        ))),
    }
}

/// GET /api/v1/monitoring/metrics
///
/// Full counter/gauge/histogram snapshot.
pub async fn metrics(State(state): State<AppState>) -> Json<DataResponse<serde_json::Value>> {
    let snapshot = state.monitor.metrics();
    Json(DataResponse {
        data: json!(snapshot),
    })
}

/// GET /api/v1/monitoring/alerts
///
/// Bounded alert feed, newest first, optionally filtered.
pub async fn alerts(
    State(state): State<AppState>,
    Query(params): Query<AlertQuery>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    let severity = params
        .severity
        .as_deref()
        .map(parse_severity)
        .transpose()?;

    let filter = AlertFilter {
        severity,
        unacknowledged_only: params.unacknowledged,
    };

    let alerts = state.monitor.alerts(filter);
    Ok(Json(DataResponse {
        data: json!(alerts),
    }))
}

/// POST /api/v1/monitoring/alerts/{id}/acknowledge
///
/// Mark an alert as seen. Unknown IDs return 404.
pub async fn acknowledge_alert(
    State(state): State<AppState>,
    Path(id): Path<u64>,
) -> AppResult<Json<DataResponse<serde_json::Value>>> {
    state.monitor.acknowledge_alert(id)?;

    tracing::info!(alert_id = id, "Alert acknowledged");

    Ok(Json(DataResponse {
        data: json!({ "id": id, "acknowledged": true }),
    }))
}

/// GET /api/v1/monitoring/health
///
/// Condensed performance view, the health evaluation, and cache stats.
pub async fn health(State(state): State<AppState>) -> Json<DataResponse<serde_json::Value>> {
    let performance = state.monitor.performance_summary();
    let report = state.monitor.health_status();
    let cache = state.cache.stats().await;

    Json(DataResponse {
        data: json!({
            "performance": performance,
            "health": report,
            "cache": cache,
        }),
    })
}
