//! Shared response envelope types for API handlers.
//!
//! Read endpoints use a `{ "data": ... }` envelope. Sync trigger endpoints
//! use [`SyncResponse`]: they always return HTTP 200 and carry the run
//! outcome in the body, because a partially failed run is data, not a
//! transport error.

use liman_sync::SyncResult;
use serde::Serialize;

/// Standard `{ "data": T }` response envelope.
#[derive(Debug, Serialize)]
pub struct DataResponse<T: Serialize> {
    pub data: T,
}

/// Envelope for sync trigger endpoints.
#[derive(Debug, Serialize)]
pub struct SyncResponse {
    /// Whether the run finished without a fatal error.
    pub success: bool,
    /// Human-readable outcome, set on rejection or fatal failure.
    pub message: Option<String>,
    /// Full run counters and error list.
    pub data: SyncResult,
}

impl SyncResponse {
    pub fn from_result(result: SyncResult) -> Self {
        Self {
            success: result.success,
            message: result.message.clone(),
            data: result,
        }
    }
}
