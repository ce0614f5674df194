//! Per-run outcome reporting.

use chrono::Utc;
use liman_core::types::Timestamp;
use serde::Serialize;

/// Value object summarizing one engine run. Returned by every sync
/// entry point regardless of outcome; partial failure is data here,
/// never an HTTP error.
#[derive(Debug, Clone, Serialize)]
pub struct SyncResult {
    pub total_fetched: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    /// Per-record and per-page error messages, in encounter order.
    pub errors: Vec<String>,
    pub external_duplicates: u64,
    pub internal_duplicates: u64,
    pub cross_system_duplicates: u64,
    pub consolidated: u64,
    pub flagged_for_review: u64,
    /// Records pushed back to the external system (bidirectional runs).
    pub pushed: u64,
    pub duration_ms: u64,
    pub timestamp: Timestamp,
    /// False only when the run aborted on a fatal error or never started.
    pub success: bool,
    pub dry_run: bool,
    pub message: Option<String>,
}

impl SyncResult {
    pub fn new(dry_run: bool) -> Self {
        Self {
            total_fetched: 0,
            created: 0,
            updated: 0,
            failed: 0,
            errors: Vec::new(),
            external_duplicates: 0,
            internal_duplicates: 0,
            cross_system_duplicates: 0,
            consolidated: 0,
            flagged_for_review: 0,
            pushed: 0,
            duration_ms: 0,
            timestamp: Utc::now(),
            success: true,
            dry_run,
            message: None,
        }
    }

    /// Outcome returned when a trigger arrives while a run is already
    /// in flight. Nothing was fetched or written.
    pub fn already_running() -> Self {
        let mut result = Self::new(false);
        result.success = false;
        result.message = Some("A sync run is already in progress".to_string());
        result
    }

    /// Fraction of fetched records that failed.
    pub fn error_rate(&self) -> f64 {
        if self.total_fetched == 0 {
            0.0
        } else {
            self.failed as f64 / self.total_fetched as f64
        }
    }
}

/// Snapshot served by the sync status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct SyncStatus {
    pub sync_in_progress: bool,
    pub last_result: Option<SyncResult>,
}
