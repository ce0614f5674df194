//! License entity models and DTOs for the internal system of record.

use liman_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ---------------------------------------------------------------------------
// Status vocabularies
// ---------------------------------------------------------------------------

/// Internal license status values. The external source only knows 0/1;
/// `expired` and `grace` are produced by the lifecycle jobs.
pub const STATUS_ACTIVE: &str = "active";
pub const STATUS_INACTIVE: &str = "inactive";
pub const STATUS_EXPIRED: &str = "expired";
pub const STATUS_GRACE: &str = "grace";

/// Sync state of a row relative to the external system.
pub const SYNC_PENDING: &str = "pending";
pub const SYNC_SYNCED: &str = "synced";
pub const SYNC_ERROR: &str = "error";
/// Flagged for manual review (cross-system ambiguity). Never auto-resolved.
pub const SYNC_REVIEW: &str = "review";
/// Absorbed into another row by duplicate consolidation.
pub const SYNC_MERGED: &str = "merged";

/// Seat count applied when the external record carries none.
pub const DEFAULT_SEATS: i32 = 1;

/// License type applied when the external record carries none.
pub const DEFAULT_LICENSE_TYPE: &str = "standard";

/// Map the external 0/1 status convention to the internal vocabulary.
pub fn status_from_external(external: i64) -> &'static str {
    if external == 1 {
        STATUS_ACTIVE
    } else {
        STATUS_INACTIVE
    }
}

/// Map an internal status back to the external 0/1 convention. Grace and
/// expired both read as inactive externally.
pub fn status_to_external(status: &str) -> i16 {
    if status == STATUS_ACTIVE {
        1
    } else {
        0
    }
}

// ---------------------------------------------------------------------------
// Entities and DTOs
// ---------------------------------------------------------------------------

/// A row from the `licenses` table.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct License {
    pub id: DbId,
    /// External application identifier, unique when present.
    pub appid: Option<String>,
    /// External numeric key.
    pub countid: Option<i64>,
    pub dba: Option<String>,
    pub zip: Option<String>,
    pub email: Option<String>,
    pub license_type: String,
    pub status: String,
    pub seats: i32,
    pub monthly_fee: Option<f64>,
    pub sms_balance: Option<i64>,
    pub sms_purchased: Option<i64>,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    /// End of the grace period entered when `expires_at` passes.
    pub grace_until: Option<Timestamp>,
    pub last_active_at: Option<Timestamp>,
    pub sync_status: String,
    pub last_synced_at: Option<Timestamp>,
    pub sync_error: Option<String>,
    /// Consolidation target when this row was merged away.
    pub merged_into: Option<DbId>,
    /// Admin-owned free text. Never written by sync.
    pub notes: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Insert payload for a license created from an external record.
#[derive(Debug, Clone, Default)]
pub struct NewLicense {
    pub appid: Option<String>,
    pub countid: Option<i64>,
    pub dba: Option<String>,
    pub zip: Option<String>,
    pub email: Option<String>,
    pub license_type: Option<String>,
    pub status: Option<String>,
    pub seats: Option<i32>,
    pub monthly_fee: Option<f64>,
    pub sms_balance: Option<i64>,
    pub sms_purchased: Option<i64>,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub last_active_at: Option<Timestamp>,
}

/// Selective update of sync-owned fields. `None` leaves the column
/// untouched; admin-owned fields (`notes`, `seats` once set) have no
/// counterpart here and can never be overwritten by a sync run.
#[derive(Debug, Clone, Default)]
pub struct SyncFieldUpdate {
    pub countid: Option<i64>,
    pub dba: Option<String>,
    pub zip: Option<String>,
    pub email: Option<String>,
    pub license_type: Option<String>,
    pub status: Option<String>,
    pub monthly_fee: Option<f64>,
    pub sms_balance: Option<i64>,
    pub sms_purchased: Option<i64>,
    pub activated_at: Option<Timestamp>,
    pub expires_at: Option<Timestamp>,
    pub last_active_at: Option<Timestamp>,
}

impl SyncFieldUpdate {
    /// Whether the update carries any field at all.
    pub fn is_empty(&self) -> bool {
        self.countid.is_none()
            && self.dba.is_none()
            && self.zip.is_none()
            && self.email.is_none()
            && self.license_type.is_none()
            && self.status.is_none()
            && self.monthly_fee.is_none()
            && self.sms_balance.is_none()
            && self.sms_purchased.is_none()
            && self.activated_at.is_none()
            && self.expires_at.is_none()
            && self.last_active_at.is_none()
    }
}

/// Query parameters for `GET /api/v1/licenses`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct LicenseListQuery {
    pub status: Option<String>,
    pub license_type: Option<String>,
    pub sync_status: Option<String>,
    /// Maximum number of results. Defaults to 50, capped at 100.
    pub limit: Option<i64>,
    /// Number of results to skip. Defaults to 0.
    pub offset: Option<i64>,
}

/// Aggregate counts backing the `licenses:stats` cache entry.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct LicenseStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub expired: i64,
    pub grace: i64,
    pub pending_sync: i64,
    pub flagged_for_review: i64,
}
