//! Best-effort realtime notifications for dashboard clients.
//!
//! The engine and lifecycle jobs call the notifier at completion points.
//! Delivery is fire-and-forget: no subscribers means the event vanishes,
//! and a serialization failure is logged and swallowed. Notification
//! failures must never fail a sync run.

use std::sync::Arc;

use liman_core::types::{DbId, Timestamp};
use serde::Serialize;

use crate::bus::{EventBus, LicenseEvent, EVENT_DATA_CHANGED, EVENT_SYNC_COMPLETE};

/// Condensed outcome of a sync run, the payload of
/// [`EVENT_SYNC_COMPLETE`].
#[derive(Debug, Clone, Serialize)]
pub struct SyncSummary {
    pub timestamp: Timestamp,
    pub duration_ms: u64,
    pub created: u64,
    pub updated: u64,
    pub failed: u64,
    pub success: bool,
}

/// Emits license pipeline events onto the shared bus.
#[derive(Clone)]
pub struct SyncNotifier {
    bus: Arc<EventBus>,
}

impl SyncNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }

    /// Announce a finished sync run.
    pub fn emit_sync_complete(&self, summary: &SyncSummary) {
        match serde_json::to_value(summary) {
            Ok(payload) => {
                self.bus.publish(
                    LicenseEvent::new(EVENT_SYNC_COMPLETE)
                        .with_source("sync")
                        .with_payload(payload),
                );
            }
            Err(error) => {
                tracing::warn!(%error, "Failed to serialize sync summary, notification dropped");
            }
        }
    }

    /// Announce that license rows changed outside a full sync run.
    pub fn emit_data_changed(&self, source: &str, ids: Vec<DbId>) {
        self.bus.publish(
            LicenseEvent::new(EVENT_DATA_CHANGED)
                .with_source(source)
                .with_payload(serde_json::json!({ "count": ids.len() }))
                .with_license_ids(ids),
        );
    }
}
