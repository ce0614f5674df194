//! In-process event bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`EventBus`] is the publish/subscribe hub for [`LicenseEvent`]s,
//! shared via `Arc<EventBus>` across the engine, the scheduler, and the
//! WebSocket forwarder.

use chrono::{DateTime, Utc};
use liman_core::types::DbId;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Emitted when a sync run finishes (success or partial failure).
pub const EVENT_SYNC_COMPLETE: &str = "license.sync_complete";

/// Emitted when license rows change outside a full sync run.
pub const EVENT_DATA_CHANGED: &str = "license.data_changed";

// ---------------------------------------------------------------------------
// LicenseEvent
// ---------------------------------------------------------------------------

/// A domain event on the license pipeline.
///
/// Constructed via [`LicenseEvent::new`] and enriched with
/// [`with_source`](LicenseEvent::with_source),
/// [`with_license_ids`](LicenseEvent::with_license_ids), and
/// [`with_payload`](LicenseEvent::with_payload).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LicenseEvent {
    /// Dot-separated event name, e.g. `"license.sync_complete"`.
    pub event_type: String,

    /// Component that produced the event (e.g. `"sync"`, `"lifecycle"`).
    pub source: Option<String>,

    /// Internal license ids the event refers to, when applicable.
    pub license_ids: Vec<DbId>,

    /// Free-form JSON payload carrying event-specific data.
    pub payload: serde_json::Value,

    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl LicenseEvent {
    /// Create a new event with only the required `event_type`.
    pub fn new(event_type: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            source: None,
            license_ids: Vec::new(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    /// Attach the producing component.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Attach the affected license ids.
    pub fn with_license_ids(mut self, ids: Vec<DbId>) -> Self {
        self.license_ids = ids;
        self
    }

    /// Set the JSON payload for the event.
    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// EventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out event bus.
///
/// Wraps a [`broadcast::Sender`] so that any number of subscribers can
/// independently receive every published [`LicenseEvent`].
pub struct EventBus {
    sender: broadcast::Sender<LicenseEvent>,
}

impl EventBus {
    /// Create a bus with a specific channel capacity.
    ///
    /// When the buffer is full, the oldest un-consumed messages are dropped
    /// and slow receivers will observe a `RecvError::Lagged`.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// If there are no active subscribers the event is silently dropped.
    pub fn publish(&self, event: LicenseEvent) {
        // Ignore the SendError — it only means there are zero receivers.
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events published on this bus.
    pub fn subscribe(&self) -> broadcast::Receiver<LicenseEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
