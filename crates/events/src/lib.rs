//! Realtime event infrastructure for the license pipeline.
//!
//! - [`EventBus`] — in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`LicenseEvent`] — the canonical event envelope.
//! - [`SyncNotifier`] — best-effort emitter used by the sync engine and
//!   lifecycle jobs. Delivery is fire-and-forget by contract.

pub mod bus;
pub mod notifier;

pub use bus::{EventBus, LicenseEvent, EVENT_DATA_CHANGED, EVENT_SYNC_COMPLETE};
pub use notifier::{SyncNotifier, SyncSummary};
