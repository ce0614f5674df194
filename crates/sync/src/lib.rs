//! Reconciliation engine and scheduling for the license pipeline.
//!
//! [`engine::SyncEngine`] pulls external records, validates them,
//! matches them against the internal store, and applies creates/updates
//! plus duplicate handling. [`scheduler::Scheduler`] drives the engine
//! and the lifecycle sweeps on fixed intervals.

pub mod engine;
pub mod lifecycle;
pub mod options;
pub mod result;
pub mod scheduler;
pub mod store;

pub use engine::SyncEngine;
pub use lifecycle::LifecycleJobs;
pub use options::SyncOptions;
pub use result::{SyncResult, SyncStatus};
pub use scheduler::{Scheduler, SchedulerConfig};
pub use store::{LicenseStore, PgLicenseStore, StoreError};
