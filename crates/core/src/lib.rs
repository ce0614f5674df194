//! Domain logic for the license management back office.
//!
//! This crate holds the pure (or process-local) pieces of the external
//! license synchronization pipeline: record validation, duplicate
//! classification, the in-process TTL cache, and the metrics/alert
//! monitor. No database or network access lives here; the `sync` crate
//! wires these against real I/O.

pub mod bounded;
pub mod cache;
pub mod dedup;
pub mod error;
pub mod monitor;
pub mod types;
pub mod validation;
