//! HTTP handler functions, grouped by resource.

pub mod licenses;
pub mod monitoring;
pub mod sync;
