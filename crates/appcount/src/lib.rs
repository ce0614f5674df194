//! Client for AppCount, the external licensing system of record.
//!
//! [`client::AppCountClient`] is the concrete reqwest-backed client;
//! [`api::ExternalLicenseApi`] is the seam the sync engine consumes, so
//! tests can substitute a scripted implementation.

pub mod api;
pub mod client;

pub use api::{ExternalLicenseApi, LicensePage};
pub use client::{AppCountClient, AppCountConfig, AppCountError};
