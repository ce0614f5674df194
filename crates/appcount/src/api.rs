//! Trait seam between the sync engine and the external API.

use async_trait::async_trait;
use liman_core::validation::ExternalLicenseRecord;

use crate::client::AppCountError;

/// One page of external license records.
#[derive(Debug, Clone, Default)]
pub struct LicensePage {
    pub records: Vec<ExternalLicenseRecord>,
    /// Whether another page should be requested after this one.
    pub has_more: bool,
}

/// Read/write access to the external licensing system.
///
/// The engine only ever talks to this trait; the production
/// implementation is [`crate::AppCountClient`].
#[async_trait]
pub trait ExternalLicenseApi: Send + Sync {
    /// Fetch a page of license records.
    async fn fetch_page(&self, offset: u32, limit: u32) -> Result<LicensePage, AppCountError>;

    /// Fetch a single record by its external application id. `Ok(None)`
    /// when the external system has no such record.
    async fn fetch_by_appid(
        &self,
        appid: &str,
    ) -> Result<Option<ExternalLicenseRecord>, AppCountError>;

    /// Push internal field values back to the external system.
    async fn push_update(
        &self,
        appid: &str,
        payload: &serde_json::Value,
    ) -> Result<(), AppCountError>;
}
