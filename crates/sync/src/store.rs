//! Persistence seam between the engine and the database.
//!
//! The engine only talks to [`LicenseStore`], so its reconciliation
//! logic can be exercised against an in-memory implementation. The
//! production implementation delegates to `liman_db::LicenseRepo`.

use async_trait::async_trait;
use liman_core::types::DbId;
use liman_db::models::license::{License, NewLicense, SyncFieldUpdate};
use liman_db::repositories::LicenseRepo;
use liman_db::DbPool;

/// Errors surfaced by a license store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Store error: {0}")]
    Internal(String),
}

/// Internal license persistence as the engine sees it.
#[async_trait]
pub trait LicenseStore: Send + Sync {
    async fn find_by_appid(&self, appid: &str) -> Result<Option<License>, StoreError>;

    /// All non-merged rows sharing an email, case-insensitively.
    async fn find_by_email(&self, email: &str) -> Result<Vec<License>, StoreError>;

    async fn find_by_countid(&self, countid: i64) -> Result<Vec<License>, StoreError>;

    async fn insert(&self, input: &NewLicense) -> Result<License, StoreError>;

    async fn update_sync_fields(
        &self,
        id: DbId,
        update: &SyncFieldUpdate,
    ) -> Result<License, StoreError>;

    async fn link_external(&self, id: DbId, appid: &str, countid: i64)
        -> Result<(), StoreError>;

    async fn mark_sync_error(&self, id: DbId, error: &str) -> Result<(), StoreError>;

    /// Non-merged rows carrying external linkage.
    async fn list_linked(&self) -> Result<Vec<License>, StoreError>;

    /// Rows awaiting their first successful sync.
    async fn list_pending(&self) -> Result<Vec<License>, StoreError>;

    async fn consolidate(&self, survivor_id: DbId, merged_ids: &[DbId])
        -> Result<u64, StoreError>;

    async fn flag_for_review(&self, ids: &[DbId], reason: &str) -> Result<u64, StoreError>;
}

/// Postgres-backed store used in production.
pub struct PgLicenseStore {
    pool: DbPool,
}

impl PgLicenseStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LicenseStore for PgLicenseStore {
    async fn find_by_appid(&self, appid: &str) -> Result<Option<License>, StoreError> {
        Ok(LicenseRepo::find_by_appid(&self.pool, appid).await?)
    }

    async fn find_by_email(&self, email: &str) -> Result<Vec<License>, StoreError> {
        Ok(LicenseRepo::find_by_email(&self.pool, email).await?)
    }

    async fn find_by_countid(&self, countid: i64) -> Result<Vec<License>, StoreError> {
        Ok(LicenseRepo::find_by_countid(&self.pool, countid).await?)
    }

    async fn insert(&self, input: &NewLicense) -> Result<License, StoreError> {
        Ok(LicenseRepo::insert(&self.pool, input).await?)
    }

    async fn update_sync_fields(
        &self,
        id: DbId,
        update: &SyncFieldUpdate,
    ) -> Result<License, StoreError> {
        Ok(LicenseRepo::update_sync_fields(&self.pool, id, update).await?)
    }

    async fn link_external(
        &self,
        id: DbId,
        appid: &str,
        countid: i64,
    ) -> Result<(), StoreError> {
        Ok(LicenseRepo::link_external(&self.pool, id, appid, countid).await?)
    }

    async fn mark_sync_error(&self, id: DbId, error: &str) -> Result<(), StoreError> {
        Ok(LicenseRepo::mark_sync_error(&self.pool, id, error).await?)
    }

    async fn list_linked(&self) -> Result<Vec<License>, StoreError> {
        Ok(LicenseRepo::list_linked(&self.pool).await?)
    }

    async fn list_pending(&self) -> Result<Vec<License>, StoreError> {
        Ok(LicenseRepo::list_pending(&self.pool).await?)
    }

    async fn consolidate(
        &self,
        survivor_id: DbId,
        merged_ids: &[DbId],
    ) -> Result<u64, StoreError> {
        Ok(LicenseRepo::consolidate(&self.pool, survivor_id, merged_ids).await?)
    }

    async fn flag_for_review(&self, ids: &[DbId], reason: &str) -> Result<u64, StoreError> {
        Ok(LicenseRepo::flag_for_review(&self.pool, ids, reason).await?)
    }
}
