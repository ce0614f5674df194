//! Repository for the `licenses` table.
//!
//! Every status literal comes from the named constants in
//! `models::license`. Sync-owned writes go through [`SyncFieldUpdate`];
//! admin-owned columns (`notes`, `seats` after creation) have no write
//! path here besides the initial insert.

use liman_core::types::DbId;
use sqlx::PgPool;

use crate::models::license::{
    License, LicenseListQuery, LicenseStats, NewLicense, SyncFieldUpdate, DEFAULT_LICENSE_TYPE,
    DEFAULT_SEATS, STATUS_ACTIVE, STATUS_EXPIRED, STATUS_GRACE, STATUS_INACTIVE, SYNC_ERROR,
    SYNC_MERGED, SYNC_PENDING, SYNC_REVIEW, SYNC_SYNCED,
};

/// Column list for `licenses` queries.
const COLUMNS: &str = "\
    id, appid, countid, dba, zip, email, \
    license_type, status, seats, \
    monthly_fee, sms_balance, sms_purchased, \
    activated_at, expires_at, grace_until, last_active_at, \
    sync_status, last_synced_at, sync_error, merged_into, notes, \
    created_at, updated_at";

/// Maximum page size for license listing.
const MAX_LIMIT: i64 = 100;

/// Default page size for license listing.
const DEFAULT_LIMIT: i64 = 50;

/// Provides CRUD and sync operations for internal licenses.
pub struct LicenseRepo;

impl LicenseRepo {
    // -----------------------------------------------------------------------
    // Lookups
    // -----------------------------------------------------------------------

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<License>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM licenses WHERE id = $1");
        sqlx::query_as::<_, License>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lookup by external appid. Consolidated-away rows keep their
    /// appid for the audit trail but must never match again.
    pub async fn find_by_appid(
        pool: &PgPool,
        appid: &str,
    ) -> Result<Option<License>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE appid = $1 AND merged_into IS NULL"
        );
        sqlx::query_as::<_, License>(&query)
            .bind(appid)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_countid(
        pool: &PgPool,
        countid: i64,
    ) -> Result<Vec<License>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE countid = $1 AND merged_into IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, License>(&query)
            .bind(countid)
            .fetch_all(pool)
            .await
    }

    /// All rows sharing an email, case-insensitively. Multiple matches
    /// signal a cross-system ambiguity the engine must flag.
    pub async fn find_by_email(pool: &PgPool, email: &str) -> Result<Vec<License>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE LOWER(email) = LOWER($1) AND merged_into IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, License>(&query)
            .bind(email)
            .fetch_all(pool)
            .await
    }

    /// Rows linked to the external system (have an `appid`), excluding
    /// consolidated-away rows. Input to bidirectional push and internal
    /// duplicate scanning.
    pub async fn list_linked(pool: &PgPool) -> Result<Vec<License>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE appid IS NOT NULL AND merged_into IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, License>(&query).fetch_all(pool).await
    }

    /// Rows awaiting their first successful sync.
    pub async fn list_pending(pool: &PgPool) -> Result<Vec<License>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE sync_status = $1 AND merged_into IS NULL \
             ORDER BY id"
        );
        sqlx::query_as::<_, License>(&query)
            .bind(SYNC_PENDING)
            .fetch_all(pool)
            .await
    }

    /// List licenses with optional filters and pagination.
    pub async fn list(
        pool: &PgPool,
        params: &LicenseListQuery,
    ) -> Result<Vec<License>, sqlx::Error> {
        let limit = params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, MAX_LIMIT);
        let offset = params.offset.unwrap_or(0).max(0);

        // Build the WHERE clause and track the next bind parameter index.
        let mut conditions: Vec<String> = vec!["merged_into IS NULL".to_string()];
        let mut bind_idx: u32 = 1;

        if params.status.is_some() {
            conditions.push(format!("status = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.license_type.is_some() {
            conditions.push(format!("license_type = ${bind_idx}"));
            bind_idx += 1;
        }
        if params.sync_status.is_some() {
            conditions.push(format!("sync_status = ${bind_idx}"));
            bind_idx += 1;
        }

        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE {} \
             ORDER BY id \
             LIMIT ${bind_idx} OFFSET ${}",
            conditions.join(" AND "),
            bind_idx + 1,
        );

        let mut q = sqlx::query_as::<_, License>(&query);
        if let Some(status) = &params.status {
            q = q.bind(status);
        }
        if let Some(license_type) = &params.license_type {
            q = q.bind(license_type);
        }
        if let Some(sync_status) = &params.sync_status {
            q = q.bind(sync_status);
        }
        q = q.bind(limit).bind(offset);

        q.fetch_all(pool).await
    }

    /// Aggregate counts for the stats endpoint.
    pub async fn stats(pool: &PgPool) -> Result<LicenseStats, sqlx::Error> {
        sqlx::query_as::<_, LicenseStats>(
            "SELECT \
                 COUNT(*) FILTER (WHERE merged_into IS NULL) AS total, \
                 COUNT(*) FILTER (WHERE status = $1 AND merged_into IS NULL) AS active, \
                 COUNT(*) FILTER (WHERE status = $2 AND merged_into IS NULL) AS inactive, \
                 COUNT(*) FILTER (WHERE status = $3 AND merged_into IS NULL) AS expired, \
                 COUNT(*) FILTER (WHERE status = $4 AND merged_into IS NULL) AS grace, \
                 COUNT(*) FILTER (WHERE sync_status = $5 AND merged_into IS NULL) AS pending_sync, \
                 COUNT(*) FILTER (WHERE sync_status = $6 AND merged_into IS NULL) AS flagged_for_review \
             FROM licenses",
        )
        .bind(STATUS_ACTIVE)
        .bind(STATUS_INACTIVE)
        .bind(STATUS_EXPIRED)
        .bind(STATUS_GRACE)
        .bind(SYNC_PENDING)
        .bind(SYNC_REVIEW)
        .fetch_one(pool)
        .await
    }

    // -----------------------------------------------------------------------
    // Sync writes
    // -----------------------------------------------------------------------

    /// Create a license from an external record, applying defaults for
    /// seats and license type.
    pub async fn insert(pool: &PgPool, input: &NewLicense) -> Result<License, sqlx::Error> {
        let query = format!(
            "INSERT INTO licenses \
                 (appid, countid, dba, zip, email, license_type, status, seats, \
                  monthly_fee, sms_balance, sms_purchased, \
                  activated_at, expires_at, last_active_at, \
                  sync_status, last_synced_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, NOW()) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, License>(&query)
            .bind(&input.appid)
            .bind(input.countid)
            .bind(&input.dba)
            .bind(&input.zip)
            .bind(&input.email)
            .bind(
                input
                    .license_type
                    .as_deref()
                    .unwrap_or(DEFAULT_LICENSE_TYPE),
            )
            .bind(input.status.as_deref().unwrap_or(STATUS_INACTIVE))
            .bind(input.seats.unwrap_or(DEFAULT_SEATS))
            .bind(input.monthly_fee)
            .bind(input.sms_balance)
            .bind(input.sms_purchased)
            .bind(input.activated_at)
            .bind(input.expires_at)
            .bind(input.last_active_at)
            .bind(SYNC_SYNCED)
            .fetch_one(pool)
            .await
    }

    /// Apply a selective sync-field update. Only `Some` fields are
    /// written; the row's sync bookkeeping (`sync_status`, `last_synced_at`,
    /// `sync_error`) is refreshed regardless.
    pub async fn update_sync_fields(
        pool: &PgPool,
        id: DbId,
        update: &SyncFieldUpdate,
    ) -> Result<License, sqlx::Error> {
        let mut sets: Vec<String> = Vec::new();
        let mut bind_idx: u32 = 2; // $1 is the id

        macro_rules! push_set {
            ($field:ident, $column:literal) => {
                if update.$field.is_some() {
                    sets.push(format!(concat!($column, " = ${}"), bind_idx));
                    bind_idx += 1;
                }
            };
        }

        push_set!(countid, "countid");
        push_set!(dba, "dba");
        push_set!(zip, "zip");
        push_set!(email, "email");
        push_set!(license_type, "license_type");
        push_set!(status, "status");
        push_set!(monthly_fee, "monthly_fee");
        push_set!(sms_balance, "sms_balance");
        push_set!(sms_purchased, "sms_purchased");
        push_set!(activated_at, "activated_at");
        push_set!(expires_at, "expires_at");
        push_set!(last_active_at, "last_active_at");
        let _ = bind_idx;

        sets.push(format!("sync_status = '{SYNC_SYNCED}'"));
        sets.push("last_synced_at = NOW()".to_string());
        sets.push("sync_error = NULL".to_string());
        sets.push("updated_at = NOW()".to_string());

        let query = format!(
            "UPDATE licenses SET {} WHERE id = $1 RETURNING {COLUMNS}",
            sets.join(", "),
        );

        let mut q = sqlx::query_as::<_, License>(&query).bind(id);
        if let Some(countid) = update.countid {
            q = q.bind(countid);
        }
        if let Some(dba) = &update.dba {
            q = q.bind(dba);
        }
        if let Some(zip) = &update.zip {
            q = q.bind(zip);
        }
        if let Some(email) = &update.email {
            q = q.bind(email);
        }
        if let Some(license_type) = &update.license_type {
            q = q.bind(license_type);
        }
        if let Some(status) = &update.status {
            q = q.bind(status);
        }
        if let Some(monthly_fee) = update.monthly_fee {
            q = q.bind(monthly_fee);
        }
        if let Some(sms_balance) = update.sms_balance {
            q = q.bind(sms_balance);
        }
        if let Some(sms_purchased) = update.sms_purchased {
            q = q.bind(sms_purchased);
        }
        if let Some(activated_at) = update.activated_at {
            q = q.bind(activated_at);
        }
        if let Some(expires_at) = update.expires_at {
            q = q.bind(expires_at);
        }
        if let Some(last_active_at) = update.last_active_at {
            q = q.bind(last_active_at);
        }

        q.fetch_one(pool).await
    }

    /// Attach the external linkage to an existing row (match by email or
    /// countid where the internal row had no `appid` yet).
    pub async fn link_external(
        pool: &PgPool,
        id: DbId,
        appid: &str,
        countid: i64,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE licenses \
             SET appid = $2, countid = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(appid)
        .bind(countid)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Record a per-record sync failure without touching data fields.
    pub async fn mark_sync_error(
        pool: &PgPool,
        id: DbId,
        error: &str,
    ) -> Result<(), sqlx::Error> {
        sqlx::query(
            "UPDATE licenses \
             SET sync_status = $2, sync_error = $3, updated_at = NOW() \
             WHERE id = $1",
        )
        .bind(id)
        .bind(SYNC_ERROR)
        .bind(error)
        .execute(pool)
        .await?;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Duplicate handling
    // -----------------------------------------------------------------------

    /// Consolidate internal duplicates into a survivor. Merged rows are
    /// deactivated and point at the survivor; their data is retained for
    /// audit. Returns the number of rows merged.
    pub async fn consolidate(
        pool: &PgPool,
        survivor_id: DbId,
        merged_ids: &[DbId],
    ) -> Result<u64, sqlx::Error> {
        if merged_ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE licenses \
             SET status = $2, sync_status = $3, merged_into = $4, updated_at = NOW() \
             WHERE id = ANY($1) AND id <> $4",
        )
        .bind(merged_ids)
        .bind(STATUS_INACTIVE)
        .bind(SYNC_MERGED)
        .bind(survivor_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Flag rows for manual review. Used for cross-system ambiguities,
    /// which must never be auto-merged.
    pub async fn flag_for_review(
        pool: &PgPool,
        ids: &[DbId],
        reason: &str,
    ) -> Result<u64, sqlx::Error> {
        if ids.is_empty() {
            return Ok(0);
        }
        let result = sqlx::query(
            "UPDATE licenses \
             SET sync_status = $2, sync_error = $3, updated_at = NOW() \
             WHERE id = ANY($1)",
        )
        .bind(ids)
        .bind(SYNC_REVIEW)
        .bind(reason)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    // -----------------------------------------------------------------------
    // Lifecycle sweeps
    // -----------------------------------------------------------------------

    /// Move active licenses past their expiry into the grace period.
    /// Returns the affected ids.
    pub async fn begin_grace(
        pool: &PgPool,
        grace_days: i64,
    ) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> = sqlx::query_as(
            "UPDATE licenses \
             SET status = $1, grace_until = NOW() + make_interval(days => $2::int), \
                 updated_at = NOW() \
             WHERE status = $3 AND expires_at IS NOT NULL AND expires_at < NOW() \
             RETURNING id",
        )
        .bind(STATUS_GRACE)
        .bind(grace_days)
        .bind(STATUS_ACTIVE)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Expire licenses whose grace period has lapsed. Returns the
    /// affected ids.
    pub async fn expire_lapsed(pool: &PgPool) -> Result<Vec<DbId>, sqlx::Error> {
        let rows: Vec<(DbId,)> = sqlx::query_as(
            "UPDATE licenses \
             SET status = $1, updated_at = NOW() \
             WHERE status = $2 AND grace_until IS NOT NULL AND grace_until < NOW() \
             RETURNING id",
        )
        .bind(STATUS_EXPIRED)
        .bind(STATUS_GRACE)
        .fetch_all(pool)
        .await?;
        Ok(rows.into_iter().map(|(id,)| id).collect())
    }

    /// Active licenses expiring within the reminder window.
    pub async fn expiring_within(
        pool: &PgPool,
        days: i64,
    ) -> Result<Vec<License>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM licenses \
             WHERE status = $1 \
               AND expires_at IS NOT NULL \
               AND expires_at BETWEEN NOW() AND NOW() + make_interval(days => $2::int) \
             ORDER BY expires_at"
        );
        sqlx::query_as::<_, License>(&query)
            .bind(STATUS_ACTIVE)
            .bind(days)
            .fetch_all(pool)
            .await
    }
}
