//! Reconciliation engine: pull, validate, match, apply.
//!
//! One [`SyncEngine`] instance is shared across the HTTP layer and the
//! scheduler. A run-level guard keeps runs mutually exclusive: a trigger
//! arriving mid-run gets an "already running" result back instead of a
//! second concurrent run.
//!
//! Error posture per category:
//! - validation failure: the record is counted as failed and excluded,
//!   the batch continues;
//! - transient page fetch failure: recorded as a run error plus a
//!   warning alert, the next page is attempted;
//! - authentication failure or connectivity loss: the run aborts with
//!   partial results and `success = false`;
//! - per-record persistence failure: counted as failed, the batch
//!   continues;
//! - cross-system ambiguity: flagged for manual review, never
//!   auto-merged.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use liman_appcount::ExternalLicenseApi;
use liman_core::cache::{TtlCache, ALL_LICENSE_KEYS};
use liman_core::dedup::{analyze_duplicates, find_internal_duplicates, InternalRecordView};
use liman_core::monitor::{process_rss_bytes, AlertSeverity, ApiErrorKind, Monitor};
use liman_core::validation::{
    validate_license, validate_licenses, ExternalLicenseRecord, SanitizedLicenseRecord,
    ValidationOptions,
};
use liman_db::models::license::{
    status_from_external, status_to_external, License, NewLicense, SyncFieldUpdate,
};
use liman_events::{SyncNotifier, SyncSummary};
use tokio::sync::RwLock;

use crate::options::SyncOptions;
use crate::result::{SyncResult, SyncStatus};
use crate::store::{LicenseStore, StoreError};

/// Consecutive page failures treated as connectivity loss.
const MAX_CONSECUTIVE_PAGE_FAILURES: u32 = 3;

/// Orchestrates one reconciliation pass against the external system.
pub struct SyncEngine {
    api: Arc<dyn ExternalLicenseApi>,
    store: Arc<dyn LicenseStore>,
    cache: Arc<TtlCache>,
    monitor: Arc<Monitor>,
    notifier: SyncNotifier,
    /// Configured per-request timeout of the API client, used for the
    /// monitor's slow-request threshold.
    api_timeout: Duration,
    running: AtomicBool,
    last_result: RwLock<Option<SyncResult>>,
}

/// Releases the run guard when the run scope ends, even on panic.
struct RunGuard<'a>(&'a AtomicBool);

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

impl SyncEngine {
    pub fn new(
        api: Arc<dyn ExternalLicenseApi>,
        store: Arc<dyn LicenseStore>,
        cache: Arc<TtlCache>,
        monitor: Arc<Monitor>,
        notifier: SyncNotifier,
        api_timeout: Duration,
    ) -> Self {
        Self {
            api,
            store,
            cache,
            monitor,
            notifier,
            api_timeout,
            running: AtomicBool::new(false),
            last_result: RwLock::new(None),
        }
    }

    /// Whether a run is currently in flight.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Snapshot for the status endpoints.
    pub async fn status(&self) -> SyncStatus {
        SyncStatus {
            sync_in_progress: self.is_running(),
            last_result: self.last_result.read().await.clone(),
        }
    }

    fn try_begin(&self) -> Option<RunGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(&self.running))
    }

    // -----------------------------------------------------------------------
    // Entry points
    // -----------------------------------------------------------------------

    /// Run a full reconciliation pass.
    pub async fn execute(&self, options: &SyncOptions) -> SyncResult {
        let Some(_guard) = self.try_begin() else {
            tracing::warn!("Sync trigger rejected, a run is already in progress");
            return SyncResult::already_running();
        };

        let started = Instant::now();
        self.monitor.record_sync_start();
        tracing::info!(
            dry_run = options.dry_run,
            batch_size = options.effective_batch_size(),
            bidirectional = options.bidirectional,
            "Starting sync run"
        );

        let mut result = SyncResult::new(options.dry_run);

        // Fetch. A fatal error leaves partial records for reporting only.
        let (records, aborted) = self.fetch_all(options.effective_batch_size(), &mut result).await;

        let mut flagged_countids: HashSet<i64> = HashSet::new();
        let mut valid: Vec<SanitizedLicenseRecord> = Vec::new();

        if !aborted {
            // Validate.
            let report = validate_licenses(&records, &ValidationOptions::default());
            if report.invalid > 0 {
                self.monitor.record_validation_error(report.invalid as u64);
                result.failed += report.invalid as u64;
                result.errors.extend(report.errors.clone());
            }
            valid = report.valid_licenses;

            // Match and apply.
            for record in &valid {
                if let Err(error) = self
                    .reconcile_record(record, options, &mut result, &mut flagged_countids)
                    .await
                {
                    result.failed += 1;
                    result
                        .errors
                        .push(format!("countid {}: {error}", record.countid));
                    tracing::warn!(countid = record.countid, %error, "Record reconciliation failed");
                }
            }

            // Duplicate analysis and consolidation.
            if options.comprehensive || options.detect_duplicates {
                if let Err(error) = self
                    .handle_duplicates(&valid, options, &mut result, &flagged_countids)
                    .await
                {
                    result.errors.push(format!("Duplicate handling: {error}"));
                }
            }

            // Writeback.
            if options.bidirectional && !options.dry_run {
                self.push_linked(&mut result).await;
            }
        }

        self.finish_run(result, started, options.dry_run).await
    }

    /// Sync a single record by its external application id.
    pub async fn sync_by_appid(&self, appid: &str) -> SyncResult {
        let Some(_guard) = self.try_begin() else {
            return SyncResult::already_running();
        };

        let started = Instant::now();
        self.monitor.record_sync_start();
        let options = SyncOptions::default();
        let mut result = SyncResult::new(false);
        let mut flagged = HashSet::new();

        let call_started = Instant::now();
        match self.api.fetch_by_appid(appid).await {
            Ok(Some(record)) => {
                self.monitor
                    .record_api_request(call_started.elapsed(), self.api_timeout);
                result.total_fetched = 1;
                self.reconcile_raw(&record, &options, &mut result, &mut flagged)
                    .await;
            }
            Ok(None) => {
                self.monitor
                    .record_api_request(call_started.elapsed(), self.api_timeout);
                result.success = false;
                result.message = Some(format!("No external record for appid {appid}"));
            }
            Err(error) => {
                self.monitor.record_api_error(error.kind());
                result.success = false;
                result.errors.push(format!("appid {appid}: {error}"));
            }
        }

        self.finish_run(result, started, false).await
    }

    /// Sync every internal record still flagged as pending.
    pub async fn sync_pending(&self) -> SyncResult {
        let Some(_guard) = self.try_begin() else {
            return SyncResult::already_running();
        };

        let started = Instant::now();
        self.monitor.record_sync_start();
        let options = SyncOptions::default();
        let mut result = SyncResult::new(false);
        let mut flagged = HashSet::new();

        let pending = match self.store.list_pending().await {
            Ok(rows) => rows,
            Err(error) => {
                result.success = false;
                result.errors.push(format!("Listing pending records: {error}"));
                return self.finish_run(result, started, false).await;
            }
        };

        for row in pending {
            let Some(appid) = row.appid.clone() else {
                result.failed += 1;
                result
                    .errors
                    .push(format!("license {}: no appid, cannot sync", row.id));
                continue;
            };

            match self.api.fetch_by_appid(&appid).await {
                Ok(Some(record)) => {
                    result.total_fetched += 1;
                    self.reconcile_raw(&record, &options, &mut result, &mut flagged)
                        .await;
                }
                Ok(None) => {
                    result.failed += 1;
                    result
                        .errors
                        .push(format!("license {}: no external record for appid {appid}", row.id));
                    if let Err(error) = self
                        .store
                        .mark_sync_error(row.id, "no external record")
                        .await
                    {
                        result.errors.push(format!("license {}: {error}", row.id));
                    }
                }
                Err(error) => {
                    self.monitor.record_api_error(error.kind());
                    result.failed += 1;
                    result.errors.push(format!("appid {appid}: {error}"));
                    if error.is_fatal() {
                        result.success = false;
                        break;
                    }
                }
            }
        }

        self.finish_run(result, started, false).await
    }

    // -----------------------------------------------------------------------
    // Fetch
    // -----------------------------------------------------------------------

    /// Fetch all pages. Returns the collected records and whether the
    /// run aborted on a fatal error.
    async fn fetch_all(
        &self,
        batch_size: u32,
        result: &mut SyncResult,
    ) -> (Vec<ExternalLicenseRecord>, bool) {
        let mut records = Vec::new();
        let mut offset: u32 = 0;
        let mut page_index: u32 = 1;
        let mut consecutive_failures: u32 = 0;

        loop {
            let call_started = Instant::now();
            match self.api.fetch_page(offset, batch_size).await {
                Ok(page) => {
                    self.monitor
                        .record_api_request(call_started.elapsed(), self.api_timeout);
                    consecutive_failures = 0;
                    result.total_fetched += page.records.len() as u64;
                    records.extend(page.records);
                    if !page.has_more {
                        break;
                    }
                }
                Err(error) => {
                    self.monitor.record_api_error(error.kind());

                    // A network failure on the very first page means the
                    // external system is unreachable, not flaky.
                    let fatal = error.is_fatal()
                        || (page_index == 1 && error.kind() == ApiErrorKind::Network);
                    if fatal {
                        result.success = false;
                        result
                            .errors
                            .push(format!("Fatal fetch error on page {page_index}: {error}"));
                        self.monitor.create_alert(
                            AlertSeverity::Error,
                            "sync_fetch_fatal",
                            error.to_string(),
                        );
                        return (records, true);
                    }

                    consecutive_failures += 1;
                    result
                        .errors
                        .push(format!("Skipped page {page_index} (offset {offset}): {error}"));
                    self.monitor.create_alert(
                        AlertSeverity::Warning,
                        "sync_page_failure",
                        format!("page {page_index}: {error}"),
                    );

                    if consecutive_failures >= MAX_CONSECUTIVE_PAGE_FAILURES {
                        result.success = false;
                        result.errors.push(format!(
                            "Aborting fetch after {consecutive_failures} consecutive page failures"
                        ));
                        return (records, true);
                    }
                }
            }
            offset += batch_size;
            page_index += 1;
        }

        (records, false)
    }

    // -----------------------------------------------------------------------
    // Matching and applying
    // -----------------------------------------------------------------------

    /// Validate a raw record and reconcile it, folding failures into the
    /// result. Used by the single-record entry points.
    async fn reconcile_raw(
        &self,
        record: &ExternalLicenseRecord,
        options: &SyncOptions,
        result: &mut SyncResult,
        flagged: &mut HashSet<i64>,
    ) {
        let outcome = validate_license(record, &ValidationOptions::default());
        let Some(sanitized) = outcome.sanitized else {
            self.monitor.record_validation_error(1);
            result.failed += 1;
            result.errors.extend(outcome.errors);
            return;
        };
        if let Err(error) = self
            .reconcile_record(&sanitized, options, result, flagged)
            .await
        {
            result.failed += 1;
            result
                .errors
                .push(format!("countid {}: {error}", sanitized.countid));
        }
    }

    /// Match one sanitized record against the store and apply exactly one
    /// of create/update, or flag an ambiguity.
    async fn reconcile_record(
        &self,
        record: &SanitizedLicenseRecord,
        options: &SyncOptions,
        result: &mut SyncResult,
        flagged: &mut HashSet<i64>,
    ) -> Result<(), StoreError> {
        // 1. Exact match by appid.
        if let Some(appid) = &record.appid {
            if let Some(existing) = self.store.find_by_appid(appid).await? {
                return self.apply_update(&existing, record, options, result).await;
            }
        }

        // 2. Match by email; more than one hit is a cross-system
        //    ambiguity and must not be auto-resolved.
        if let Some(email) = &record.email {
            let matches = self.store.find_by_email(email).await?;
            match matches.len() {
                0 => {}
                1 => {
                    self.link_if_needed(&matches[0], record, options).await?;
                    return self.apply_update(&matches[0], record, options, result).await;
                }
                _ => {
                    return self.flag_ambiguity(record, &matches, options, result, flagged).await;
                }
            }
        }

        // 3. Match by countid.
        let matches = self.store.find_by_countid(record.countid).await?;
        match matches.len() {
            0 => {}
            1 => {
                self.link_if_needed(&matches[0], record, options).await?;
                return self.apply_update(&matches[0], record, options, result).await;
            }
            _ => {
                return self.flag_ambiguity(record, &matches, options, result, flagged).await;
            }
        }

        // 4. No match: create.
        if !options.dry_run {
            self.store.insert(&new_license_from(record)).await?;
            self.monitor.record_database_operation("insert");
        }
        result.created += 1;
        Ok(())
    }

    /// Attach external keys to a row matched by email or countid.
    async fn link_if_needed(
        &self,
        existing: &License,
        record: &SanitizedLicenseRecord,
        options: &SyncOptions,
    ) -> Result<(), StoreError> {
        if options.dry_run || existing.appid.is_some() {
            return Ok(());
        }
        if let Some(appid) = &record.appid {
            self.store
                .link_external(existing.id, appid, record.countid)
                .await?;
        }
        Ok(())
    }

    async fn flag_ambiguity(
        &self,
        record: &SanitizedLicenseRecord,
        matches: &[License],
        options: &SyncOptions,
        result: &mut SyncResult,
        flagged: &mut HashSet<i64>,
    ) -> Result<(), StoreError> {
        let ids: Vec<_> = matches.iter().map(|l| l.id).collect();
        tracing::warn!(
            countid = record.countid,
            internal_ids = ?ids,
            "External record matches multiple internal records, flagging for review"
        );
        if flagged.insert(record.countid) {
            result.cross_system_duplicates += 1;
        }
        if !options.dry_run {
            self.store
                .flag_for_review(
                    &ids,
                    &format!("countid {} matches multiple internal records", record.countid),
                )
                .await?;
        }
        result.flagged_for_review += ids.len() as u64;
        Ok(())
    }

    /// Apply a selective merge. Unchanged records are skipped entirely so
    /// a repeat run over identical data is a no-op.
    async fn apply_update(
        &self,
        existing: &License,
        record: &SanitizedLicenseRecord,
        options: &SyncOptions,
        result: &mut SyncResult,
    ) -> Result<(), StoreError> {
        let update = build_update(existing, record, options.force);
        if update.is_empty() {
            return Ok(());
        }
        if !options.dry_run {
            self.store.update_sync_fields(existing.id, &update).await?;
            self.monitor.record_database_operation("update");
        }
        result.updated += 1;
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Duplicates
    // -----------------------------------------------------------------------

    async fn handle_duplicates(
        &self,
        valid: &[SanitizedLicenseRecord],
        options: &SyncOptions,
        result: &mut SyncResult,
        already_flagged: &HashSet<i64>,
    ) -> Result<(), StoreError> {
        let internals: Vec<InternalRecordView> = self
            .store
            .list_linked()
            .await?
            .into_iter()
            .map(|l| InternalRecordView {
                id: l.id,
                appid: l.appid,
                countid: l.countid,
                email: l.email,
                last_active_at: l.last_active_at,
            })
            .collect();

        let report = if options.comprehensive {
            analyze_duplicates(valid, &internals)
        } else {
            liman_core::dedup::DuplicateReport {
                internal: find_internal_duplicates(&internals),
                ..Default::default()
            }
        };

        result.external_duplicates = report.external.len() as u64;
        result.internal_duplicates = report.internal.len() as u64;

        // Cross-system ambiguities not already caught during matching.
        for dup in &report.cross_system {
            if already_flagged.contains(&dup.countid) {
                continue;
            }
            result.cross_system_duplicates += 1;
            if !options.dry_run {
                self.store
                    .flag_for_review(
                        &dup.internal_ids,
                        &format!("countid {} matches multiple internal records", dup.countid),
                    )
                    .await?;
            }
            result.flagged_for_review += dup.internal_ids.len() as u64;
        }

        if options.detect_duplicates {
            for group in &report.internal {
                if options.dry_run {
                    result.consolidated += group.merged_ids.len() as u64;
                } else {
                    result.consolidated += self
                        .store
                        .consolidate(group.survivor_id, &group.merged_ids)
                        .await?;
                    self.monitor.record_database_operation("consolidate");
                }
            }
        }

        Ok(())
    }

    // -----------------------------------------------------------------------
    // Writeback
    // -----------------------------------------------------------------------

    /// Push linked internal records back to the external system. One
    /// record's failure never blocks the rest.
    async fn push_linked(&self, result: &mut SyncResult) {
        let linked = match self.store.list_linked().await {
            Ok(rows) => rows,
            Err(error) => {
                result.errors.push(format!("Listing linked records: {error}"));
                return;
            }
        };

        for license in linked {
            let Some(appid) = license.appid.clone() else {
                continue;
            };
            let call_started = Instant::now();
            match self.api.push_update(&appid, &push_payload(&license)).await {
                Ok(()) => {
                    self.monitor
                        .record_api_request(call_started.elapsed(), self.api_timeout);
                    result.pushed += 1;
                }
                Err(error) => {
                    self.monitor.record_api_error(error.kind());
                    result.errors.push(format!("push {appid}: {error}"));
                    tracing::warn!(appid, %error, "Bidirectional push failed");
                }
            }
        }
    }

    // -----------------------------------------------------------------------
    // Completion
    // -----------------------------------------------------------------------

    async fn finish_run(
        &self,
        mut result: SyncResult,
        started: Instant,
        dry_run: bool,
    ) -> SyncResult {
        result.duration_ms = started.elapsed().as_millis() as u64;

        if !dry_run {
            let cleared = self.cache.clear_pattern(ALL_LICENSE_KEYS).await;
            tracing::debug!(cleared, "Invalidated license cache entries");
        }

        self.monitor.record_data_processed(result.total_fetched);
        if let Some(rss) = process_rss_bytes() {
            self.monitor.record_memory_sample(rss);
        }
        self.monitor
            .record_sync_end(started.elapsed(), result.success);

        self.notifier.emit_sync_complete(&SyncSummary {
            timestamp: result.timestamp,
            duration_ms: result.duration_ms,
            created: result.created,
            updated: result.updated,
            failed: result.failed,
            success: result.success,
        });

        tracing::info!(
            total_fetched = result.total_fetched,
            created = result.created,
            updated = result.updated,
            failed = result.failed,
            duration_ms = result.duration_ms,
            success = result.success,
            dry_run = result.dry_run,
            "Sync run finished"
        );

        *self.last_result.write().await = Some(result.clone());
        result
    }
}

// ---------------------------------------------------------------------------
// Record mapping
// ---------------------------------------------------------------------------

fn new_license_from(record: &SanitizedLicenseRecord) -> NewLicense {
    NewLicense {
        appid: record.appid.clone(),
        countid: Some(record.countid),
        dba: record.dba.clone(),
        zip: record.zip.clone(),
        email: record.email.clone(),
        license_type: record.license_type.clone(),
        status: record
            .status
            .map(|s| status_from_external(i64::from(s)).to_string()),
        seats: None,
        monthly_fee: record.monthly_fee,
        sms_balance: record.sms_balance,
        sms_purchased: record.sms_purchased,
        activated_at: record.activated_at,
        expires_at: record.expires_at,
        last_active_at: record.last_active_at,
    }
}

/// Diff the sanitized record against the stored row. Only differing
/// sync-owned fields are included; `force` includes every present field.
fn build_update(existing: &License, record: &SanitizedLicenseRecord, force: bool) -> SyncFieldUpdate {
    let mut update = SyncFieldUpdate::default();

    if force || existing.countid != Some(record.countid) {
        update.countid = Some(record.countid);
    }
    if let Some(dba) = &record.dba {
        if force || existing.dba.as_deref() != Some(dba) {
            update.dba = Some(dba.clone());
        }
    }
    if let Some(zip) = &record.zip {
        if force || existing.zip.as_deref() != Some(zip) {
            update.zip = Some(zip.clone());
        }
    }
    if let Some(email) = &record.email {
        if force || existing.email.as_deref() != Some(email) {
            update.email = Some(email.clone());
        }
    }
    if let Some(license_type) = &record.license_type {
        if force || existing.license_type != *license_type {
            update.license_type = Some(license_type.clone());
        }
    }
    if let Some(status) = record.status {
        let mapped = status_from_external(i64::from(status));
        if force || existing.status != mapped {
            update.status = Some(mapped.to_string());
        }
    }
    if let Some(fee) = record.monthly_fee {
        if force || existing.monthly_fee != Some(fee) {
            update.monthly_fee = Some(fee);
        }
    }
    if let Some(balance) = record.sms_balance {
        if force || existing.sms_balance != Some(balance) {
            update.sms_balance = Some(balance);
        }
    }
    if let Some(purchased) = record.sms_purchased {
        if force || existing.sms_purchased != Some(purchased) {
            update.sms_purchased = Some(purchased);
        }
    }
    if let Some(activated_at) = record.activated_at {
        if force || existing.activated_at != Some(activated_at) {
            update.activated_at = Some(activated_at);
        }
    }
    if let Some(expires_at) = record.expires_at {
        if force || existing.expires_at != Some(expires_at) {
            update.expires_at = Some(expires_at);
        }
    }
    if let Some(last_active_at) = record.last_active_at {
        if force || existing.last_active_at != Some(last_active_at) {
            update.last_active_at = Some(last_active_at);
        }
    }

    update
}

/// Fields pushed back to the external system for a linked row.
fn push_payload(license: &License) -> serde_json::Value {
    serde_json::json!({
        "countid": license.countid,
        "dba": license.dba,
        "zip": license.zip,
        "email": license.email,
        "license_type": license.license_type,
        "status": status_to_external(&license.status),
        "monthly_fee": license.monthly_fee,
        "sms_balance": license.sms_balance,
        "sms_purchased": license.sms_purchased,
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::{HashMap, HashSet, VecDeque};
    use std::sync::atomic::AtomicI64;
    use std::sync::Mutex;

    use async_trait::async_trait;
    use chrono::{Duration as ChronoDuration, Utc};
    use liman_appcount::{AppCountError, LicensePage};
    use liman_core::monitor::AlertFilter;
    use liman_db::models::license::{
        DEFAULT_LICENSE_TYPE, DEFAULT_SEATS, STATUS_ACTIVE, STATUS_INACTIVE, SYNC_MERGED,
        SYNC_PENDING, SYNC_REVIEW, SYNC_SYNCED,
    };
    use liman_events::EventBus;
    use serde_json::json;

    // -- In-memory store ------------------------------------------------------

    #[derive(Default)]
    struct MemoryStore {
        rows: Mutex<Vec<License>>,
        next_id: AtomicI64,
    }

    impl MemoryStore {
        fn with_rows(rows: Vec<License>) -> Arc<Self> {
            let max_id = rows.iter().map(|r| r.id).max().unwrap_or(0);
            let store = Self {
                rows: Mutex::new(rows),
                next_id: AtomicI64::new(max_id),
            };
            Arc::new(store)
        }

        fn snapshot(&self) -> Vec<License> {
            self.rows.lock().unwrap().clone()
        }

        fn row(&self, id: i64) -> License {
            self.rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.id == id)
                .cloned()
                .expect("row exists")
        }
    }

    fn blank_license(id: i64) -> License {
        License {
            id,
            appid: None,
            countid: None,
            dba: None,
            zip: None,
            email: None,
            license_type: DEFAULT_LICENSE_TYPE.to_string(),
            status: STATUS_INACTIVE.to_string(),
            seats: DEFAULT_SEATS,
            monthly_fee: None,
            sms_balance: None,
            sms_purchased: None,
            activated_at: None,
            expires_at: None,
            grace_until: None,
            last_active_at: None,
            sync_status: SYNC_SYNCED.to_string(),
            last_synced_at: None,
            sync_error: None,
            merged_into: None,
            notes: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[async_trait]
    impl LicenseStore for MemoryStore {
        async fn find_by_appid(&self, appid: &str) -> Result<Option<License>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .find(|r| r.merged_into.is_none() && r.appid.as_deref() == Some(appid))
                .cloned())
        }

        async fn find_by_email(&self, email: &str) -> Result<Vec<License>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| {
                    r.merged_into.is_none()
                        && r.email
                            .as_deref()
                            .is_some_and(|e| e.eq_ignore_ascii_case(email))
                })
                .cloned()
                .collect())
        }

        async fn find_by_countid(&self, countid: i64) -> Result<Vec<License>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.merged_into.is_none() && r.countid == Some(countid))
                .cloned()
                .collect())
        }

        async fn insert(&self, input: &NewLicense) -> Result<License, StoreError> {
            let id = self.next_id.fetch_add(1, Ordering::SeqCst) + 1;
            let mut row = blank_license(id);
            row.appid = input.appid.clone();
            row.countid = input.countid;
            row.dba = input.dba.clone();
            row.zip = input.zip.clone();
            row.email = input.email.clone();
            if let Some(license_type) = &input.license_type {
                row.license_type = license_type.clone();
            }
            if let Some(status) = &input.status {
                row.status = status.clone();
            }
            row.seats = input.seats.unwrap_or(DEFAULT_SEATS);
            row.monthly_fee = input.monthly_fee;
            row.sms_balance = input.sms_balance;
            row.sms_purchased = input.sms_purchased;
            row.activated_at = input.activated_at;
            row.expires_at = input.expires_at;
            row.last_active_at = input.last_active_at;
            row.last_synced_at = Some(Utc::now());
            self.rows.lock().unwrap().push(row.clone());
            Ok(row)
        }

        async fn update_sync_fields(
            &self,
            id: i64,
            update: &SyncFieldUpdate,
        ) -> Result<License, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let row = rows
                .iter_mut()
                .find(|r| r.id == id)
                .ok_or_else(|| StoreError::Internal(format!("no row {id}")))?;
            if let Some(countid) = update.countid {
                row.countid = Some(countid);
            }
            if let Some(dba) = &update.dba {
                row.dba = Some(dba.clone());
            }
            if let Some(zip) = &update.zip {
                row.zip = Some(zip.clone());
            }
            if let Some(email) = &update.email {
                row.email = Some(email.clone());
            }
            if let Some(license_type) = &update.license_type {
                row.license_type = license_type.clone();
            }
            if let Some(status) = &update.status {
                row.status = status.clone();
            }
            if let Some(fee) = update.monthly_fee {
                row.monthly_fee = Some(fee);
            }
            if let Some(balance) = update.sms_balance {
                row.sms_balance = Some(balance);
            }
            if let Some(purchased) = update.sms_purchased {
                row.sms_purchased = Some(purchased);
            }
            if let Some(activated_at) = update.activated_at {
                row.activated_at = Some(activated_at);
            }
            if let Some(expires_at) = update.expires_at {
                row.expires_at = Some(expires_at);
            }
            if let Some(last_active_at) = update.last_active_at {
                row.last_active_at = Some(last_active_at);
            }
            row.sync_status = SYNC_SYNCED.to_string();
            row.last_synced_at = Some(Utc::now());
            row.sync_error = None;
            row.updated_at = Utc::now();
            Ok(row.clone())
        }

        async fn link_external(
            &self,
            id: i64,
            appid: &str,
            countid: i64,
        ) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.appid = Some(appid.to_string());
                row.countid = Some(countid);
            }
            Ok(())
        }

        async fn mark_sync_error(&self, id: i64, error: &str) -> Result<(), StoreError> {
            let mut rows = self.rows.lock().unwrap();
            if let Some(row) = rows.iter_mut().find(|r| r.id == id) {
                row.sync_status = "error".to_string();
                row.sync_error = Some(error.to_string());
            }
            Ok(())
        }

        async fn list_linked(&self) -> Result<Vec<License>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.merged_into.is_none() && r.appid.is_some())
                .cloned()
                .collect())
        }

        async fn list_pending(&self) -> Result<Vec<License>, StoreError> {
            Ok(self
                .rows
                .lock()
                .unwrap()
                .iter()
                .filter(|r| r.merged_into.is_none() && r.sync_status == SYNC_PENDING)
                .cloned()
                .collect())
        }

        async fn consolidate(
            &self,
            survivor_id: i64,
            merged_ids: &[i64],
        ) -> Result<u64, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let mut merged = 0;
            for row in rows.iter_mut() {
                if row.id != survivor_id && merged_ids.contains(&row.id) {
                    row.status = STATUS_INACTIVE.to_string();
                    row.sync_status = SYNC_MERGED.to_string();
                    row.merged_into = Some(survivor_id);
                    merged += 1;
                }
            }
            Ok(merged)
        }

        async fn flag_for_review(&self, ids: &[i64], reason: &str) -> Result<u64, StoreError> {
            let mut rows = self.rows.lock().unwrap();
            let mut flagged = 0;
            for row in rows.iter_mut() {
                if ids.contains(&row.id) {
                    row.sync_status = SYNC_REVIEW.to_string();
                    row.sync_error = Some(reason.to_string());
                    flagged += 1;
                }
            }
            Ok(flagged)
        }
    }

    // -- Scripted API -----------------------------------------------------------

    #[derive(Default)]
    struct ScriptedApi {
        pages: Mutex<VecDeque<Result<LicensePage, AppCountError>>>,
        by_appid: Mutex<HashMap<String, ExternalLicenseRecord>>,
        pushed: Mutex<Vec<String>>,
        failing_pushes: Mutex<HashSet<String>>,
        page_delay: Option<std::time::Duration>,
    }

    impl ScriptedApi {
        fn with_pages(pages: Vec<Result<LicensePage, AppCountError>>) -> Arc<Self> {
            Arc::new(Self {
                pages: Mutex::new(pages.into()),
                ..Default::default()
            })
        }
    }

    #[async_trait]
    impl ExternalLicenseApi for ScriptedApi {
        async fn fetch_page(
            &self,
            _offset: u32,
            _limit: u32,
        ) -> Result<LicensePage, AppCountError> {
            if let Some(delay) = self.page_delay {
                tokio::time::sleep(delay).await;
            }
            self.pages
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok(LicensePage::default()))
        }

        async fn fetch_by_appid(
            &self,
            appid: &str,
        ) -> Result<Option<ExternalLicenseRecord>, AppCountError> {
            Ok(self.by_appid.lock().unwrap().get(appid).cloned())
        }

        async fn push_update(
            &self,
            appid: &str,
            _payload: &serde_json::Value,
        ) -> Result<(), AppCountError> {
            if self.failing_pushes.lock().unwrap().contains(appid) {
                return Err(AppCountError::Server {
                    status: 500,
                    body: "push rejected".to_string(),
                });
            }
            self.pushed.lock().unwrap().push(appid.to_string());
            Ok(())
        }
    }

    // -- Fixtures --------------------------------------------------------------

    fn record(countid: i64, appid: &str) -> ExternalLicenseRecord {
        ExternalLicenseRecord {
            countid: Some(json!(countid)),
            appid: Some(appid.to_string()),
            dba: Some("Corner Store".to_string()),
            email: Some(format!("{appid}@example.com")),
            status: Some(json!(1)),
            ..Default::default()
        }
    }

    fn batch(records: Vec<ExternalLicenseRecord>) -> Vec<Result<LicensePage, AppCountError>> {
        vec![Ok(LicensePage {
            records,
            has_more: false,
        })]
    }

    struct Harness {
        engine: SyncEngine,
        store: Arc<MemoryStore>,
        monitor: Arc<Monitor>,
        cache: Arc<TtlCache>,
    }

    fn harness(api: Arc<ScriptedApi>, store: Arc<MemoryStore>) -> Harness {
        let monitor = Arc::new(Monitor::new());
        let cache = Arc::new(TtlCache::new());
        let engine = SyncEngine::new(
            api,
            store.clone(),
            cache.clone(),
            monitor.clone(),
            SyncNotifier::new(Arc::new(EventBus::default())),
            Duration::from_secs(30),
        );
        Harness {
            engine,
            store,
            monitor,
            cache,
        }
    }

    // -- Create and update paths -------------------------------------------------

    #[tokio::test]
    async fn new_records_are_created_with_defaults() {
        let api = ScriptedApi::with_pages(batch(vec![record(1, "app-1"), record(2, "app-2")]));
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.total_fetched, 2);
        assert_eq!(result.created, 2);
        assert_eq!(result.updated, 0);
        assert_eq!(result.failed, 0);

        let rows = h.store.snapshot();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].status, STATUS_ACTIVE);
        assert_eq!(rows[0].seats, DEFAULT_SEATS);
        assert_eq!(rows[0].sync_status, SYNC_SYNCED);
    }

    #[tokio::test]
    async fn second_run_over_unchanged_data_is_a_noop() {
        let records = vec![record(1, "app-1"), record(2, "app-2")];
        let api = ScriptedApi::with_pages(batch(records.clone()));
        let h = harness(api.clone(), MemoryStore::with_rows(vec![]));

        let first = h.engine.execute(&SyncOptions::default()).await;
        assert_eq!(first.created, 2);

        api.pages.lock().unwrap().extend(batch(records));
        let second = h.engine.execute(&SyncOptions::default()).await;

        assert!(second.success);
        assert_eq!(second.created, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(h.store.snapshot().len(), 2);
    }

    #[tokio::test]
    async fn changed_fields_produce_a_selective_update() {
        let mut existing = blank_license(1);
        existing.appid = Some("app-1".to_string());
        existing.countid = Some(1);
        existing.dba = Some("Old Name".to_string());
        existing.email = Some("app-1@example.com".to_string());
        existing.status = STATUS_ACTIVE.to_string();
        existing.notes = Some("admin note".to_string());
        let store = MemoryStore::with_rows(vec![existing]);

        let mut changed = record(1, "app-1");
        changed.dba = Some("New Name".to_string());
        let api = ScriptedApi::with_pages(batch(vec![changed]));
        let h = harness(api, store);

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert_eq!(result.updated, 1);
        assert_eq!(result.created, 0);
        let row = h.store.row(1);
        assert_eq!(row.dba.as_deref(), Some("New Name"));
        // Admin-owned data is untouched by sync.
        assert_eq!(row.notes.as_deref(), Some("admin note"));
    }

    #[tokio::test]
    async fn force_rewrites_unchanged_records() {
        let api = ScriptedApi::with_pages(batch(vec![record(1, "app-1")]));
        let h = harness(api.clone(), MemoryStore::with_rows(vec![]));
        h.engine.execute(&SyncOptions::default()).await;

        api.pages.lock().unwrap().extend(batch(vec![record(1, "app-1")]));
        let options = SyncOptions {
            force: true,
            ..Default::default()
        };
        let result = h.engine.execute(&options).await;
        assert_eq!(result.updated, 1);
    }

    #[tokio::test]
    async fn email_match_links_external_keys() {
        let mut existing = blank_license(1);
        existing.email = Some("APP-1@EXAMPLE.COM".to_string());
        let store = MemoryStore::with_rows(vec![existing]);

        let api = ScriptedApi::with_pages(batch(vec![record(1, "app-1")]));
        let h = harness(api, store);

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert_eq!(result.created, 0);
        assert_eq!(result.updated, 1);
        let row = h.store.row(1);
        assert_eq!(row.appid.as_deref(), Some("app-1"));
        assert_eq!(row.countid, Some(1));
    }

    // -- Validation failures ------------------------------------------------------

    #[tokio::test]
    async fn one_invalid_record_does_not_halt_the_batch() {
        let mut invalid = record(0, "app-bad");
        invalid.countid = None; // missing required key
        let api = ScriptedApi::with_pages(batch(vec![
            record(1, "app-1"),
            invalid,
            record(3, "app-3"),
        ]));
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.failed, 1);
        assert_eq!(result.created, 2);
        assert!(!result.errors.is_empty());
        assert_eq!(h.store.snapshot().len(), 2);
    }

    // -- Cross-system ambiguity ------------------------------------------------------

    #[tokio::test]
    async fn ambiguous_email_match_is_flagged_not_merged() {
        let mut a = blank_license(1);
        a.email = Some("shared@example.com".to_string());
        let mut b = blank_license(2);
        b.email = Some("shared@example.com".to_string());
        let store = MemoryStore::with_rows(vec![a, b]);

        let mut incoming = record(7, "app-7");
        incoming.email = Some("shared@example.com".to_string());
        let api = ScriptedApi::with_pages(batch(vec![incoming]));
        let h = harness(api, store);

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert_eq!(result.cross_system_duplicates, 1);
        assert_eq!(result.flagged_for_review, 2);
        assert_eq!(result.created, 0);
        assert_eq!(result.updated, 0);

        let rows = h.store.snapshot();
        assert!(rows.iter().all(|r| r.sync_status == SYNC_REVIEW));
        assert!(rows.iter().all(|r| r.merged_into.is_none()));
    }

    // -- Page failures ------------------------------------------------------------

    #[tokio::test]
    async fn transient_page_failure_skips_and_continues() {
        let page = |start: i64| -> Vec<ExternalLicenseRecord> {
            (start..start + 100)
                .map(|i| record(i, &format!("app-{i}")))
                .collect()
        };
        let api = ScriptedApi::with_pages(vec![
            Ok(LicensePage {
                records: page(1),
                has_more: true,
            }),
            Err(AppCountError::Timeout(Duration::from_secs(30))),
            Ok(LicensePage {
                records: page(201),
                has_more: false,
            }),
        ]);
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert!(result.success);
        assert_eq!(result.total_fetched, 200);
        assert!(result.errors.iter().any(|e| e.contains("page 2")));

        let alerts = h.monitor.alerts(AlertFilter::default());
        assert!(alerts.iter().any(|a| a.alert_type == "sync_page_failure"));
    }

    #[tokio::test]
    async fn authentication_failure_aborts_with_partial_results() {
        let api = ScriptedApi::with_pages(vec![
            Ok(LicensePage {
                records: vec![record(1, "app-1")],
                has_more: true,
            }),
            Err(AppCountError::Authentication { status: 401 }),
        ]);
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let result = h.engine.execute(&SyncOptions::default()).await;

        assert!(!result.success);
        assert_eq!(result.total_fetched, 1);
        assert_eq!(result.created, 0);
        assert!(h.store.snapshot().is_empty());
    }

    #[tokio::test]
    async fn repeated_page_failures_become_fatal() {
        let api = ScriptedApi::with_pages(vec![
            Ok(LicensePage {
                records: vec![record(1, "app-1")],
                has_more: true,
            }),
            Err(AppCountError::Timeout(Duration::from_secs(30))),
            Err(AppCountError::Timeout(Duration::from_secs(30))),
            Err(AppCountError::Timeout(Duration::from_secs(30))),
        ]);
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let result = h.engine.execute(&SyncOptions::default()).await;
        assert!(!result.success);
        assert!(result
            .errors
            .iter()
            .any(|e| e.contains("consecutive page failures")));
    }

    // -- Dry run -----------------------------------------------------------------

    #[tokio::test]
    async fn dry_run_computes_but_persists_nothing() {
        let records: Vec<_> = (1..=10).map(|i| record(i, &format!("app-{i}"))).collect();
        let api = ScriptedApi::with_pages(batch(records));
        let h = harness(api, MemoryStore::with_rows(vec![]));

        h.cache
            .set("license:99", json!({"id": 99}), Duration::from_secs(300))
            .await;

        let options = SyncOptions {
            dry_run: true,
            ..Default::default()
        };
        let result = h.engine.execute(&options).await;

        assert!(result.dry_run);
        assert_eq!(result.created, 10);
        assert!(h.store.snapshot().is_empty());
        // Cache untouched: the entry survives and no deletes were counted.
        assert!(h.cache.get("license:99").await.is_some());
    }

    // -- Duplicate consolidation ---------------------------------------------------

    #[tokio::test]
    async fn internal_duplicates_consolidate_to_most_recent_survivor() {
        let mut older = blank_license(1);
        older.appid = Some("app-1".to_string());
        older.countid = Some(5);
        older.last_active_at = Some(Utc::now() - ChronoDuration::days(30));
        let mut newer = blank_license(2);
        newer.appid = Some("app-2".to_string());
        newer.countid = Some(5);
        newer.last_active_at = Some(Utc::now());
        let store = MemoryStore::with_rows(vec![older, newer]);

        let api = ScriptedApi::with_pages(batch(vec![]));
        let h = harness(api, store);

        let options = SyncOptions {
            detect_duplicates: true,
            ..Default::default()
        };
        let result = h.engine.execute(&options).await;

        assert_eq!(result.internal_duplicates, 1);
        assert_eq!(result.consolidated, 1);
        let merged = h.store.row(1);
        assert_eq!(merged.sync_status, SYNC_MERGED);
        assert_eq!(merged.merged_into, Some(2));
        assert_eq!(h.store.row(2).sync_status, SYNC_SYNCED.to_string());
    }

    // -- Bidirectional push ----------------------------------------------------------

    #[tokio::test]
    async fn push_failure_does_not_block_other_pushes() {
        let mut a = blank_license(1);
        a.appid = Some("app-1".to_string());
        let mut b = blank_license(2);
        b.appid = Some("app-2".to_string());
        let store = MemoryStore::with_rows(vec![a, b]);

        let api = ScriptedApi::with_pages(batch(vec![]));
        api.failing_pushes
            .lock()
            .unwrap()
            .insert("app-1".to_string());
        let h = harness(api.clone(), store);

        let options = SyncOptions {
            bidirectional: true,
            ..Default::default()
        };
        let result = h.engine.execute(&options).await;

        assert!(result.success);
        assert_eq!(result.pushed, 1);
        assert!(result.errors.iter().any(|e| e.contains("app-1")));
        assert_eq!(api.pushed.lock().unwrap().as_slice(), ["app-2"]);
    }

    // -- Re-entrancy guard -------------------------------------------------------------

    #[tokio::test(flavor = "multi_thread")]
    async fn overlapping_trigger_is_rejected() {
        let api = Arc::new(ScriptedApi {
            pages: Mutex::new(batch(vec![record(1, "app-1")]).into()),
            page_delay: Some(Duration::from_millis(200)),
            ..Default::default()
        });
        let h = harness(api, MemoryStore::with_rows(vec![]));
        let engine = Arc::new(h.engine);

        let background = {
            let engine = engine.clone();
            tokio::spawn(async move { engine.execute(&SyncOptions::default()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let second = engine.execute(&SyncOptions::default()).await;
        assert!(!second.success);
        assert_eq!(
            second.message.as_deref(),
            Some("A sync run is already in progress")
        );

        let first = background.await.unwrap();
        assert!(first.success);
        assert_eq!(first.created, 1);

        // Guard released: a later run proceeds.
        let third = engine.execute(&SyncOptions::default()).await;
        assert!(third.message.is_none());
    }

    // -- Single-record and pending sync -------------------------------------------------

    #[tokio::test]
    async fn sync_by_appid_updates_one_record() {
        let mut existing = blank_license(1);
        existing.appid = Some("app-1".to_string());
        existing.countid = Some(1);
        existing.email = Some("app-1@example.com".to_string());
        existing.status = STATUS_ACTIVE.to_string();
        let store = MemoryStore::with_rows(vec![existing]);

        let api = ScriptedApi::with_pages(vec![]);
        let mut changed = record(1, "app-1");
        changed.dba = Some("Renamed".to_string());
        api.by_appid
            .lock()
            .unwrap()
            .insert("app-1".to_string(), changed);
        let h = harness(api, store);

        let result = h.engine.sync_by_appid("app-1").await;
        assert!(result.success);
        assert_eq!(result.total_fetched, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(h.store.row(1).dba.as_deref(), Some("Renamed"));
    }

    #[tokio::test]
    async fn sync_by_appid_with_no_external_record_reports_failure() {
        let api = ScriptedApi::with_pages(vec![]);
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let result = h.engine.sync_by_appid("ghost").await;
        assert!(!result.success);
        assert!(result.message.as_deref().unwrap_or("").contains("ghost"));
    }

    #[tokio::test]
    async fn sync_pending_only_touches_pending_rows() {
        let mut pending = blank_license(1);
        pending.appid = Some("app-1".to_string());
        pending.countid = Some(1);
        pending.email = Some("app-1@example.com".to_string());
        pending.status = STATUS_ACTIVE.to_string();
        pending.sync_status = SYNC_PENDING.to_string();
        let mut synced = blank_license(2);
        synced.appid = Some("app-2".to_string());
        let store = MemoryStore::with_rows(vec![pending, synced]);

        let api = ScriptedApi::with_pages(vec![]);
        let mut changed = record(1, "app-1");
        changed.dba = Some("Fresh".to_string());
        api.by_appid
            .lock()
            .unwrap()
            .insert("app-1".to_string(), changed);
        let h = harness(api, store);

        let result = h.engine.sync_pending().await;
        assert!(result.success);
        assert_eq!(result.total_fetched, 1);
        assert_eq!(result.updated, 1);
        assert_eq!(h.store.row(1).sync_status, SYNC_SYNCED.to_string());
    }

    // -- Cache and status -----------------------------------------------------------------

    #[tokio::test]
    async fn completed_run_invalidates_license_cache() {
        let api = ScriptedApi::with_pages(batch(vec![record(1, "app-1")]));
        let h = harness(api, MemoryStore::with_rows(vec![]));

        h.cache
            .set("licenses:stats", json!({"total": 0}), Duration::from_secs(1800))
            .await;

        h.engine.execute(&SyncOptions::default()).await;
        assert!(h.cache.get("licenses:stats").await.is_none());
    }

    #[tokio::test]
    async fn status_reports_last_result() {
        let api = ScriptedApi::with_pages(batch(vec![record(1, "app-1")]));
        let h = harness(api, MemoryStore::with_rows(vec![]));

        let before = h.engine.status().await;
        assert!(!before.sync_in_progress);
        assert!(before.last_result.is_none());

        h.engine.execute(&SyncOptions::default()).await;

        let after = h.engine.status().await;
        assert!(!after.sync_in_progress);
        assert_eq!(after.last_result.unwrap().created, 1);
    }
}
