//! Lifecycle sweeps over the internal license store.
//!
//! Three recurring jobs beyond the sync itself: move past-expiry
//! licenses into the grace period, expire licenses whose grace lapsed,
//! and raise reminders for licenses expiring soon. Outbound email is an
//! external collaborator; the reminder job only emits the realtime
//! event and an info alert.

use std::sync::Arc;

use liman_core::cache::{TtlCache, ALL_LICENSE_KEYS};
use liman_core::monitor::{AlertSeverity, Monitor};
use liman_db::repositories::LicenseRepo;
use liman_db::DbPool;
use liman_events::SyncNotifier;

/// Shared state for the lifecycle jobs.
pub struct LifecycleJobs {
    pool: DbPool,
    cache: Arc<TtlCache>,
    monitor: Arc<Monitor>,
    notifier: SyncNotifier,
    /// Days an expired license stays in `grace` before expiring fully.
    grace_days: i64,
    /// Days ahead the reminder job looks.
    reminder_window_days: i64,
}

impl LifecycleJobs {
    pub fn new(
        pool: DbPool,
        cache: Arc<TtlCache>,
        monitor: Arc<Monitor>,
        notifier: SyncNotifier,
        grace_days: i64,
        reminder_window_days: i64,
    ) -> Self {
        Self {
            pool,
            cache,
            monitor,
            notifier,
            grace_days,
            reminder_window_days,
        }
    }

    /// Move active licenses past their expiry into the grace period.
    pub async fn expiration_sweep(&self) -> Result<usize, sqlx::Error> {
        let ids = LicenseRepo::begin_grace(&self.pool, self.grace_days).await?;
        self.monitor.record_database_operation("expiration_sweep");
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Licenses entered grace period");
            self.cache.clear_pattern(ALL_LICENSE_KEYS).await;
            self.notifier.emit_data_changed("lifecycle", ids.clone());
        }
        Ok(ids.len())
    }

    /// Expire licenses whose grace period has lapsed.
    pub async fn grace_sweep(&self) -> Result<usize, sqlx::Error> {
        let ids = LicenseRepo::expire_lapsed(&self.pool).await?;
        self.monitor.record_database_operation("grace_sweep");
        if !ids.is_empty() {
            tracing::info!(count = ids.len(), "Licenses expired after grace");
            self.cache.clear_pattern(ALL_LICENSE_KEYS).await;
            self.notifier.emit_data_changed("lifecycle", ids.clone());
        }
        Ok(ids.len())
    }

    /// Raise a reminder for licenses expiring within the window.
    pub async fn send_reminders(&self) -> Result<usize, sqlx::Error> {
        let expiring =
            LicenseRepo::expiring_within(&self.pool, self.reminder_window_days).await?;
        if !expiring.is_empty() {
            let ids: Vec<_> = expiring.iter().map(|l| l.id).collect();
            tracing::info!(
                count = ids.len(),
                window_days = self.reminder_window_days,
                "Licenses expiring soon"
            );
            self.monitor.create_alert(
                AlertSeverity::Info,
                "licenses_expiring",
                format!(
                    "{} license(s) expire within {} days",
                    ids.len(),
                    self.reminder_window_days
                ),
            );
            self.notifier.emit_data_changed("reminder", ids);
        }
        Ok(expiring.len())
    }
}
