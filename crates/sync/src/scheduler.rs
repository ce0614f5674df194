//! Recurring triggers for the engine and the lifecycle sweeps.
//!
//! Each registered job runs on its own fixed `tokio::time::interval`
//! and is cancelled through a shared `CancellationToken`. `start()` is
//! idempotent; `stop()` cancels the recurring triggers without
//! interrupting a run already in flight (the engine's own guard keeps
//! runs atomic, and an in-flight run completes and reports normally).

use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use liman_core::monitor::{process_rss_bytes, AlertSeverity, HealthStatus, Monitor};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::engine::SyncEngine;
use crate::lifecycle::LifecycleJobs;
use crate::options::SyncOptions;

/// Interval defaults, overridable per environment.
const DEFAULT_SYNC_SECS: u64 = 15 * 60;
const DEFAULT_REMINDER_SECS: u64 = 24 * 60 * 60;
const DEFAULT_EXPIRATION_SECS: u64 = 60 * 60;
const DEFAULT_GRACE_SECS: u64 = 60 * 60;
const DEFAULT_HEALTH_SECS: u64 = 5 * 60;
const DEFAULT_REMINDER_WINDOW_DAYS: i64 = 14;
const DEFAULT_GRACE_DAYS: i64 = 14;

/// Job intervals and lifecycle windows, sourced from the environment.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    pub sync_interval: Duration,
    pub reminder_interval: Duration,
    pub expiration_interval: Duration,
    pub grace_interval: Duration,
    pub health_interval: Duration,
    /// Days ahead the reminder job looks for expiring licenses.
    pub reminder_window_days: i64,
    /// Days an expired license stays in the grace period.
    pub grace_days: i64,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sync_interval: Duration::from_secs(DEFAULT_SYNC_SECS),
            reminder_interval: Duration::from_secs(DEFAULT_REMINDER_SECS),
            expiration_interval: Duration::from_secs(DEFAULT_EXPIRATION_SECS),
            grace_interval: Duration::from_secs(DEFAULT_GRACE_SECS),
            health_interval: Duration::from_secs(DEFAULT_HEALTH_SECS),
            reminder_window_days: DEFAULT_REMINDER_WINDOW_DAYS,
            grace_days: DEFAULT_GRACE_DAYS,
        }
    }
}

impl SchedulerConfig {
    /// Read intervals from `*_INTERVAL_SECS` environment variables,
    /// falling back to the defaults above.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            sync_interval: env_secs("SYNC_INTERVAL_SECS", defaults.sync_interval),
            reminder_interval: env_secs("REMINDER_INTERVAL_SECS", defaults.reminder_interval),
            expiration_interval: env_secs(
                "EXPIRATION_INTERVAL_SECS",
                defaults.expiration_interval,
            ),
            grace_interval: env_secs("GRACE_INTERVAL_SECS", defaults.grace_interval),
            health_interval: env_secs("HEALTH_INTERVAL_SECS", defaults.health_interval),
            reminder_window_days: env_i64(
                "REMINDER_WINDOW_DAYS",
                defaults.reminder_window_days,
            ),
            grace_days: env_i64("GRACE_PERIOD_DAYS", defaults.grace_days),
        }
    }
}

fn env_secs(name: &str, default: Duration) -> Duration {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .map(Duration::from_secs)
        .unwrap_or(default)
}

fn env_i64(name: &str, default: i64) -> i64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Drives the engine and the lifecycle sweeps on fixed intervals.
pub struct Scheduler {
    engine: Arc<SyncEngine>,
    lifecycle: Arc<LifecycleJobs>,
    monitor: Arc<Monitor>,
    config: SchedulerConfig,
    cancel: Mutex<Option<CancellationToken>>,
}

impl Scheduler {
    pub fn new(
        engine: Arc<SyncEngine>,
        lifecycle: Arc<LifecycleJobs>,
        monitor: Arc<Monitor>,
        config: SchedulerConfig,
    ) -> Self {
        Self {
            engine,
            lifecycle,
            monitor,
            config,
            cancel: Mutex::new(None),
        }
    }

    /// Whether the recurring triggers are active.
    pub fn is_running(&self) -> bool {
        self.cancel.lock().expect("scheduler lock poisoned").is_some()
    }

    /// Spawn all recurring jobs. Calling this while already running is
    /// a logged no-op.
    pub fn start(&self) {
        let mut slot = self.cancel.lock().expect("scheduler lock poisoned");
        if slot.is_some() {
            tracing::warn!("Scheduler already running, start() ignored");
            return;
        }
        let cancel = CancellationToken::new();

        {
            let engine = self.engine.clone();
            spawn_job(
                "full_sync",
                self.config.sync_interval,
                cancel.clone(),
                self.monitor.clone(),
                move || {
                    let engine = engine.clone();
                    async move {
                        let result = engine.execute(&SyncOptions::default()).await;
                        if result.success {
                            Ok(())
                        } else {
                            Err(result
                                .message
                                .or_else(|| result.errors.first().cloned())
                                .unwrap_or_else(|| "sync failed".to_string()))
                        }
                    }
                },
            );
        }

        {
            let lifecycle = self.lifecycle.clone();
            spawn_job(
                "expiring_reminder",
                self.config.reminder_interval,
                cancel.clone(),
                self.monitor.clone(),
                move || {
                    let lifecycle = lifecycle.clone();
                    async move { lifecycle.send_reminders().await.map(|_| ()).map_err(|e| e.to_string()) }
                },
            );
        }

        {
            let lifecycle = self.lifecycle.clone();
            spawn_job(
                "expiration_check",
                self.config.expiration_interval,
                cancel.clone(),
                self.monitor.clone(),
                move || {
                    let lifecycle = lifecycle.clone();
                    async move {
                        lifecycle
                            .expiration_sweep()
                            .await
                            .map(|_| ())
                            .map_err(|e| e.to_string())
                    }
                },
            );
        }

        {
            let lifecycle = self.lifecycle.clone();
            spawn_job(
                "grace_period",
                self.config.grace_interval,
                cancel.clone(),
                self.monitor.clone(),
                move || {
                    let lifecycle = lifecycle.clone();
                    async move {
                        lifecycle
                            .grace_sweep()
                            .await
                            .map(|_| ())
                            .map_err(|e| e.to_string())
                    }
                },
            );
        }

        {
            let monitor = self.monitor.clone();
            spawn_job(
                "health_check",
                self.config.health_interval,
                cancel.clone(),
                self.monitor.clone(),
                move || {
                    let monitor = monitor.clone();
                    async move {
                        if let Some(rss) = process_rss_bytes() {
                            monitor.record_memory_sample(rss);
                        }
                        let report = monitor.health_status();
                        match report.status {
                            HealthStatus::Healthy => {}
                            HealthStatus::Warning => {
                                tracing::warn!(issues = ?report.issues, "Health check: warning");
                            }
                            HealthStatus::Unhealthy => {
                                tracing::error!(issues = ?report.issues, "Health check: unhealthy");
                            }
                        }
                        Ok(())
                    }
                },
            );
        }

        *slot = Some(cancel);
        tracing::info!(
            sync_secs = self.config.sync_interval.as_secs(),
            health_secs = self.config.health_interval.as_secs(),
            "Scheduler started"
        );
    }

    /// Cancel the recurring triggers. An in-flight run is not
    /// interrupted; it completes and reports normally.
    pub fn stop(&self) {
        let mut slot = self.cancel.lock().expect("scheduler lock poisoned");
        match slot.take() {
            Some(cancel) => {
                cancel.cancel();
                tracing::info!("Scheduler stopped");
            }
            None => {
                tracing::warn!("Scheduler not running, stop() ignored");
            }
        }
    }
}

/// Run a named job on a fixed interval until cancelled. Each invocation
/// is timed; a failure raises a warning alert but never kills the loop.
pub(crate) fn spawn_job<F, Fut>(
    name: &'static str,
    period: Duration,
    cancel: CancellationToken,
    monitor: Arc<Monitor>,
    job: F,
) where
    F: Fn() -> Fut + Send + 'static,
    Fut: Future<Output = Result<(), String>> + Send,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        tracing::info!(job = name, period_secs = period.as_secs(), "Scheduled job started");

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::info!(job = name, "Scheduled job stopping");
                    break;
                }
                _ = interval.tick() => {
                    let started = Instant::now();
                    match job().await {
                        Ok(()) => {
                            tracing::debug!(
                                job = name,
                                duration_ms = started.elapsed().as_millis() as u64,
                                "Scheduled job finished"
                            );
                        }
                        Err(error) => {
                            monitor.create_alert(
                                AlertSeverity::Warning,
                                "job_failure",
                                format!("{name}: {error}"),
                            );
                            tracing::error!(job = name, error, "Scheduled job failed");
                        }
                    }
                }
            }
        }
    });
}
