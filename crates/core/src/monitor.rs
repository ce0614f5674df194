//! Sync pipeline monitoring: counters, histograms, gauges, the alert
//! feed, and periodic health evaluation.
//!
//! The [`Monitor`] is constructed once at startup and injected as an
//! `Arc<Monitor>` into the engine, scheduler, and HTTP layer — there is
//! no module-level singleton, and [`Monitor::reset`] gives tests a clean
//! slate. Interior mutability is a single `std::sync::RwLock` with short
//! critical sections; counters and histograms are process-wide state per
//! the single-process execution model.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;

use crate::bounded::BoundedBuffer;
use crate::error::CoreError;
use crate::types::Timestamp;

// ---------------------------------------------------------------------------
// Canonical metric names
// ---------------------------------------------------------------------------

pub const METRIC_SYNC_RUNS: &str = "sync.runs";
pub const METRIC_SYNC_RUNS_FAILED: &str = "sync.runs_failed";
pub const METRIC_SYNC_DURATION_MS: &str = "sync.duration_ms";
pub const METRIC_SYNC_ACTIVE: &str = "sync.active";
pub const METRIC_API_REQUESTS: &str = "api.requests";
pub const METRIC_API_REQUEST_MS: &str = "api.request_ms";
pub const METRIC_API_ERRORS: &str = "api.errors";
pub const METRIC_RECORDS_PROCESSED: &str = "sync.records_processed";
pub const METRIC_DB_OPERATIONS: &str = "db.operations";
pub const METRIC_VALIDATION_ERRORS: &str = "sync.validation_errors";
pub const METRIC_MEMORY_RSS_BYTES: &str = "process.rss_bytes";

// ---------------------------------------------------------------------------
// Thresholds (fixed, not runtime-tunable)
// ---------------------------------------------------------------------------

/// An external API request taking more than this share of its configured
/// timeout produces a warning alert.
pub const API_SLOW_REQUEST_RATIO: f64 = 0.8;

/// A single sync run longer than this produces a warning alert.
pub const SYNC_DURATION_WARN: Duration = Duration::from_secs(10 * 60);

/// Run error rate above this produces an error-level alert.
pub const ERROR_RATE_THRESHOLD: f64 = 0.10;

/// Peak process RSS above this during a run produces a warning alert.
pub const MEMORY_WARN_BYTES: u64 = 100 * 1024 * 1024;

/// No successful run within this window degrades health to warning.
pub const STALE_SUCCESS_WINDOW: chrono::Duration = chrono::Duration::hours(1);

/// Alert feed capacity (oldest evicted first).
pub const ALERT_CAPACITY: usize = 100;

/// Histogram sample buffer capacity.
pub const HISTOGRAM_CAPACITY: usize = 1000;

// ---------------------------------------------------------------------------
// Error classification
// ---------------------------------------------------------------------------

/// Typed classification of an external API failure.
///
/// Produced by the API client itself (a property of the error value),
/// not derived from message text at the call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ApiErrorKind {
    Timeout,
    Network,
    Authentication,
    RateLimit,
    ServerError,
    ClientError,
    Unknown,
}

impl ApiErrorKind {
    /// Label used for the per-kind error counter.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::Authentication => "authentication",
            Self::RateLimit => "rate_limit",
            Self::ServerError => "server_error",
            Self::ClientError => "client_error",
            Self::Unknown => "unknown",
        }
    }

    /// Fatal kinds abort a sync run; transient kinds (timeout, network,
    /// rate limit, server errors) are counted and the run continues.
    /// Connectivity loss is escalated by the engine when the very first
    /// page is unreachable.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Authentication)
    }
}

// ---------------------------------------------------------------------------
// Alerts
// ---------------------------------------------------------------------------

/// Severity level for an alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertSeverity {
    Info,
    Warning,
    Error,
    Critical,
}

/// A single alert in the bounded feed.
///
/// Immutable except for the acknowledged flag and timestamp.
#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub id: u64,
    pub severity: AlertSeverity,
    pub alert_type: String,
    pub details: String,
    pub timestamp: Timestamp,
    pub acknowledged: bool,
    pub acknowledged_at: Option<Timestamp>,
}

/// Filter for [`Monitor::alerts`].
#[derive(Debug, Clone, Copy, Default)]
pub struct AlertFilter {
    pub severity: Option<AlertSeverity>,
    pub unacknowledged_only: bool,
}

// ---------------------------------------------------------------------------
// Health and summaries
// ---------------------------------------------------------------------------

/// Overall health classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Warning,
    Unhealthy,
}

/// Result of one health evaluation pass.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub status: HealthStatus,
    pub run_error_rate: f64,
    pub memory_rss_bytes: Option<u64>,
    pub last_success_at: Option<Timestamp>,
    /// Human-readable reasons for a non-healthy status.
    pub issues: Vec<String>,
}

/// Summary statistics for one histogram.
#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub avg: f64,
}

/// Full metrics snapshot for the monitoring endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct MetricsSnapshot {
    pub counters: HashMap<String, u64>,
    pub gauges: HashMap<String, f64>,
    pub histograms: HashMap<String, HistogramSummary>,
}

/// Condensed performance view for dashboards.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceSummary {
    pub sync_runs: u64,
    pub sync_runs_failed: u64,
    pub run_error_rate: f64,
    pub avg_sync_duration_ms: Option<f64>,
    pub api_requests: u64,
    pub api_errors: u64,
    pub records_processed: u64,
    pub validation_errors: u64,
}

// ---------------------------------------------------------------------------
// Monitor
// ---------------------------------------------------------------------------

struct MonitorState {
    counters: HashMap<String, u64>,
    gauges: HashMap<String, f64>,
    histograms: HashMap<String, BoundedBuffer<f64>>,
    alerts: BoundedBuffer<Alert>,
    last_success_at: Option<Timestamp>,
}

impl MonitorState {
    fn new() -> Self {
        Self {
            counters: HashMap::new(),
            gauges: HashMap::new(),
            histograms: HashMap::new(),
            alerts: BoundedBuffer::new(ALERT_CAPACITY),
            last_success_at: None,
        }
    }

    fn inc(&mut self, name: &str, by: u64) {
        *self.counters.entry(name.to_string()).or_insert(0) += by;
    }

    fn observe(&mut self, name: &str, value: f64) {
        self.histograms
            .entry(name.to_string())
            .or_insert_with(|| BoundedBuffer::new(HISTOGRAM_CAPACITY))
            .push(value);
    }

    fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }
}

/// Metrics, alerts, and health for the sync pipeline.
pub struct Monitor {
    state: RwLock<MonitorState>,
    next_alert_id: AtomicU64,
}

impl Default for Monitor {
    fn default() -> Self {
        Self::new()
    }
}

impl Monitor {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MonitorState::new()),
            next_alert_id: AtomicU64::new(1),
        }
    }

    // -- Sync run bracketing --

    /// Mark a sync run as started. The active-run count is a gauge, not
    /// a lock — run-level mutual exclusion lives in the engine.
    pub fn record_sync_start(&self) {
        let mut state = self.state.write().expect("monitor lock poisoned");
        let active = state.gauges.entry(METRIC_SYNC_ACTIVE.to_string()).or_insert(0.0);
        *active += 1.0;
    }

    /// Mark a sync run as finished, recording duration and outcome.
    ///
    /// On failure the per-kind API error counter has already been fed by
    /// [`record_api_error`](Self::record_api_error); this increments the
    /// failed-run counter. Threshold alerts (long run, error rate) fire
    /// from here.
    pub fn record_sync_end(&self, duration: Duration, success: bool) {
        let (long_run, error_rate) = {
            let mut state = self.state.write().expect("monitor lock poisoned");
            let active = state.gauges.entry(METRIC_SYNC_ACTIVE.to_string()).or_insert(0.0);
            *active = (*active - 1.0).max(0.0);

            state.inc(METRIC_SYNC_RUNS, 1);
            state.observe(METRIC_SYNC_DURATION_MS, duration.as_millis() as f64);
            if success {
                state.last_success_at = Some(Utc::now());
            } else {
                state.inc(METRIC_SYNC_RUNS_FAILED, 1);
            }

            let runs = state.counter(METRIC_SYNC_RUNS);
            let failed = state.counter(METRIC_SYNC_RUNS_FAILED);
            let rate = if runs > 0 { failed as f64 / runs as f64 } else { 0.0 };
            (duration > SYNC_DURATION_WARN, rate)
        };

        if long_run {
            self.create_alert(
                AlertSeverity::Warning,
                "sync_slow",
                format!("Sync run took {}s", duration.as_secs()),
            );
        }
        if error_rate > ERROR_RATE_THRESHOLD {
            self.create_alert(
                AlertSeverity::Error,
                "sync_error_rate",
                format!("Run error rate {:.1}% exceeds 10%", error_rate * 100.0),
            );
        }
    }

    // -- External API --

    /// Record a completed external API request. A request that consumed
    /// more than 80% of its configured timeout raises a warning alert.
    pub fn record_api_request(&self, duration: Duration, configured_timeout: Duration) {
        {
            let mut state = self.state.write().expect("monitor lock poisoned");
            state.inc(METRIC_API_REQUESTS, 1);
            state.observe(METRIC_API_REQUEST_MS, duration.as_millis() as f64);
        }
        let limit = configured_timeout.mul_f64(API_SLOW_REQUEST_RATIO);
        if duration > limit {
            self.create_alert(
                AlertSeverity::Warning,
                "api_slow_request",
                format!(
                    "External API request took {}ms (timeout {}ms)",
                    duration.as_millis(),
                    configured_timeout.as_millis()
                ),
            );
        }
    }

    /// Record a classified external API error.
    pub fn record_api_error(&self, kind: ApiErrorKind) {
        let mut state = self.state.write().expect("monitor lock poisoned");
        state.inc(METRIC_API_ERRORS, 1);
        state.inc(&format!("{METRIC_API_ERRORS}.{}", kind.as_str()), 1);
    }

    // -- Pipeline counters --

    pub fn record_data_processed(&self, count: u64) {
        let mut state = self.state.write().expect("monitor lock poisoned");
        state.inc(METRIC_RECORDS_PROCESSED, count);
    }

    pub fn record_database_operation(&self, operation: &str) {
        let mut state = self.state.write().expect("monitor lock poisoned");
        state.inc(METRIC_DB_OPERATIONS, 1);
        state.inc(&format!("{METRIC_DB_OPERATIONS}.{operation}"), 1);
    }

    pub fn record_validation_error(&self, count: u64) {
        let mut state = self.state.write().expect("monitor lock poisoned");
        state.inc(METRIC_VALIDATION_ERRORS, count);
    }

    /// Record a process memory sample (bytes). Samples above the 100 MB
    /// threshold raise a warning alert.
    pub fn record_memory_sample(&self, rss_bytes: u64) {
        {
            let mut state = self.state.write().expect("monitor lock poisoned");
            state
                .gauges
                .insert(METRIC_MEMORY_RSS_BYTES.to_string(), rss_bytes as f64);
        }
        if rss_bytes > MEMORY_WARN_BYTES {
            self.create_alert(
                AlertSeverity::Warning,
                "memory_high",
                format!("Process RSS {} MB exceeds 100 MB", rss_bytes / (1024 * 1024)),
            );
        }
    }

    // -- Alerts --

    /// Append an alert to the bounded feed, evicting the oldest when the
    /// feed is full. Returns the alert id.
    pub fn create_alert(
        &self,
        severity: AlertSeverity,
        alert_type: &str,
        details: String,
    ) -> u64 {
        let id = self.next_alert_id.fetch_add(1, Ordering::Relaxed);
        let alert = Alert {
            id,
            severity,
            alert_type: alert_type.to_string(),
            details,
            timestamp: Utc::now(),
            acknowledged: false,
            acknowledged_at: None,
        };
        tracing::debug!(alert_id = id, alert_type, ?severity, "Alert created");
        let mut state = self.state.write().expect("monitor lock poisoned");
        state.alerts.push(alert);
        id
    }

    /// List alerts, newest last, applying the filter.
    pub fn alerts(&self, filter: AlertFilter) -> Vec<Alert> {
        let state = self.state.read().expect("monitor lock poisoned");
        state
            .alerts
            .iter()
            .filter(|a| {
                filter.severity.is_none_or(|s| a.severity == s)
                    && (!filter.unacknowledged_only || !a.acknowledged)
            })
            .cloned()
            .collect()
    }

    /// Acknowledge an alert by id.
    pub fn acknowledge_alert(&self, id: u64) -> Result<(), CoreError> {
        let mut state = self.state.write().expect("monitor lock poisoned");
        for alert in state.alerts.iter_mut() {
            if alert.id == id {
                alert.acknowledged = true;
                alert.acknowledged_at = Some(Utc::now());
                return Ok(());
            }
        }
        Err(CoreError::NotFound {
            entity: "Alert",
            id: id as i64,
        })
    }

    // -- Snapshots --

    /// Full metrics snapshot for the monitoring endpoint.
    pub fn metrics(&self) -> MetricsSnapshot {
        let state = self.state.read().expect("monitor lock poisoned");
        let histograms = state
            .histograms
            .iter()
            .filter(|(_, buf)| !buf.is_empty())
            .map(|(name, buf)| {
                let count = buf.len();
                let mut min = f64::INFINITY;
                let mut max = f64::NEG_INFINITY;
                let mut sum = 0.0;
                for v in buf.iter() {
                    min = min.min(*v);
                    max = max.max(*v);
                    sum += *v;
                }
                (
                    name.clone(),
                    HistogramSummary {
                        count,
                        min,
                        max,
                        avg: sum / count as f64,
                    },
                )
            })
            .collect();

        MetricsSnapshot {
            counters: state.counters.clone(),
            gauges: state.gauges.clone(),
            histograms,
        }
    }

    /// Condensed performance summary.
    pub fn performance_summary(&self) -> PerformanceSummary {
        let state = self.state.read().expect("monitor lock poisoned");
        let runs = state.counter(METRIC_SYNC_RUNS);
        let failed = state.counter(METRIC_SYNC_RUNS_FAILED);
        let avg = state.histograms.get(METRIC_SYNC_DURATION_MS).and_then(|h| {
            if h.is_empty() {
                None
            } else {
                Some(h.iter().sum::<f64>() / h.len() as f64)
            }
        });
        PerformanceSummary {
            sync_runs: runs,
            sync_runs_failed: failed,
            run_error_rate: if runs > 0 { failed as f64 / runs as f64 } else { 0.0 },
            avg_sync_duration_ms: avg,
            api_requests: state.counter(METRIC_API_REQUESTS),
            api_errors: state.counter(METRIC_API_ERRORS),
            records_processed: state.counter(METRIC_RECORDS_PROCESSED),
            validation_errors: state.counter(METRIC_VALIDATION_ERRORS),
        }
    }

    /// Re-derive overall health from memory, error rate, and recency of
    /// the last successful run. Invoked by the scheduler's health job
    /// and by the monitoring endpoint.
    pub fn health_status(&self) -> HealthReport {
        let state = self.state.read().expect("monitor lock poisoned");
        let runs = state.counter(METRIC_SYNC_RUNS);
        let failed = state.counter(METRIC_SYNC_RUNS_FAILED);
        let rate = if runs > 0 { failed as f64 / runs as f64 } else { 0.0 };
        let rss = state
            .gauges
            .get(METRIC_MEMORY_RSS_BYTES)
            .map(|v| *v as u64);
        let last_success_at = state.last_success_at;
        drop(state);

        let mut issues = Vec::new();
        if rate > ERROR_RATE_THRESHOLD {
            issues.push(format!("run error rate {:.1}%", rate * 100.0));
        }
        if let Some(bytes) = rss {
            if bytes > MEMORY_WARN_BYTES {
                issues.push(format!("memory {} MB", bytes / (1024 * 1024)));
            }
        }
        match last_success_at {
            Some(at) if Utc::now() - at > STALE_SUCCESS_WINDOW => {
                issues.push(format!("no successful run since {at}"));
            }
            _ => {}
        }

        // Error rate above threshold alone is Unhealthy; everything else
        // degrades to Warning.
        let status = if rate > ERROR_RATE_THRESHOLD {
            HealthStatus::Unhealthy
        } else if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Warning
        };

        HealthReport {
            status,
            run_error_rate: rate,
            memory_rss_bytes: rss,
            last_success_at,
            issues,
        }
    }

    /// Clear all metrics, alerts, and health state. Test hook.
    pub fn reset(&self) {
        let mut state = self.state.write().expect("monitor lock poisoned");
        *state = MonitorState::new();
        self.next_alert_id.store(1, Ordering::Relaxed);
    }
}

/// Read the current process RSS from `/proc/self/statm` (Linux).
///
/// Returns `None` on platforms without procfs; callers treat a missing
/// sample as "no data", never as zero.
pub fn process_rss_bytes() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let resident_pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    Some(resident_pages * 4096)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
