//! Prometheus metrics for core components.
//!
//! Covers:
//! - Periodic tasks (ticks run, skipped, timed out)
//! - Job lifecycle transitions
//! - Reconciliation of completion reports
//! - Notification delivery
//! - Torrent client calls

use once_cell::sync::Lazy;
use prometheus::{HistogramOpts, HistogramVec, IntCounter, IntCounterVec, Opts};

// =============================================================================
// Periodic tasks
// =============================================================================

/// Task ticks by outcome: "completed", "failed", "timed_out", "skipped".
pub static TASK_TICKS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_task_ticks_total", "Periodic task ticks by outcome"),
        &["task", "outcome"],
    )
    .expect("valid metric definition")
});

/// Tick duration per task.
pub static TASK_TICK_DURATION: Lazy<HistogramVec> = Lazy::new(|| {
    HistogramVec::new(
        HistogramOpts::new(
            "seedsync_task_tick_duration_seconds",
            "Wall time of a periodic task tick",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
        &["task"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Job lifecycle
// =============================================================================

/// Job transitions by target status.
pub static JOB_TRANSITIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_job_transitions_total", "Job status transitions"),
        &["to"],
    )
    .expect("valid metric definition")
});

/// Jobs created by intake.
pub static JOBS_CREATED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("seedsync_jobs_created_total", "Jobs created by intake")
        .expect("valid metric definition")
});

/// Jobs deleted by the retention sweep.
pub static JOBS_RETIRED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("seedsync_jobs_retired_total", "Jobs removed by retention")
        .expect("valid metric definition")
});

// =============================================================================
// Sync bridge
// =============================================================================

/// Completion reports by outcome: "key", "exact", "containment", "replay",
/// "unresolved".
pub static RECONCILIATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedsync_reconciliations_total",
            "Completion reports by reconciliation outcome",
        ),
        &["outcome"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Notifications
// =============================================================================

/// Notification dispatch attempts: "delivered", "deferred", "failed".
pub static NOTIFICATIONS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedsync_notifications_total",
            "Notification dispatch attempts by outcome",
        ),
        &["outcome"],
    )
    .expect("valid metric definition")
});

// =============================================================================
// Torrent client
// =============================================================================

/// Backend calls by operation and final result.
pub static BACKEND_CALLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("seedsync_backend_calls_total", "Torrent client calls"),
        &["operation", "result"],
    )
    .expect("valid metric definition")
});

/// Retries of retryable backend failures.
pub static BACKEND_RETRIES: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "seedsync_backend_retries_total",
            "Torrent client call retries",
        ),
        &["operation"],
    )
    .expect("valid metric definition")
});

/// All core metrics, for registration in the server's registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        Box::new(TASK_TICKS.clone()),
        Box::new(TASK_TICK_DURATION.clone()),
        Box::new(JOB_TRANSITIONS.clone()),
        Box::new(JOBS_CREATED.clone()),
        Box::new(JOBS_RETIRED.clone()),
        Box::new(RECONCILIATIONS.clone()),
        Box::new(NOTIFICATIONS.clone()),
        Box::new(BACKEND_CALLS.clone()),
        Box::new(BACKEND_RETRIES.clone()),
    ]
}
