//! Metrics collector for the publishing dispatch engine
//!
//! This module provides metrics collection and reporting capabilities
//! using the metrics crate facade.

use anyhow::Result;
use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};
use tracing::{info, warn};

/// Metrics collector for trigger evaluation and task dispatch
pub struct DispatchMetrics {
    // Firing and dispatch metrics
    firings_total: Counter,
    tasks_dispatched_total: Counter,
    task_failures_total: Counter,
    task_retries_total: Counter,

    // Concurrency guard metrics
    duplicate_rejections_total: Counter,
    lock_contention_total: Counter,
    stale_locks_released_total: Counter,
    locks_held: Gauge,

    // System performance metrics
    queue_depth: Gauge,
    dispatch_duration: Histogram,
    batch_size: Histogram,
}

impl DispatchMetrics {
    /// Initialize the metrics collector
    pub fn new() -> Result<Self> {
        let firings_total = counter!("publisher_firings_total");
        let tasks_dispatched_total = counter!("publisher_tasks_dispatched_total");
        let task_failures_total = counter!("publisher_task_failures_total");
        let task_retries_total = counter!("publisher_task_retries_total");

        let duplicate_rejections_total = counter!("publisher_duplicate_rejections_total");
        let lock_contention_total = counter!("publisher_lock_contention_total");
        let stale_locks_released_total = counter!("publisher_stale_locks_released_total");
        let locks_held = gauge!("publisher_locks_held");

        let queue_depth = gauge!("publisher_queue_depth");
        let dispatch_duration = histogram!("publisher_dispatch_duration_seconds");
        let batch_size = histogram!("publisher_batch_size");

        Ok(Self {
            firings_total,
            tasks_dispatched_total,
            task_failures_total,
            task_retries_total,
            duplicate_rejections_total,
            lock_contention_total,
            stale_locks_released_total,
            locks_held,
            queue_depth,
            dispatch_duration,
            batch_size,
        })
    }

    // Firing and dispatch metrics

    /// Record one trigger firing that reached the dispatcher
    pub fn record_firing(&self, config_id: i64, trigger_kind: &str) {
        self.firings_total.increment(1);

        info!(
            config_id = config_id,
            trigger_kind = trigger_kind,
            "Configuration fired"
        );
    }

    /// Record a completed dispatch fan-out
    pub fn record_dispatch(&self, task_count: usize, duration_seconds: f64) {
        self.tasks_dispatched_total.increment(task_count as u64);
        self.batch_size.record(task_count as f64);
        self.dispatch_duration.record(duration_seconds);
    }

    /// Record a task that entered a terminal failed state
    pub fn record_task_failure(&self, pipeline_id: &str, reason: &str) {
        self.task_failures_total.increment(1);

        warn!(
            pipeline_id = pipeline_id,
            reason = reason,
            "Task entered failed state"
        );
    }

    /// Record a task retry
    pub fn record_task_retry(&self, pipeline_id: &str, retry_count: i32) {
        self.task_retries_total.increment(1);

        info!(
            pipeline_id = pipeline_id,
            retry_count = retry_count,
            "Task retry initiated"
        );
    }

    // Concurrency guard metrics

    /// Record a dispatch rejected by the dedup guard
    pub fn record_duplicate_rejection(&self, pipeline_id: &str, content_id: &str) {
        self.duplicate_rejections_total.increment(1);

        warn!(
            pipeline_id = pipeline_id,
            content_id = content_id,
            "Duplicate in-flight content rejected"
        );
    }

    /// Record transient contention on an isolation key
    pub fn record_lock_contention(&self, isolation_key: &str) {
        self.lock_contention_total.increment(1);

        warn!(
            isolation_key = isolation_key,
            "Isolation key contention detected"
        );
    }

    /// Record locks force-released by the reconciliation sweep
    pub fn record_stale_locks_released(&self, count: u64) {
        self.stale_locks_released_total.increment(count);
    }

    /// Update the number of currently held isolation locks
    pub fn update_locks_held(&self, count: f64) {
        self.locks_held.set(count);
    }

    // System performance metrics

    /// Update queue depth
    pub fn update_queue_depth(&self, depth: f64) {
        self.queue_depth.set(depth);
    }
}
