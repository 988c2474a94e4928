//! Prometheus metrics for core components.
//!
//! Covers the cycle loop, acquisition attempts, the shared resource and the
//! snapshot broadcaster. The server registers `all_metrics()` in its registry.

use once_cell::sync::Lazy;
use prometheus::{
    Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts,
};

// =============================================================================
// Cycle Metrics
// =============================================================================

/// Cycles completed.
pub static CYCLES_TOTAL: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("dropwatch_cycles_total", "Total orchestrator cycles completed").unwrap()
});

/// Time spent inside a cycle (drain through publish).
pub static CYCLE_DURATION: Lazy<Histogram> = Lazy::new(|| {
    Histogram::with_opts(
        HistogramOpts::new(
            "dropwatch_cycle_duration_seconds",
            "Duration of one cycle, excluding the idle wait",
        )
        .buckets(vec![0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 15.0, 30.0, 60.0]),
    )
    .unwrap()
});

/// Drains that hit `max_drain_timeout` and were force-cleared.
pub static DRAIN_TIMEOUTS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dropwatch_drain_timeouts_total",
        "Total drains that timed out and force-cleared live workers",
    )
    .unwrap()
});

/// Availability polls that failed after all retries.
pub static FEED_FAILURES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dropwatch_feed_failures_total",
        "Total availability polls that failed after retries",
    )
    .unwrap()
});

/// Items by current status.
pub static ITEMS_BY_STATUS: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(
        Opts::new("dropwatch_items", "Tracked items by status"),
        &["status"],
    )
    .unwrap()
});

// =============================================================================
// Attempt Metrics
// =============================================================================

/// Attempts launched.
pub static ATTEMPTS_STARTED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dropwatch_attempts_started_total",
        "Total acquisition attempts launched",
    )
    .unwrap()
});

/// Attempts finished by outcome and failure reason.
pub static ATTEMPTS_FINISHED: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new(
            "dropwatch_attempts_finished_total",
            "Total acquisition attempts finished",
        ),
        &["outcome", "reason"], // reason is "none" on purchase
    )
    .unwrap()
});

/// Late writes from force-cleared workers that the store rejected.
pub static STALE_WRITES: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dropwatch_stale_writes_total",
        "Total worker writes rejected because the attempt was superseded",
    )
    .unwrap()
});

/// Workers currently registered.
pub static LIVE_WORKERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new("dropwatch_live_workers", "Acquisition workers currently live").unwrap()
});

// =============================================================================
// Resource / Broadcast Metrics
// =============================================================================

/// 1 while the automation resource is retired.
pub static RESOURCE_RETIRED: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "dropwatch_resource_retired",
        "Whether the automation resource is retired (1) or usable (0)",
    )
    .unwrap()
});

/// Snapshots dropped because a subscriber queue was full.
pub static SNAPSHOTS_DROPPED: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new(
        "dropwatch_snapshots_dropped_total",
        "Total snapshots dropped for slow subscribers",
    )
    .unwrap()
});

/// Current snapshot subscribers.
pub static SNAPSHOT_SUBSCRIBERS: Lazy<IntGauge> = Lazy::new(|| {
    IntGauge::new(
        "dropwatch_snapshot_subscribers",
        "Snapshot subscribers currently attached",
    )
    .unwrap()
});

// =============================================================================
// Helper functions
// =============================================================================

/// Get all core metrics for registration in a registry.
pub fn all_metrics() -> Vec<Box<dyn prometheus::core::Collector>> {
    vec![
        // Cycle
        Box::new(CYCLES_TOTAL.clone()),
        Box::new(CYCLE_DURATION.clone()),
        Box::new(DRAIN_TIMEOUTS.clone()),
        Box::new(FEED_FAILURES.clone()),
        Box::new(ITEMS_BY_STATUS.clone()),
        // Attempts
        Box::new(ATTEMPTS_STARTED.clone()),
        Box::new(ATTEMPTS_FINISHED.clone()),
        Box::new(STALE_WRITES.clone()),
        Box::new(LIVE_WORKERS.clone()),
        // Resource / broadcast
        Box::new(RESOURCE_RETIRED.clone()),
        Box::new(SNAPSHOTS_DROPPED.clone()),
        Box::new(SNAPSHOT_SUBSCRIBERS.clone()),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_metrics_register_once() {
        let registry = prometheus::Registry::new();
        for metric in all_metrics() {
            registry.register(metric).unwrap();
        }
        ATTEMPTS_FINISHED.with_label_values(&["failed", "resource_timeout"]).inc();
        assert!(registry
            .gather()
            .iter()
            .any(|f| f.get_name() == "dropwatch_attempts_finished_total"));
    }
}
