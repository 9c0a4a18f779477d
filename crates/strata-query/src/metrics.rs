//! Query gateway metrics.

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names.
pub mod names {
    /// Counter: queries reaching each state.
    pub const QUERIES_TOTAL: &str = "strata_queries_total";
    /// Histogram: running time of finished queries in seconds.
    pub const QUERY_DURATION_SECONDS: &str = "strata_query_duration_seconds";
    /// Gauge: queries holding a gateway slot.
    pub const QUERIES_RUNNING: &str = "strata_queries_running";
}

/// Label keys.
pub mod labels {
    /// Query state.
    pub const STATE: &str = "state";
    /// Workgroup name.
    pub const WORKGROUP: &str = "workgroup";
}

/// Records query metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryMetrics;

impl QueryMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts a state reached by a query.
    pub fn record_state(&self, workgroup: &str, state: &'static str) {
        counter!(
            names::QUERIES_TOTAL,
            labels::WORKGROUP => workgroup.to_string(),
            labels::STATE => state
        )
        .increment(1);
    }

    /// Records how long a finished query held its slot.
    pub fn record_duration(&self, workgroup: &str, state: &'static str, duration: Duration) {
        histogram!(
            names::QUERY_DURATION_SECONDS,
            labels::WORKGROUP => workgroup.to_string(),
            labels::STATE => state
        )
        .record(duration.as_secs_f64());
    }

    /// Tracks slot usage.
    pub fn slot_acquired(&self, workgroup: &str) {
        gauge!(names::QUERIES_RUNNING, labels::WORKGROUP => workgroup.to_string()).increment(1.0);
    }

    /// Tracks slot release.
    pub fn slot_released(&self, workgroup: &str) {
        gauge!(names::QUERIES_RUNNING, labels::WORKGROUP => workgroup.to_string()).decrement(1.0);
    }
}
