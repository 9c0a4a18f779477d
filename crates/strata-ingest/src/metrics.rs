//! Ingest metrics.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `strata_ingest_events_total` | Counter | `result` (matched, ignored, duplicate) |
//! | `strata_transform_invocations_total` | Counter | `outcome` |
//! | `strata_transform_duration_seconds` | Histogram | `outcome` |
//! | `strata_lifecycle_expired_total` | Counter | `rule` |

use std::time::Duration;

use metrics::{counter, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: routed object-created events.
    pub const EVENTS_TOTAL: &str = "strata_ingest_events_total";
    /// Counter: finished transform invocations.
    pub const TRANSFORM_INVOCATIONS_TOTAL: &str = "strata_transform_invocations_total";
    /// Histogram: transform wall-clock time in seconds.
    pub const TRANSFORM_DURATION_SECONDS: &str = "strata_transform_duration_seconds";
    /// Counter: landing objects removed by lifecycle rules.
    pub const LIFECYCLE_EXPIRED_TOTAL: &str = "strata_lifecycle_expired_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Routing result.
    pub const RESULT: &str = "result";
    /// Invocation outcome.
    pub const OUTCOME: &str = "outcome";
    /// Lifecycle rule id.
    pub const RULE: &str = "rule";
}

/// Records ingest metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct IngestMetrics;

impl IngestMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts one routed event.
    pub fn record_event(&self, result: &'static str) {
        counter!(names::EVENTS_TOTAL, labels::RESULT => result).increment(1);
    }

    /// Counts a finished invocation and its duration.
    pub fn record_invocation(&self, outcome: &'static str, duration: Duration) {
        counter!(names::TRANSFORM_INVOCATIONS_TOTAL, labels::OUTCOME => outcome).increment(1);
        histogram!(names::TRANSFORM_DURATION_SECONDS, labels::OUTCOME => outcome)
            .record(duration.as_secs_f64());
    }

    /// Counts expired landing objects.
    pub fn record_expired(&self, rule: &str, count: usize) {
        counter!(names::LIFECYCLE_EXPIRED_TOTAL, labels::RULE => rule.to_string())
            .increment(count as u64);
    }
}
