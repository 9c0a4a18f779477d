//! Catalog metrics.
//!
//! | Metric | Type | Labels |
//! |--------|------|--------|
//! | `strata_catalog_triggers_total` | Counter | `kind`, `decision` |
//! | `strata_catalog_runs_total` | Counter | `status` |
//! | `strata_catalog_run_duration_seconds` | Histogram | `status` |
//! | `strata_catalog_tables` | Gauge | `database` |
//! | `strata_catalog_partitions` | Gauge | `database` |
//! | `strata_catalog_skipped_keys_total` | Counter | - |

use std::time::Duration;

use metrics::{counter, gauge, histogram};

/// Metric names as constants for consistency.
pub mod names {
    /// Counter: trigger arrivals and what became of them.
    pub const TRIGGERS_TOTAL: &str = "strata_catalog_triggers_total";
    /// Counter: finished runs.
    pub const RUNS_TOTAL: &str = "strata_catalog_runs_total";
    /// Histogram: run wall-clock time in seconds.
    pub const RUN_DURATION_SECONDS: &str = "strata_catalog_run_duration_seconds";
    /// Gauge: tables in the last published database.
    pub const TABLES: &str = "strata_catalog_tables";
    /// Gauge: partitions in the last published database.
    pub const PARTITIONS: &str = "strata_catalog_partitions";
    /// Counter: parquet keys the scanner could not place.
    pub const SKIPPED_KEYS_TOTAL: &str = "strata_catalog_skipped_keys_total";
}

/// Label keys used across metrics.
pub mod labels {
    /// Trigger kind (`manual`, `scheduled`).
    pub const KIND: &str = "kind";
    /// Trigger decision (`started`, `skipped`).
    pub const DECISION: &str = "decision";
    /// Run status.
    pub const STATUS: &str = "status";
    /// Database name.
    pub const DATABASE: &str = "database";
}

/// Records catalog metrics.
#[derive(Debug, Clone, Copy, Default)]
pub struct CatalogMetrics;

impl CatalogMetrics {
    /// Creates a recorder.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Counts one trigger arrival.
    pub fn record_trigger(&self, kind: &'static str, decision: &'static str) {
        counter!(names::TRIGGERS_TOTAL, labels::KIND => kind, labels::DECISION => decision)
            .increment(1);
    }

    /// Counts a finished run and its duration.
    pub fn record_run(&self, status: &'static str, duration: Duration) {
        counter!(names::RUNS_TOTAL, labels::STATUS => status).increment(1);
        histogram!(names::RUN_DURATION_SECONDS, labels::STATUS => status)
            .record(duration.as_secs_f64());
    }

    /// Sets the size of a published database.
    #[allow(clippy::cast_precision_loss)]
    pub fn record_database(&self, database: &str, tables: usize, partitions: usize) {
        gauge!(names::TABLES, labels::DATABASE => database.to_string()).set(tables as f64);
        gauge!(names::PARTITIONS, labels::DATABASE => database.to_string()).set(partitions as f64);
    }

    /// Counts keys the scanner skipped.
    pub fn record_skipped(&self, count: usize) {
        counter!(names::SKIPPED_KEYS_TOTAL).increment(count as u64);
    }
}
