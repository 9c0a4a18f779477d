//! Observability infrastructure for Strata.
//!
//! Structured logging with consistent spans for the three event-driven entry
//! points: object ingestion, catalog runs and queries.

use std::fmt;
use std::sync::Once;
use tracing::Span;
use tracing_subscriber::{fmt as tracing_fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    /// JSON structured logs (for production).
    Json,
    /// Pretty-printed logs (for development).
    #[default]
    Pretty,
}

/// Initializes the logging subsystem.
///
/// Call once at application startup. Safe to call multiple times;
/// subsequent calls are no-ops.
///
/// # Environment Variables
///
/// - `RUST_LOG`: Controls log levels (e.g., `info`, `strata_catalog=debug`)
///
/// # Example
///
/// ```rust
/// use strata_core::observability::{init_logging, LogFormat};
///
/// init_logging(LogFormat::Pretty);
/// ```
pub fn init_logging(format: LogFormat) {
    INIT.call_once(|| {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let result = match format {
            LogFormat::Json => tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_fmt::layer().json())
                .try_init(),
            LogFormat::Pretty => tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_fmt::layer().pretty())
                .try_init(),
        };
        if result.is_err() {
            tracing::debug!("global subscriber already installed");
        }
    });
}

/// Creates a span for ingestion of one landing-zone object.
#[must_use]
pub fn ingest_span(operation: &str, bucket: &str, key: &str) -> Span {
    tracing::info_span!("ingest", op = operation, bucket = bucket, key = key)
}

/// Creates a span for catalog builder operations.
///
/// # Example
///
/// ```rust
/// use strata_core::observability::catalog_span;
///
/// let span = catalog_span("run", "strata_dev_parquet_datalake_db");
/// let _guard = span.enter();
/// ```
#[must_use]
pub fn catalog_span(operation: &str, database: &str) -> Span {
    tracing::info_span!("catalog", op = operation, database = database)
}

/// Creates a span for query gateway operations.
#[must_use]
pub fn query_span(operation: &str, workgroup: &str, query_id: &str) -> Span {
    tracing::info_span!(
        "query",
        op = operation,
        workgroup = workgroup,
        query_id = query_id,
    )
}

/// Wrapper that hides a value from `Debug` and `Display` output.
#[derive(Clone, PartialEq, Eq)]
pub struct Redacted<T>(T);

impl<T> Redacted<T> {
    /// Wraps a sensitive value.
    pub const fn new(value: T) -> Self {
        Self(value)
    }

    /// Returns the wrapped value. Callers must not log it.
    pub const fn expose(&self) -> &T {
        &self.0
    }
}

impl<T> fmt::Debug for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl<T> fmt::Display for Redacted<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[REDACTED]")
    }
}
