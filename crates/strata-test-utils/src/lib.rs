//! Shared test utilities for Strata integration tests.
//!
//! This crate provides:
//! - [`TracingMemoryBackend`]: in-memory storage with operation recording,
//!   latency and failure injection
//! - Parquet fixture builders and a `test` stage configuration
//! - [`SignalTransformation`]: a reference transformation that writes one
//!   partitioned parquet file per landed object
//!
//! # Example
//!
//! ```rust,ignore
//! use strata_test_utils::{init_test_logging, test_config, TracingMemoryBackend};
//!
//! #[tokio::test]
//! async fn test_example() {
//!     init_test_logging();
//!     let config = test_config();
//!     let output = TracingMemoryBackend::new();
//!     // ... run test ...
//!     assert!(!output.was_mutated());
//! }
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(clippy::must_use_candidate)]
// Test utilities use expect/unwrap for cleaner test code - panics are acceptable in tests
#![allow(clippy::expect_used)]
#![allow(clippy::unwrap_used)]
#![allow(clippy::missing_panics_doc)]

pub mod fixtures;
pub mod storage;
pub mod transformation;

pub use fixtures::*;
pub use storage::*;
pub use transformation::*;

/// Initialize test logging (call once per test module).
pub fn init_test_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::from_default_env()
                .add_directive("strata=debug".parse().expect("valid directive")),
        )
        .with_test_writer()
        .try_init();
}
