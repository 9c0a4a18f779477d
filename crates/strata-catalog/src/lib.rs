//! # strata-catalog
//!
//! Makes the output zone queryable by keeping a metadata catalog in line
//! with it.
//!
//! - **Scanner**: groups output-zone parquet keys into tables and
//!   partitions, sampling one file per table for columns
//! - **Catalog service**: permission-checked reads and idempotent publishes
//! - **Builder job**: one definition, an on-demand and a scheduled trigger,
//!   at most one run at a time, bounded by a timeout, never retried
//!
//! ## Example
//!
//! ```rust
//! use strata_catalog::layout::{classify, table_name};
//!
//! let layout = classify("signals/partition=session-001/session-001.parquet").unwrap();
//! assert_eq!(table_name("tbl_", &layout.table_root), "tbl_signals");
//! assert_eq!(layout.partition_values, vec!["session-001"]);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod builder;
pub mod error;
pub mod job;
pub mod layout;
pub mod metrics;
pub mod model;
pub mod runner;
pub mod scanner;
pub mod schedule;
pub mod schema;
pub mod service;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::builder::{BuildSummary, CatalogBuilder, CatalogWork};
    pub use crate::error::{Error, Result};
    pub use crate::job::{CatalogJobDefinition, TriggerBinding, TriggerKind, TriggerSpec};
    pub use crate::model::{CatalogDatabase, CatalogPartition, CatalogTable, Column};
    pub use crate::runner::{
        CatalogJobRun, CatalogJobRunner, RunHandle, RunStatus, TimerOutcome, TriggerOutcome,
        TriggerState,
    };
    pub use crate::scanner::{DiscoveredTable, OutputScanner, ScanReport};
    pub use crate::schedule::{ScheduleEvaluator, ScheduleExpression};
    pub use crate::service::{CatalogService, PublishOutcome};
}

pub use builder::{CatalogBuilder, CatalogWork};
pub use error::{Error, Result};
pub use job::CatalogJobDefinition;
pub use runner::{CatalogJobRunner, TriggerOutcome};
pub use service::CatalogService;
