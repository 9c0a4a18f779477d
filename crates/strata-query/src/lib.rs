//! # strata-query
//!
//! SQL access to the cataloged output zone for a bounded set of consumers.
//!
//! - **Workgroups** fix where results go; queries asking for anything else
//!   are rejected
//! - **Access boundaries** issue per-consumer credentials that can read the
//!   catalog and the output zone, run queries, and touch only their own
//!   results area
//! - **Gateway** runs each query on DataFusion under the caller's
//!   permissions: `Submitted -> Running -> Succeeded | Failed | Cancelled`
//!
//! ## Example
//!
//! ```rust
//! use strata_query::workgroup::{ResultsLocation, Workgroup};
//!
//! let wg = Workgroup::new("analysts", ResultsLocation::bucket_root("results"));
//! assert!(wg.admit(None).is_ok());
//! assert!(wg.admit(Some("s3://elsewhere/")).is_err());
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod boundary;
pub mod engine;
pub mod error;
pub mod execution;
pub mod gateway;
pub mod metrics;
pub mod workgroup;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::boundary::{AccessBoundary, AccessGrant, AccessKey, BoundaryScope};
    pub use crate::error::{Error, Result};
    pub use crate::execution::{QueryExecution, QueryState};
    pub use crate::gateway::{
        GatewayLimits, GatewayStores, QueryGateway, QueryResults, StartQueryRequest,
    };
    pub use crate::workgroup::{ResultsLocation, Workgroup, WorkgroupState};
}

pub use boundary::{AccessBoundary, AccessGrant};
pub use error::{Error, Result};
pub use gateway::{QueryGateway, StartQueryRequest};
pub use workgroup::Workgroup;
