//! # strata-pipeline
//!
//! Puts the ingest front, the catalog job and the query gateway together
//! into one deployment.
//!
//! - **Plan**: every resource of a stage, with derived names, policies,
//!   dependencies and registry outputs, in creation order
//! - **Policies**: the canonical identity of each component
//! - **Pipeline**: the provisioned components behind three entry points
//!   (object-created events, timer ticks, query consumers)
//!
//! ## Example
//!
//! ```rust
//! use strata_core::config::PipelineConfig;
//! use strata_pipeline::plan::DeploymentPlan;
//!
//! let plan = DeploymentPlan::build(&PipelineConfig::default()).unwrap();
//! let first = &plan.resources()[0];
//! assert_eq!(first.name, "strata-dev-raw-data");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod pipeline;
pub mod plan;
pub mod policies;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::pipeline::{Pipeline, PipelineBackends};
    pub use crate::plan::{DeploymentPlan, PlannedResource, ResourceKind};
    pub use crate::policies::PipelineIdentities;
}

pub use error::{Error, Result};
pub use pipeline::{Pipeline, PipelineBackends};
pub use plan::DeploymentPlan;
