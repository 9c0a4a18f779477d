//! # strata-core
//!
//! Core abstractions for the Strata data-lake ingestion pipeline.
//!
//! This crate provides the foundational types shared by every Strata
//! component:
//!
//! - **Storage**: the object-store trait, conditional writes and an
//!   in-memory backend
//! - **Permissions**: immutable policy statements, execution identities and
//!   the guarded store every component reads and writes through
//! - **Naming**: deterministic resource names, ARNs and the configuration
//!   registry
//! - **Resource graph**: explicit creation-order dependencies
//! - **Locking**: the storage-backed lock that bounds job concurrency
//! - **Observability**: logging setup, spans and audit events
//!
//! ## Crate Boundary
//!
//! `strata-core` is the **only** crate allowed to define shared primitives.
//! The ingest, catalog and query crates depend on it and never on each
//! other's internals.
//!
//! ## Example
//!
//! ```rust
//! use strata_core::prelude::*;
//!
//! let ctx = Context {
//!     app_prefix: "strata".into(),
//!     tag_prefix: "strata".into(),
//!     stage: "dev".into(),
//!     region: "eu-west-1".into(),
//!     account: "000000000000".into(),
//!     multi_region: false,
//! };
//! let zones = ZoneNames::for_context(&ctx);
//! assert_eq!(zones.output, "strata-dev-raw-data-parquet");
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod arn;
pub mod audit;
pub mod config;
pub mod error;
pub mod graph;
pub mod guarded;
pub mod id;
pub mod lock;
pub mod naming;
pub mod observability;
pub mod policy;
pub mod registry;
pub mod storage;

/// Prelude module for convenient imports.
///
/// # Example
///
/// ```rust
/// use strata_core::prelude::*;
/// ```
pub mod prelude {
    pub use crate::arn::ArnScope;
    pub use crate::audit::{AuditAction, AuditEvent, AuditSink, MemoryAuditSink};
    pub use crate::config::PipelineConfig;
    pub use crate::error::{Error, Result};
    pub use crate::graph::DependencyGraph;
    pub use crate::guarded::{Authorizer, GuardedStore};
    pub use crate::id::{EventId, InvocationId, JobRunId, QueryExecutionId};
    pub use crate::lock::{Acquisition, DistributedLock, LockGuard, LockInfo};
    pub use crate::naming::{Context, ZoneNames};
    pub use crate::policy::{
        actions, Action, Condition, Decision, ExecutionIdentity, PolicyDocument,
        PolicyStatement, PrincipalKind, RequestContext,
    };
    pub use crate::registry::{MemoryParameterRegistry, ParameterRegistry, StackOutput};
    pub use crate::storage::{
        MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult,
    };
}

// Re-export key types at crate root for ergonomics
pub use audit::{AuditAction, AuditEvent, AuditSink};
pub use config::PipelineConfig;
pub use error::{Error, Result};
pub use guarded::{Authorizer, GuardedStore};
pub use id::{EventId, InvocationId, JobRunId, QueryExecutionId};
pub use lock::{Acquisition, DistributedLock, LockGuard, LockInfo};
pub use naming::{Context, ZoneNames};
pub use observability::{init_logging, LogFormat, Redacted};
pub use policy::{Action, ExecutionIdentity, PolicyDocument, PolicyStatement};
pub use storage::{MemoryBackend, ObjectMeta, StorageBackend, WritePrecondition, WriteResult};
