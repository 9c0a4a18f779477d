//! # strata-ingest
//!
//! The event-driven front of the pipeline: landed objects are routed by
//! suffix and handed to the transformation exactly once per delivery.
//!
//! - **Trigger filter**: exact, case-sensitive suffix rules; unmatched
//!   objects are ignored without error
//! - **Invocation ledger**: durable at-most-once reservation per
//!   `(object key, event id)`
//! - **Transform invoker**: fire-and-forget dispatch under the transform
//!   identity, outcome recorded, no retry
//! - **Lifecycle**: retention-based expiry of the landing zone
//!
//! ## Example
//!
//! ```rust
//! use strata_ingest::event::ObjectCreatedEvent;
//! use strata_ingest::filter::{RoutingDecision, TriggerFilter};
//!
//! let filter = TriggerFilter::from_suffixes([".MF4", ".MFC", ".MFE", ".MFM"]).unwrap();
//!
//! let upload = ObjectCreatedEvent::new("evt-1", "raw", "session-001.MF4", 1024);
//! assert!(filter.route(&upload).is_matched());
//!
//! let notes = ObjectCreatedEvent::new("evt-2", "raw", "notes.txt", 12);
//! assert_eq!(filter.route(&notes), RoutingDecision::Ignored);
//! ```

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]

pub mod error;
pub mod event;
pub mod filter;
pub mod invoker;
pub mod ledger;
pub mod lifecycle;
pub mod metrics;
pub mod transform;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::error::{Error, Result};
    pub use crate::event::{parse_notification, ObjectCreatedEvent};
    pub use crate::filter::{RoutingDecision, SuffixRule, TriggerFilter};
    pub use crate::invoker::{Dispatch, InvocationHandle, TransformFunction, TransformInvoker};
    pub use crate::ledger::{InvocationLedger, InvocationRecord, InvocationStatus};
    pub use crate::lifecycle::{LifecycleRule, LifecycleSweeper};
    pub use crate::transform::{OutputObject, SourceObject, TransformContext, Transformation};
}

pub use error::{Error, Result};
pub use event::ObjectCreatedEvent;
pub use filter::{RoutingDecision, TriggerFilter};
pub use invoker::{Dispatch, TransformInvoker};
pub use transform::{TransformContext, Transformation};
