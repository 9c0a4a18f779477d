//! Strongly-typed identifiers for Strata entities.
//!
//! Identifiers are ULIDs: sortable by creation time and generated without
//! coordination. Each entity gets its own newtype so an invocation ID can
//! never be passed where a query execution ID is expected.
//!
//! # Example
//!
//! ```rust
//! use strata_core::id::{InvocationId, JobRunId};
//!
//! let invocation = InvocationId::generate();
//! let run = JobRunId::generate();
//! assert_ne!(invocation.to_string(), run.to_string());
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

use crate::error::{Error, Result};

macro_rules! ulid_id {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Ulid);

        impl $name {
            /// Generates a new unique identifier.
            #[must_use]
            pub fn generate() -> Self {
                Self(Ulid::new())
            }

            /// Creates an identifier from a raw ULID.
            #[must_use]
            pub const fn from_ulid(ulid: Ulid) -> Self {
                Self(ulid)
            }

            /// Returns the underlying ULID.
            #[must_use]
            pub const fn as_ulid(&self) -> Ulid {
                self.0
            }

            /// Returns the creation timestamp encoded in the ID.
            #[must_use]
            pub fn created_at(&self) -> chrono::DateTime<chrono::Utc> {
                let ms = i64::try_from(self.0.timestamp_ms()).unwrap_or(i64::MAX);
                chrono::DateTime::from_timestamp_millis(ms).unwrap_or_else(chrono::Utc::now)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = Error;

            fn from_str(s: &str) -> Result<Self> {
                Ulid::from_string(s)
                    .map(Self)
                    .map_err(|e| Error::InvalidId {
                        message: format!(concat!("invalid ", $label, " '{}': {}"), s, e),
                    })
            }
        }
    };
}

ulid_id!(
    /// Identifies one transform invocation for one object-created event.
    InvocationId,
    "invocation ID"
);

ulid_id!(
    /// Identifies one execution of the catalog builder job.
    JobRunId,
    "job run ID"
);

ulid_id!(
    /// Identifies one query submitted to the query gateway.
    QueryExecutionId,
    "query execution ID"
);

ulid_id!(
    /// Identifies one audit or pipeline event.
    EventId,
    "event ID"
);
